use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::io::mesh::Mesh;
use crate::io::volume::ScalarVolume;

/// Failure of an external reader. Missing/unreadable sources are kept apart from sources
/// that were found but could not be understood.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{}: not found", path.display())]
    NotFound { path: PathBuf },

    #[error("{}: unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: malformed content at line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl ReadError {
    pub fn path(&self) -> &Path {
        match self {
            ReadError::NotFound { path }
            | ReadError::Unreadable { path, .. }
            | ReadError::Malformed { path, .. } => path,
        }
    }

    fn from_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ReadError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ReadError::Unreadable {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> Self {
        ReadError::Malformed {
            path: path.to_path_buf(),
            line,
            reason: reason.into(),
        }
    }
}

/// Supplies a scalar volume for a file or image-series directory.
pub trait VolumeReader {
    fn read_volume(&self, path: &Path) -> Result<ScalarVolume, ReadError>;
}

/// Supplies a triangle mesh for a file.
pub trait MeshReader {
    fn read_mesh(&self, path: &Path) -> Result<Mesh, ReadError>;
}

impl<F> VolumeReader for F
where
    F: Fn(&Path) -> Result<ScalarVolume, ReadError>,
{
    fn read_volume(&self, path: &Path) -> Result<ScalarVolume, ReadError> {
        self(path)
    }
}

/// Wavefront OBJ reader: `v`, `vn` and `f` records. Polygons are fanned into triangles,
/// negative (relative) indices are resolved and any other record is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjReader;

impl MeshReader for ObjReader {
    fn read_mesh(&self, path: &Path) -> Result<Mesh, ReadError> {
        let file = File::open(path).map_err(|e| ReadError::from_io(path, e))?;
        parse_obj(path, BufReader::new(file))
    }
}

pub(crate) fn parse_obj<R: BufRead>(path: &Path, reader: R) -> Result<Mesh, ReadError> {
    let mut vertices: Vec<Point3<f64>> = Vec::new();
    let mut normals: Vec<Vector3<f64>> = Vec::new();
    let mut triangles: Vec<[usize; 3]> = Vec::new();
    // normal index referenced by each vertex, when the faces name one
    let mut vertex_normal: Vec<Option<usize>> = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let lineno = n + 1;
        let line = line.map_err(|e| ReadError::from_io(path, e))?;
        let line = line.trim();
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let xyz = parse_floats(path, lineno, parts)?;
                vertices.push(Point3::new(xyz[0], xyz[1], xyz[2]));
                vertex_normal.push(None);
            }
            Some("vn") => {
                let xyz = parse_floats(path, lineno, parts)?;
                normals.push(Vector3::new(xyz[0], xyz[1], xyz[2]));
            }
            Some("f") => {
                let mut corners = Vec::new();
                for token in parts {
                    let mut fields = token.split('/');
                    let v = resolve_index(path, lineno, fields.next(), vertices.len())?;
                    let vn = match fields.nth(1) {
                        Some(s) if !s.is_empty() => {
                            Some(resolve_index(path, lineno, Some(s), normals.len())?)
                        }
                        _ => None,
                    };
                    if let Some(vn) = vn {
                        vertex_normal[v] = Some(vn);
                    }
                    corners.push(v);
                }
                if corners.len() < 3 {
                    return Err(ReadError::malformed(
                        path,
                        lineno,
                        format!("face with {} corners", corners.len()),
                    ));
                }
                for i in 1..corners.len() - 1 {
                    triangles.push([corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }

    let mesh = Mesh::new(vertices, triangles)
        .map_err(|e| ReadError::malformed(path, 0, e.reason().to_string()))?;

    // keep normals only when every vertex has one
    let per_vertex: Option<Vec<Vector3<f64>>> = vertex_normal
        .iter()
        .map(|vn| vn.map(|i| normals[i]))
        .collect();
    match per_vertex {
        Some(ns) if !ns.is_empty() => mesh
            .with_normals(ns)
            .map_err(|e| ReadError::malformed(path, 0, e.reason().to_string())),
        _ => Ok(mesh),
    }
}

fn parse_floats<'a, I>(path: &Path, line: usize, parts: I) -> Result<[f64; 3], ReadError>
where
    I: Iterator<Item = &'a str>,
{
    let values: Vec<f64> = parts
        .take(3)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| ReadError::malformed(path, line, format!("bad number '{}'", s)))
        })
        .collect::<Result<_, _>>()?;
    if values.len() != 3 {
        return Err(ReadError::malformed(path, line, "expected three coordinates"));
    }
    Ok([values[0], values[1], values[2]])
}

/// 1-based (or negative, relative) OBJ index to a 0-based index into `count` items.
fn resolve_index(
    path: &Path,
    line: usize,
    token: Option<&str>,
    count: usize,
) -> Result<usize, ReadError> {
    let token = token.unwrap_or("");
    let raw: i64 = token
        .parse()
        .map_err(|_| ReadError::malformed(path, line, format!("bad index '{}'", token)))?;
    let resolved = if raw > 0 {
        raw - 1
    } else {
        count as i64 + raw
    };
    if raw == 0 || resolved < 0 || resolved >= count as i64 {
        return Err(ReadError::malformed(
            path,
            line,
            format!("index {} out of range ({} defined)", raw, count),
        ));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod input_tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> Result<Mesh, ReadError> {
        parse_obj(Path::new("test.obj"), Cursor::new(text))
    }

    #[test]
    fn test_quad_is_fanned() -> anyhow::Result<()> {
        let mesh = parse(
            "# quad\n\
             v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             f 1 2 3 4\n",
        )?;
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [0, 2, 3]]);
        assert!(mesh.normals().is_none());
        Ok(())
    }

    #[test]
    fn test_slash_forms_and_negative_indices() -> anyhow::Result<()> {
        let mesh = parse(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\n\
             vn 0 0 1\n\
             vt 0 0\n\
             f -3/1/1 -2//1 -1/1/-1\n",
        )?;
        assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
        let normals = mesh.normals().unwrap();
        assert!(normals.iter().all(|n| *n == Vector3::new(0.0, 0.0, 1.0)));
        Ok(())
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            parse("v 0 0\n"),
            Err(ReadError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            parse("v 0 0 0\nv 1 0 0\nf 1 2 3\n"),
            Err(ReadError::Malformed { line: 3, .. })
        ));
        assert!(matches!(
            parse("v 0 0 0\nf 1 1\n"),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ObjReader
            .read_mesh(Path::new("/definitely/not/here.obj"))
            .unwrap_err();
        assert!(matches!(err, ReadError::NotFound { .. }));
        assert!(err.to_string().contains("not found"));
    }
}
