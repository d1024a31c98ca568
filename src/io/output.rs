use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::io::mesh::Mesh;
use crate::registration::icp::IcpIteration;
use crate::registration::transform::RigidTransform;

fn create<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes `mesh` as Wavefront OBJ. Normals, if present, are written as `vn` records sharing
/// the vertex numbering.
pub fn write_mesh_obj<P: AsRef<Path>>(path: P, mesh: &Mesh) -> Result<()> {
    let mut writer = create(&path)?;

    writeln!(writer, "# {} vertices, {} triangles", mesh.vertex_count(), mesh.triangle_count())?;
    for v in mesh.vertices() {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
    }
    if let Some(normals) = mesh.normals() {
        for n in normals {
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        }
        for t in mesh.triangles() {
            let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
            writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        }
    } else {
        for t in mesh.triangles() {
            writeln!(writer, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes the homogeneous matrix as `{"matrix": [[..], [..], [..], [..]]}`.
pub fn write_transform_json<P: AsRef<Path>>(path: P, transform: &RigidTransform) -> Result<()> {
    let mut writer = create(&path)?;
    serde_json::to_writer_pretty(&mut writer, &transform.to_record())
        .with_context(|| format!("failed to write {}", path.as_ref().display()))?;
    writer.flush()?;
    Ok(())
}

/// One CSV row per ICP iteration.
pub fn write_icp_log_csv<P: AsRef<Path>>(path: P, history: &[IcpIteration]) -> Result<()> {
    let writer = create(&path)?;
    let mut csv = csv::Writer::from_writer(writer);
    for row in history {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}
