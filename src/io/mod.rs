pub mod input;
pub mod mesh;
pub mod output;
pub mod volume;

pub use input::{MeshReader, ObjReader, ReadError, VolumeReader};
pub use mesh::{AsPoints, Mesh};
pub use volume::ScalarVolume;
