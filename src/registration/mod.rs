pub mod icp;
pub mod kabsch;
pub mod kdtree;
pub mod transform;

pub use icp::{
    format_icp_table, register_rigid, register_rigid_with_cancel, IcpIteration, IcpParams,
    Registration,
};
pub use transform::RigidTransform;
