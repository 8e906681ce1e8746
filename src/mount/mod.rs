pub mod axes;
pub mod mesh;
pub mod model;

pub use axes::MountAxes;
pub use mesh::MeshTable;
pub use model::{altaz_to_hadec, mount_to_sky, sky_to_mount, MountFrame};
