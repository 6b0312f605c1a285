//! Image access: references, registry pulls, OCI layouts and layer flattening.

pub mod daemon;
pub mod image;
pub mod layers;
pub mod materialize;
pub mod reference;
pub mod registry;

pub use daemon::DockerDaemon;
pub use image::{DockerArchive, OciImage};
pub use layers::{apply_layer, flatten};
pub use materialize::{DefaultMaterializer, ImageMaterializer};
pub use reference::{base_image, ImageReference};
pub use registry::{RegistryAuth, RegistryPuller};
