pub mod filesystem;
pub mod path;

pub use filesystem::ArtifactStore;
pub use path::ArtifactPath;
