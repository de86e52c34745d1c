//! Running commands in throwaway containers.

pub mod diagnostics;
pub mod docker;
pub mod engine;
pub mod error;
mod inventory;
pub mod registry;
pub mod resources;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use diagnostics::DiagnosticsMode;
pub use docker::{DockerEngine, EngineConnector};
pub use engine::Engine;
pub use error::{Result, SandboxError};
pub use registry::{TuprwreImage, generate_image_name};
pub use resources::ResourcePolicy;
pub use session::{RunRequest, Sandbox, host_user};
