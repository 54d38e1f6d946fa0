pub mod docker;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod readiness;

pub use docker::{DockerConfig, DockerRuntime};
pub use error::*;
pub use gateway::*;
pub use memory::{InMemoryRuntime, RuntimeOp};
pub use readiness::{ReadinessConfig, wait_until_ready};
