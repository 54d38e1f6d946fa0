pub mod artifact;
pub mod cost;
pub mod deployment;
pub mod enums;
pub mod model;
pub mod notebook;
pub mod usage;

pub use artifact::*;
pub use cost::*;
pub use deployment::*;
pub use enums::*;
pub use model::*;
pub use notebook::*;
pub use usage::*;
