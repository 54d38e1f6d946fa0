pub mod billing;
pub mod deployment;
pub mod model;
pub mod notebook;

pub use billing::*;
pub use deployment::*;
pub use model::*;
pub use notebook::*;
