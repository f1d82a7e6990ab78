//! Runtime context: configuration, sandbox layout, and the façade object.

pub mod constants;
pub mod layout;
mod local;
pub mod options;

pub use layout::{SandboxLayout, SandboxState};
pub use local::LocalRuntime;
pub use options::{RuntimeOptions, Strategy};
