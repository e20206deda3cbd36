// crates/core/src/lib.rs
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod registry;
pub mod stage;
pub mod token;

pub use error::*;
pub use event::*;
pub use orchestrator::*;
pub use registry::*;
pub use stage::*;
pub use token::*;
