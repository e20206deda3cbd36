// crates/stages/src/lib.rs
//! Built-in analysis stages and the catalog that assembles them into a
//! pipeline: selected analysts first, then risk management, then the
//! final portfolio decision.

pub mod catalog;
pub mod deep_value;
pub mod metrics;
pub mod portfolio;
pub mod quality;
pub mod risk;
pub mod signal;

pub use catalog::*;
pub use deep_value::*;
pub use metrics::*;
pub use portfolio::*;
pub use quality::*;
pub use risk::*;
pub use signal::*;
