//! Reconciliation of two normalized tables
//!
//! The [`Reconciler`] seeds one pipeline per side from a [`ReconConfig`],
//! matches the final tables on the key columns and classifies the differences
//! found in matched pairs.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod matching;
pub mod report;

pub use classifier::*;
pub use config::*;
pub use engine::*;
pub use matching::*;
pub use report::*;
