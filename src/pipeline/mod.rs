//! Per-side transformation pipelines
//!
//! A [`Pipeline`] queues [`Step`]s, runs them through the executor one at a
//! time and records every resulting table in its [`HistoryLog`].

pub mod core;
pub mod executor;
pub mod expression;
pub mod history;
pub mod step;

pub use self::core::*;
pub use executor::*;
pub use history::*;
pub use step::*;
