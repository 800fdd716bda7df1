//! Parallel (C, gamma) grid search for SVM cross-validation
//!
//! Evaluates every point of a log2(C) x log2(gamma) grid by running an
//! external trainer on a pool of local, SSH and telnet workers, keeps the
//! best point, and redraws a gnuplot contour after each refinement batch.

pub mod aggregator;
pub mod api;
pub mod core;
pub mod executor;
pub mod grid;
pub mod persistence;
pub mod plot;
pub mod pool;
pub mod queue;

// Re-export main types for convenience
pub use crate::aggregator::{ResultAggregator, ResultsLog};
pub use crate::api::{GridSearch, SearchOutcome};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::executor::{Credentials, LocalExecutor, SshExecutor, TelnetExecutor};
pub use crate::grid::GridPlan;
pub use crate::queue::JobQueue;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
