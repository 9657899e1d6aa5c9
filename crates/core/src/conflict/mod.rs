//! Conflict evaluation and reporting.
//!
//! The conflict subsystem is responsible for:
//! 1. **Evaluation** -- intersecting the local edit-set with every peer's.
//! 2. **Reporting** -- writing each result as a timestamped line, without
//!    flooding the output with repeated "no conflicts" lines.

pub mod evaluator;
pub mod reporter;

pub use evaluator::{ConflictEvaluator, ConflictRecord};
pub use reporter::{ConflictReporter, GroupedConflict};
