//! Ordered rejection rules that turn gathered facts into a verdict
//!
//! Rules run in a fixed order and the first one that applies decides. A
//! package that passes all nine is reported as `Proceed`.

pub mod pipeline;
pub mod verdict;

pub use pipeline::{DecisionPipeline, DecisionRecord, early_rejection};
pub use verdict::{ErrorKind, Outcome, Rule, Verdict};
