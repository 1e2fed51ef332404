//! swarmgrid-rules: turns metric readings into debounced decisions.
//!
//! The [`Rulebook`] owns the rule vocabulary in the state store, the
//! [`RuleEngine`] evaluates a target's [`Snapshot`] against the rules that
//! apply to it, and the [`Debouncer`] keeps the per-target event that
//! decides when a repeated decision becomes actionable.

pub mod debouncer;
pub mod engine;
pub mod rulebook;
pub mod sampler;

pub use debouncer::{DebounceThresholds, Debouncer};
pub use engine::{Candidate, FieldReading, RuleEngine, RuleSet, Snapshot};
pub use rulebook::Rulebook;
pub use sampler::Sampler;
