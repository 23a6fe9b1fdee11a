//! Pure computation for the desk: no I/O, no locks.

pub mod book;
pub mod delta;
pub mod drift;
pub mod monte_carlo;
pub mod overlay;

pub use book::{book_summary, constraint_set, content_hash, BookSummary, CounterpartyPosition, PositionLine};
pub use delta::{DeltaTrigger, TriggerHit};
pub use drift::{DriftLevel, DriftStrategy, DriftThresholds, LinearDrift};
pub use monte_carlo::{aggregate, classify_signal, pearson, percentile, perturb, ScenarioSet};
pub use overlay::effective_state;
