//! Conflict tracking and automated resolution.

mod resolve;
mod tracker;

pub use resolve::{
    Icd10FuzzyMatcher, InvalidCodeFilter, Outcome, PlaceholderCreator, ResolutionEngine,
    ResolutionStats, ResolverStrategy,
};
pub use tracker::ConflictTracker;
