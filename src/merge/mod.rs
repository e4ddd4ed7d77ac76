//! Merge engine: builds the canonical institution table from staging

pub mod accreditation;
pub mod canonical;
pub mod complaints;
pub mod engine;
pub mod primitives;
pub mod steps;
pub mod write;

pub use canonical::{CanonicalTable, Institution, CANONICAL_COLUMNS};
pub use engine::{build, run, BuildStats};
