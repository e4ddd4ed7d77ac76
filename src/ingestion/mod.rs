//! Data ingestion module - functional pipeline from raw extracts to staging rows

pub mod fetch;
pub mod normalize;
pub mod parse;
pub mod registry;
pub mod types;
pub mod write;

pub use types::*;
