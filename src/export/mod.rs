//! Exporters for the canonical table

pub mod csv_file;
pub mod load;

pub use csv_file::to_csv;
pub use load::{build_dimension, bulk_load, LoadStats};
