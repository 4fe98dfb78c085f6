//! Data directory parsers

pub mod delay_import;
pub mod export;
pub mod import;

pub use delay_import::parse_delay_imports;
pub use export::{parse_exports, ExportTable};
pub use import::parse_imports;
