//! Dependency-surface inspection for native executables.
//!
//! The core is a PE import, delay-import and export resolver that works on
//! untrusted input without reading out of bounds, plus overlay detection for
//! PE, ELF and Mach-O. [`api::analyze_path`] runs everything on one file.

/// One-call analysis entry points
pub mod api;
/// Parser configuration
pub mod config;
/// Symbol demangling for display
pub mod demangle;
/// Crate-level error type
pub mod error;
/// Container formats and table resolvers
pub mod formats;
/// Bounded byte sources
pub mod io;
/// Tracing setup and macros
pub mod logging;

pub use api::{analyze_bytes, analyze_path, Analysis};
pub use config::ParseOptions;
pub use error::{DependsError, Result};
pub use formats::pe::{FunctionTable, PeFile};
pub use io::IOLimits;
