//! One-call analysis of a PE image's dependency surface.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ParseOptions;
use crate::error::{DependsError, Result};
use crate::formats::overlay::OverlaySpan;
use crate::formats::pe::{AddressWidth, FunctionTable, Machine, PeError, PeFile};
use crate::io::{ByteSource, IOLimits, MappedFile};
use crate::{log_error, span_trace};

/// Report for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub machine: Machine,
    pub address_width: AddressWidth,
    pub function_table: FunctionTable,
    /// Sorted union of load-time and delay-load library names.
    pub dependencies: Vec<String>,
    pub overlay: Option<OverlaySpan>,
}

impl Analysis {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DependsError::Serialization(e.to_string()))
    }
}

/// Map `path` under `limits` and analyze it.
///
/// Failing to open or map the file is `DependsError::Io`; reads that later
/// break the limits surface through `DependsError::Pe`.
pub fn analyze_path<P: AsRef<Path>>(
    path: P,
    limits: &IOLimits,
    options: &ParseOptions,
) -> Result<Analysis> {
    let path = path.as_ref();
    let span = span_trace!("analyze_path", path = %path.display());
    let _guard = span.enter();

    let source = MappedFile::open(path, limits.clone()).map_err(|e| log_error!(e, "open"))?;
    let pe = PeFile::parse(source).map_err(|e| log_error!(e, "parse"))?;
    analyze(&pe, options)
}

/// Analyze an in-memory image.
pub fn analyze_bytes(data: impl Into<Bytes>, options: &ParseOptions) -> Result<Analysis> {
    let data = data.into();
    if data.is_empty() {
        return Err(DependsError::InvalidInput("empty input".to_string()));
    }
    let pe = PeFile::from_bytes(data).map_err(|e| log_error!(e, "parse"))?;
    analyze(&pe, options)
}

fn analyze<S: ByteSource>(pe: &PeFile<S>, options: &ParseOptions) -> Result<Analysis> {
    let function_table = pe.function_table(options)?;
    let overlay = match pe.overlay_span() {
        Ok(span) => Some(span),
        Err(PeError::NoOverlay { .. }) => None,
        Err(e) => return Err(e.into()),
    };

    let analysis = Analysis {
        machine: pe.machine(),
        address_width: pe.address_width()?,
        dependencies: function_table.dependencies(),
        function_table,
        overlay,
    };
    info!(
        dependencies = analysis.dependencies.len(),
        exports = analysis.function_table.exports.len(),
        overlay = analysis.overlay.is_some(),
        "Analysis complete"
    );
    Ok(analysis)
}
