//! Logical File Names.
//!
//! An LFN is a JSON-packed address used by ingestion pipelines:
//!
//! ```json
//! {"protocol": "s3", "tracer_id": "t-1", "job_id": "42", "source": "crawler", "relative_path": "docs/a.txt"}
//! ```
//!
//! Only `protocol` and `relative_path` carry meaning here; the other fields
//! are preserved verbatim. The path is sanitized and may not contain `..`
//! segments.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdaError};
use crate::models::Protocol;
use crate::validate::{check_transport_path, sanitize_relative_path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLfn")]
pub struct Lfn {
    pub protocol: Protocol,
    pub tracer_id: String,
    pub job_id: String,
    pub source: String,
    pub relative_path: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLfn {
    protocol: String,
    tracer_id: String,
    job_id: String,
    source: String,
    relative_path: String,
}

impl TryFrom<RawLfn> for Lfn {
    type Error = SdaError;

    fn try_from(raw: RawLfn) -> Result<Self> {
        let protocol = raw
            .protocol
            .parse::<Protocol>()
            .map_err(|_| SdaError::InvalidLfn(format!("unknown protocol '{}'", raw.protocol)))?;
        let relative_path = sanitize_relative_path(&raw.relative_path)
            .map_err(|e| SdaError::InvalidLfn(e.to_string()))?;
        check_transport_path(&relative_path).map_err(|e| SdaError::InvalidLfn(e.to_string()))?;
        Ok(Lfn {
            protocol,
            tracer_id: raw.tracer_id,
            job_id: raw.job_id,
            source: raw.source,
            relative_path,
        })
    }
}

/// Parse an LFN from its JSON form.
pub fn parse_lfn(s: &str) -> Result<Lfn> {
    serde_json::from_str(s).map_err(|e| SdaError::InvalidLfn(e.to_string()))
}

impl Lfn {
    /// Canonical JSON form, suitable for storage and for [`parse_lfn`].
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SdaError::Internal(e.to_string()))
    }
}
