//! Mapping from logical addresses to object-store keys.

use serde::Serialize;

use crate::error::{Result, SdaError};
use crate::lfn::Lfn;
use crate::models::Protocol;

const MAX_BUCKET_STEM: usize = 62;
const BUCKET_PAD: &str = "-bucket";

/// Bucket/key pair inside the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub object_name: String,
}

/// Deterministic bucket name for a client.
///
/// Lowercase, strip non-alphanumerics, truncate to 62 characters, and pad
/// with `-bucket` when shorter than 3 characters. A `sub` with no
/// alphanumerics at all maps to `bucket`.
pub fn bucket_for(client_sub: &str) -> String {
    let stem: String = client_sub
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_BUCKET_STEM)
        .collect();
    if stem.is_empty() {
        BUCKET_PAD.trim_start_matches('-').to_string()
    } else if stem.len() < 3 {
        format!("{stem}{BUCKET_PAD}")
    } else {
        stem
    }
}

/// Location of `(client_sub, protocol, relative_path)`. Only S3 is backed by
/// the object store.
pub fn object_for(client_sub: &str, protocol: Protocol, relative_path: &str) -> Result<ObjectLocation> {
    if protocol != Protocol::S3 {
        return Err(SdaError::UnsupportedProtocol(protocol.to_string()));
    }
    Ok(ObjectLocation {
        bucket: bucket_for(client_sub),
        object_name: relative_path.to_string(),
    })
}

/// Location addressed by an LFN on behalf of `client_sub`.
pub fn lfn_to_object(client_sub: &str, lfn: &Lfn) -> Result<ObjectLocation> {
    object_for(client_sub, lfn.protocol, &lfn.relative_path)
}
