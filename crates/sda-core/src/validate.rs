//! Identifier and path validation.
//!
//! Everything here is pure. The only source of nondeterminism is the RNG used
//! to mint unique relative paths, which is injectable for tests and defaults
//! to the operating system's CSPRNG.

use rand::rngs::OsRng;
use rand::{distributions::Alphanumeric, CryptoRng, Rng, RngCore};

use crate::error::{Result, SdaError};
use crate::models::Protocol;

/// Marker embedded in every path minted by the system.
pub const PATH_MARKER: &str = "sdamarker";

/// Length of the random token inserted before the marker.
pub const PATH_TOKEN_LEN: usize = 10;

pub const MAX_RELATIVE_PATH_LEN: usize = 1024;
pub const MAX_SUB_LEN: usize = 256;

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

/// Strip every character outside `[A-Za-z0-9_./-]`.
///
/// Used when addressing a blob that already exists, where the key must not
/// change.
pub fn sanitize_relative_path(s: &str) -> Result<String> {
    let clean: String = s.chars().filter(|c| is_path_char(*c)).collect();
    if clean.is_empty() {
        return Err(SdaError::InvalidPath(format!(
            "'{s}' has no characters left after sanitizing"
        )));
    }
    Ok(clean)
}

/// Sanitize `s` and, unless it already carries [`PATH_MARKER`], rewrite it to
/// `<stem>-<token>-sdamarker.<ext>` so newly minted paths do not collide.
pub fn validate_relative_path(s: &str) -> Result<String> {
    validate_relative_path_with(s, &mut OsRng)
}

/// [`validate_relative_path`] with an explicit RNG.
pub fn validate_relative_path_with<R>(s: &str, rng: &mut R) -> Result<String>
where
    R: RngCore + CryptoRng,
{
    let clean = sanitize_relative_path(s)?;
    if clean.contains(PATH_MARKER) {
        return Ok(clean);
    }

    let token: String = (0..PATH_TOKEN_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();

    let file_start = clean.rfind('/').map(|i| i + 1).unwrap_or(0);
    let minted = match clean[file_start..].rfind('.') {
        Some(dot) if dot > 0 && file_start + dot + 1 < clean.len() => {
            let split = file_start + dot;
            format!(
                "{}-{}-{}.{}",
                &clean[..split],
                token,
                PATH_MARKER,
                &clean[split + 1..]
            )
        }
        _ => format!(
            "{}-{}-{}",
            clean.trim_end_matches('.'),
            token,
            PATH_MARKER
        ),
    };
    Ok(minted)
}

/// Parse a protocol literal (`s3`, `nas`, `local`, any case).
pub fn validate_protocol(s: &str) -> Result<Protocol> {
    s.parse()
}

/// File-extension token of the last path component; empty if there is none.
pub fn populate_type(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rfind('.') {
        Some(dot) => file[dot + 1..].to_string(),
        None => String::new(),
    }
}

/// A client `sub` is opaque, non-empty and at most 256 bytes.
pub fn validate_sub(sub: &str) -> Result<&str> {
    if sub.is_empty() {
        return Err(SdaError::InvalidArgument("client sub must not be empty".into()));
    }
    if sub.len() > MAX_SUB_LEN {
        return Err(SdaError::InvalidArgument(format!(
            "client sub exceeds {MAX_SUB_LEN} bytes"
        )));
    }
    Ok(sub)
}

/// Titles and names must contain something other than whitespace.
pub fn validate_title<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SdaError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

pub fn validate_thread_id(thread_id: Option<i64>) -> Result<Option<i64>> {
    match thread_id {
        Some(t) if t <= 0 => Err(SdaError::InvalidArgument(format!(
            "thread_id must be a positive integer, got {t}"
        ))),
        other => Ok(other),
    }
}

/// Strict check applied at the HTTP edge, before any sanitizing: the path
/// must already be in canonical alphabet, bounded, and free of `..` segments.
pub fn check_transport_path(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(SdaError::InvalidPath("relative_path must not be empty".into()));
    }
    if s.len() > MAX_RELATIVE_PATH_LEN {
        return Err(SdaError::InvalidPath(format!(
            "relative_path exceeds {MAX_RELATIVE_PATH_LEN} bytes"
        )));
    }
    if let Some(bad) = s.chars().find(|c| !is_path_char(*c)) {
        return Err(SdaError::InvalidPath(format!(
            "relative_path contains forbidden character {bad:?}"
        )));
    }
    if s.split('/').any(|seg| seg == "..") {
        return Err(SdaError::InvalidPath(
            "relative_path must not contain '..' segments".into(),
        ));
    }
    Ok(())
}
