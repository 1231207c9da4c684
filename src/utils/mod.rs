//! Utility functions for hashing, archiving, timestamps and host identity.

pub mod archive;
pub mod clock;
pub mod hash;

use chrono::{DateTime, Utc};

/// Hostname of the running machine, with a stable fallback.
pub fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// Filesystem-friendly timestamp used in generated file names.
pub fn filename_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
