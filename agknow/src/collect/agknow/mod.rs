//! Access to the ag|knowledge REST API

pub mod api_collect;
pub mod responses;

use std::fmt;
use std::str::FromStr;

use crate::commons::error::AgknowError;

pub use api_collect::AgknowCollect;
pub use responses::{ParcelListing, RegistrationOutcome};

/// Response dialect of the API, resolved once from the configured version label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// Payload wrapped in a one-element list under `content`; failures by status code
    V3,
    /// Payload object under `content`; failures as an `error`/`detail` body
    V4,
}

impl ApiVersion {
    /// Path appended to the host, e.g. `/agknow/api/v3`
    pub fn path(&self) -> &'static str {
        match self {
            ApiVersion::V3 => "/agknow/api/v3",
            ApiVersion::V4 => "/agknow/api/v4",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ApiVersion {
    type Err = AgknowError;

    /// Accepts any label ending in `3` or `4` (`v3`, `/agknow/api/v4`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().trim_end_matches('/');
        if label.ends_with('3') {
            Ok(ApiVersion::V3)
        } else if label.ends_with('4') {
            Ok(ApiVersion::V4)
        } else {
            Err(AgknowError::UnknownApiVersion(s.to_string()))
        }
    }
}
