//! Errors reported by the bridge library.
//!
//! Fetch errors are transient: the poller counts them and keeps the last
//! register image. Map errors surface while building the register layout at
//! startup.
use std::time::Duration;

/// Represents all possible errors of the bridge library.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `reqwest::Error` (connection refused, body read failure, ...).
    #[cfg(feature = "shelly")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The meter answered with a non-success status.
    #[cfg(feature = "shelly")]
    #[error("meter answered with HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    /// Wraps `serde_json::Error`.
    #[cfg(feature = "shelly")]
    #[error("malformed status payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Wraps `digest_auth::Error`.
    #[cfg(feature = "shelly")]
    #[error("digest authentication failed: {0}")]
    DigestAuth(#[from] digest_auth::Error),

    /// The configured meter URL cannot be parsed.
    #[cfg(feature = "shelly")]
    #[error("invalid meter URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A header value could not be built or read.
    #[cfg(feature = "shelly")]
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A required key is absent from the status payload.
    #[error("status payload lacks key '{0}'")]
    MissingKey(String),

    /// The fetch did not complete in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// No field with this SunSpec point name exists in the map.
    #[error("unknown register point '{0}'")]
    UnknownPoint(String),

    /// Two fields, or a field and the end of the model, share registers.
    #[error("register point '{point}' overlaps '{other}'")]
    OverlappingField { point: String, other: String },

    /// The map does not fit the 16 bit address space.
    #[error("register map needs {0} registers")]
    MapTooLarge(usize),

    /// The map placed at this base address runs past the last register.
    #[error("register map of {required} registers does not fit at base address {base}")]
    BaseOutOfRange { base: u16, required: usize },
}

/// The result type of the bridge library.
pub type Result<T> = std::result::Result<T, Error>;
