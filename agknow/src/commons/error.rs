//! Error types for agknow

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgknowError {
    // Transport errors
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    // Application errors reported by the API itself
    #[error("API error: {0}")]
    Application(String),

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),

    // Geometry errors
    #[error("Geometry is not transformable from EPSG:{src_epsg} to EPSG:{dst_epsg}: {reason}")]
    NotTransformable {
        src_epsg: i32,
        dst_epsg: i32,
        reason: String,
    },

    #[error("Geometry is not valid: {0}")]
    InvalidGeometry(String),

    // Domain value errors
    #[error("Product {product} is not available for data source {source}")]
    IncompatibleProduct { product: String, source: String },

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("Unknown image format: {0}")]
    UnknownImageFormat(String),

    #[error("Unknown API version: {0} (expected a label ending in v3 or v4)")]
    UnknownApiVersion(String),

    // Task lifecycle errors
    #[error("A background task is already running")]
    Busy,

    #[error("Task cancelled")]
    Cancelled,

    // Session state errors
    #[error("Not connected to the API")]
    NotConnected,

    #[error("No parcel selected")]
    NoParcelSelected,

    // Configuration errors
    #[error("Invalid configuration value for {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AgknowError>;
