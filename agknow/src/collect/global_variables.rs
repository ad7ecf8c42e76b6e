use std::time::Duration;

pub const DEFAULT_HOST_URL: &str = "https://geocledian.com";
pub const DEFAULT_API_VERSION: &str = "/agknow/api/v3";
pub const DEFAULT_PARCEL_LIMIT: u32 = 1000;

/// Parcel geometries and raster bounds are always delivered in WGS84.
pub const WGS84_EPSG: i32 = 4326;

/// Raster listings, bounding boxes and raster downloads.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
/// Parcel listing, parcel detail and registration.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Content value returned by API v3 for a rejected key.
pub const UNAUTHORIZED_CONTENT: &str = "key is not authorized";

pub const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong! See the message log for more information.";

pub fn vsimem_path(extension: &str) -> String {
    format!("/vsimem/{}.{}", uuid::Uuid::new_v4().simple(), extension)
}
