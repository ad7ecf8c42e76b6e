use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::collect::agknow::ApiVersion;
use crate::collect::global_variables::{
    DEFAULT_API_VERSION, DEFAULT_HOST_URL, DEFAULT_PARCEL_LIMIT, WGS84_EPSG,
};
use crate::commons::error::{AgknowError, Result};
use crate::geometric::raster::ImageFormat;

pub const ENV_HOST_URL: &str = "AGKNOW_HOST_URL";
pub const ENV_API_KEY: &str = "AGKNOW_API_KEY";
pub const ENV_API_VERSION: &str = "AGKNOW_API_VERSION";

/// How parcel detail data is fetched after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParcelDownloadMode {
    /// Only the listing is fetched; details and images load when a parcel is selected.
    #[default]
    OneByOne,
    /// Details of every parcel are fetched in a single background task.
    AllAtOnce,
}

/// Persisted client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host_url: String,
    pub api_key: String,
    /// Version label, e.g. `/agknow/api/v3`
    pub api_version: String,
    pub ssl_verify: bool,
    /// EPSG code of the working coordinate system
    pub working_epsg: i32,
    pub image_format: ImageFormat,
    pub parcel_download_mode: ParcelDownloadMode,
    pub download_images: bool,
    pub parcel_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host_url: DEFAULT_HOST_URL.to_string(),
            api_key: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            ssl_verify: true,
            working_epsg: WGS84_EPSG,
            image_format: ImageFormat::Tif,
            parcel_download_mode: ParcelDownloadMode::OneByOne,
            download_images: true,
            parcel_limit: DEFAULT_PARCEL_LIMIT,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing keys take their default value.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = toml::to_string_pretty(self).map_err(|e| AgknowError::Config {
            key: "settings".to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Override host, key and version from the environment when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var(ENV_HOST_URL) {
            self.host_url = host;
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Ok(version) = std::env::var(ENV_API_VERSION) {
            self.api_version = version;
        }
        self
    }

    pub fn api_version(&self) -> Result<ApiVersion> {
        self.api_version.parse()
    }

    /// Base URL of the API: host followed by the path of the resolved version.
    pub fn base_url(&self) -> Result<String> {
        Ok(format!(
            "{}{}",
            self.host_url.trim_end_matches('/'),
            self.api_version()?.path()
        ))
    }

    pub fn validate(&self) -> Result<()> {
        self.api_version()?;
        if url::Url::parse(&self.host_url).is_err() {
            return Err(AgknowError::Config {
                key: "host_url".to_string(),
                reason: format!("'{}' is not a valid URL", self.host_url),
            });
        }
        if self.working_epsg <= 0 {
            return Err(AgknowError::Config {
                key: "working_epsg".to_string(),
                reason: format!("{} is not an EPSG code", self.working_epsg),
            });
        }
        if self.parcel_limit == 0 {
            return Err(AgknowError::Config {
                key: "parcel_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
