//! Terminal rendering of a session

use indicatif::{ProgressBar, ProgressStyle};

use crate::geometric::georeference::MemRaster;
use crate::geometric::parcel::Parcel;
use crate::geometric::raster::{RasterDescriptor, RasterGroupKey};
use crate::session::{Display, NoticeLevel};

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// [`Display`] printing notices and a progress bar to stderr.
///
/// Rasters are not rendered; their in-memory resources are collected with
/// their layer names so a caller can export them afterwards.
pub struct ConsoleDisplay {
    bar: ProgressBar,
    rasters: Vec<(RasterGroupKey, String, MemRaster)>,
    labels: Vec<String>,
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        ConsoleDisplay::new()
    }
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(progress_style());
        ConsoleDisplay {
            bar,
            rasters: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Layer name and resource of every raster currently shown.
    pub fn rasters(&self) -> impl Iterator<Item = (&str, &MemRaster)> {
        self.rasters
            .iter()
            .map(|(_, name, resource)| (name.as_str(), resource))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Display for ConsoleDisplay {
    fn progress(&mut self, percentage: u8) {
        self.bar.set_position(u64::from(percentage));
    }

    fn status(&mut self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn notice(&mut self, level: NoticeLevel, message: &str) {
        let prefix = match level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "ok",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Critical => "error",
        };
        self.bar.println(format!("[{}] {}", prefix, message));
    }

    fn set_interactive(&mut self, enabled: bool) {
        if enabled {
            self.bar.finish_and_clear();
        } else {
            self.bar.reset();
        }
    }

    fn parcel_labels(&mut self, labels: &[String]) {
        self.labels = labels.to_vec();
    }

    fn parcel_added(&mut self, parcel: &Parcel) {
        tracing::debug!(target: "agknow", "parcel {} added", parcel.summary());
    }

    fn raster_added(&mut self, raster: &RasterDescriptor, layer_name: &str, resource: &MemRaster) {
        self.rasters
            .push((raster.group_key(), layer_name.to_string(), resource.clone()));
    }

    fn rasters_cleared(&mut self, key: &RasterGroupKey) {
        self.rasters.retain(|(group, _, _)| group != key);
    }

    fn images_reloaded(&mut self, rasters: &[RasterDescriptor]) {
        self.bar
            .println(format!("{} images available", rasters.len()));
    }

    fn reset(&mut self) {
        self.rasters.clear();
        self.labels.clear();
        self.bar.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::raster::{DataSource, ImageFormat, Product};

    fn raster(parcel_id: i64, raster_id: i64) -> RasterDescriptor {
        RasterDescriptor {
            parcel_id,
            product: Product::Ndvi,
            source: DataSource::Sentinel2,
            raster_id,
            date: "2018-06-01".to_string(),
            format: ImageFormat::Tif,
            bounds: None,
            extra: Default::default(),
            resource: None,
        }
    }

    #[test]
    fn test_rasters_cleared_per_group() {
        let mut display = ConsoleDisplay::new();
        for (parcel_id, raster_id) in [(1, 10), (1, 11), (2, 20)] {
            let r = raster(parcel_id, raster_id);
            display.raster_added(&r, &r.layer_name(), &MemRaster::new(format!("/vsimem/{}.tif", raster_id)));
        }

        display.rasters_cleared(&raster(1, 10).group_key());
        let left: Vec<&str> = display.rasters().map(|(name, _)| name).collect();
        assert_eq!(left, vec!["ndvi|2018-06-01|20|sentinel2"]);

        display.reset();
        assert_eq!(display.rasters().count(), 0);
    }
}
