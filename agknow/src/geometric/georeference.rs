//! Raster georeferencing and reprojection
//!
//! Downloaded image bytes are written to GDAL's in-memory filesystem, given a
//! georeference when the format has none, and warped into the working CRS.
//! The resulting `/vsimem/...` file belongs to the caller until it calls
//! [`MemRaster::release`] or exports it with [`export`].

use anyhow::Result;

use crate::geo_core::{BoundingBox, GeoTransform};
use crate::geometric::raster::ImageFormat;

/// Handle of a raster living in GDAL's in-memory filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRaster {
    path: String,
}

impl MemRaster {
    pub fn new(path: impl Into<String>) -> Self {
        MemRaster { path: path.into() }
    }

    /// `/vsimem/...` path, usable by anything that opens GDAL datasets
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Free the in-memory file.
    pub fn release(self) -> Result<()> {
        #[cfg(feature = "gdal")]
        {
            use anyhow::Context;
            gdal::vsi::unlink_mem_file(&self.path)
                .with_context(|| format!("Failed to release {}", self.path))?;
        }
        tracing::debug!(target: "agknow", "released {}", self.path);
        Ok(())
    }
}

impl std::fmt::Display for MemRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// What GDAL reports about a raster before it is georeferenced.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub no_data: Option<f64>,
    pub width: usize,
    pub height: usize,
    pub geo_transform: Option<GeoTransform>,
    /// Projection as WKT, empty when unknown
    pub projection: String,
    pub data_type: String,
    pub band_count: usize,
    /// Authority code of the projection, when it has one
    pub epsg: Option<i32>,
}

/// Turns downloaded image bytes into a georeferenced raster in `dst_epsg`.
pub trait Georeferencer: Send + Sync {
    /// `bounds` are `[[minLat, minLon], [maxLat, maxLon]]` in WGS84 and are
    /// required for formats without an embedded georeference.
    fn materialize(
        &self,
        bytes: Vec<u8>,
        format: ImageFormat,
        bounds: Option<&BoundingBox>,
        dst_epsg: i32,
    ) -> Result<MemRaster>;
}

#[cfg(feature = "gdal")]
pub use self::gdal_pipeline::{export, read_metadata, GdalPipeline};

#[cfg(not(feature = "gdal"))]
pub fn export(_raster: &MemRaster, path: &std::path::Path) -> Result<()> {
    anyhow::bail!("Cannot export {:?}: agknow was built without the gdal feature", path)
}

#[cfg(feature = "gdal")]
mod gdal_pipeline {
    use std::path::Path;

    use anyhow::{bail, Context, Result};
    use gdal::cpl::CslStringList;
    use gdal::raster::GdalDataType;
    use gdal::spatial_ref::SpatialRef;
    use gdal::{Dataset, DriverManager};

    use super::{Georeferencer, MemRaster, RasterMetadata};
    use crate::collect::global_variables::{vsimem_path, WGS84_EPSG};
    use crate::geo_core::BoundingBox;
    use crate::geometric::raster::ImageFormat;

    /// Read the metadata of an open dataset (first band for no-data and type).
    pub fn read_metadata(dataset: &Dataset) -> Result<RasterMetadata> {
        let (width, height) = dataset.raster_size();
        let band = dataset.rasterband(1).context("Raster has no band")?;
        let epsg = dataset
            .spatial_ref()
            .ok()
            .and_then(|srs| srs.auth_code().ok());

        Ok(RasterMetadata {
            no_data: band.no_data_value(),
            width,
            height,
            geo_transform: dataset.geo_transform().ok(),
            projection: dataset.projection(),
            data_type: band.band_type().name(),
            band_count: dataset.raster_count() as usize,
            epsg,
        })
    }

    /// GDAL implementation of [`Georeferencer`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct GdalPipeline;

    impl GdalPipeline {
        pub fn new() -> Self {
            GdalPipeline
        }

        /// Copy a PNG to an in-memory GeoTIFF and place it on `bounds` in WGS84.
        fn georeference_png(
            &self,
            dataset: &Dataset,
            bounds: &BoundingBox,
            width: usize,
            height: usize,
        ) -> Result<String> {
            let driver =
                DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
            let path = vsimem_path("tif");
            let mut copy = dataset
                .create_copy(&driver, &path, &CslStringList::new())
                .context("Failed to copy PNG to GeoTIFF")?;

            copy.set_geo_transform(&bounds.geo_transform(width, height))
                .context("Failed to set geotransform")?;
            let srs = SpatialRef::from_epsg(WGS84_EPSG as u32)
                .context("Failed to create spatial reference")?;
            copy.set_spatial_ref(&srs)
                .context("Failed to set spatial reference")?;
            Ok(path)
        }

        /// Warp `src` into a new in-memory GeoTIFF in `dst_epsg`.
        ///
        /// The destination keeps the source pixel dimensions over the
        /// transformed source extent.
        fn reproject(&self, src: &Dataset, src_epsg: i32, dst_epsg: i32) -> Result<String> {
            let (width, height) = src.raster_size();
            let gt = src.geo_transform().context("Source raster has no geotransform")?;
            let extent = BoundingBox::from_geo_transform(&gt, width, height)
                .transform(src_epsg, dst_epsg)
                .context("Failed to transform raster extent")?;

            let driver =
                DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
            let path = vsimem_path("tif");
            let bands = src.raster_count() as usize;
            let band_type = src.rasterband(1).context("Raster has no band")?.band_type();

            let mut dst = match band_type {
                GdalDataType::UInt8 => driver.create_with_band_type::<u8, _>(&path, width, height, bands),
                GdalDataType::UInt16 => driver.create_with_band_type::<u16, _>(&path, width, height, bands),
                GdalDataType::Int16 => driver.create_with_band_type::<i16, _>(&path, width, height, bands),
                GdalDataType::UInt32 => driver.create_with_band_type::<u32, _>(&path, width, height, bands),
                GdalDataType::Int32 => driver.create_with_band_type::<i32, _>(&path, width, height, bands),
                GdalDataType::Float32 => driver.create_with_band_type::<f32, _>(&path, width, height, bands),
                _ => driver.create_with_band_type::<f64, _>(&path, width, height, bands),
            }
            .context("Failed to create reprojected raster")?;

            dst.set_geo_transform(&extent.geo_transform(width, height))
                .context("Failed to set geotransform")?;
            let srs = SpatialRef::from_epsg(dst_epsg as u32)
                .with_context(|| format!("Unknown EPSG code {}", dst_epsg))?;
            dst.set_spatial_ref(&srs)
                .context("Failed to set spatial reference")?;

            for index in 1..=bands {
                let src_band = src.rasterband(index)?;
                let mut dst_band = dst.rasterband(index)?;
                if let Some(no_data) = src_band.no_data_value() {
                    dst_band
                        .set_no_data_value(Some(no_data))
                        .context("Failed to set no data value")?;
                }
                if let Some(table) = src_band.color_table() {
                    dst_band.set_color_table(&table);
                }
                let interpretation = src_band.color_interpretation();
                if let Err(e) = dst_band.set_color_interpretation(interpretation) {
                    tracing::warn!(target: "agknow", "band {}: cannot keep {:?}: {}", index, interpretation, e);
                }
            }

            gdal::raster::reproject(src, &dst)
                .with_context(|| format!("Failed to reproject EPSG:{} -> EPSG:{}", src_epsg, dst_epsg))?;
            Ok(path)
        }

        /// Georeference and reproject the raster at `raw_path`; returns the final path.
        fn georeference(
            &self,
            raw_path: &str,
            format: ImageFormat,
            bounds: Option<&BoundingBox>,
            dst_epsg: i32,
        ) -> Result<String> {
            let dataset = Dataset::open(raw_path).context("Failed to decode raster")?;
            let metadata = read_metadata(&dataset)?;
            tracing::debug!(target: "agknow", "{}: {:?}", raw_path, metadata);

            let (geocoded_path, src_epsg) = match format {
                ImageFormat::Png => {
                    let Some(bounds) = bounds else {
                        bail!("A PNG raster needs bounds to be georeferenced");
                    };
                    let path =
                        self.georeference_png(&dataset, bounds, metadata.width, metadata.height)?;
                    (path, WGS84_EPSG)
                }
                // already geocoded by the server
                ImageFormat::Tif => match metadata.epsg {
                    Some(epsg) if !metadata.projection.is_empty() => (raw_path.to_string(), epsg),
                    _ => bail!("GeoTIFF {} has no EPSG projection", raw_path),
                },
            };
            drop(dataset);

            if src_epsg == dst_epsg {
                return Ok(geocoded_path);
            }

            let geocoded =
                Dataset::open(&geocoded_path).context("Failed to open georeferenced raster")?;
            let warped = self.reproject(&geocoded, src_epsg, dst_epsg);
            drop(geocoded);
            if geocoded_path != raw_path {
                unlink(&geocoded_path);
            }
            warped
        }
    }

    fn unlink(path: &str) {
        if let Err(e) = gdal::vsi::unlink_mem_file(path) {
            tracing::debug!(target: "agknow", "could not unlink {}: {}", path, e);
        }
    }

    impl Georeferencer for GdalPipeline {
        fn materialize(
            &self,
            bytes: Vec<u8>,
            format: ImageFormat,
            bounds: Option<&BoundingBox>,
            dst_epsg: i32,
        ) -> Result<MemRaster> {
            let raw_path = vsimem_path(format.extension());
            gdal::vsi::create_mem_file(&raw_path, bytes)
                .with_context(|| format!("Failed to write {}", raw_path))?;

            let result = self.georeference(&raw_path, format, bounds, dst_epsg);

            match result {
                Ok(path) => {
                    if path != raw_path {
                        unlink(&raw_path);
                    }
                    Ok(MemRaster::new(path))
                }
                Err(e) => {
                    unlink(&raw_path);
                    Err(e)
                }
            }
        }
    }

    /// Write an in-memory raster to disk and release the in-memory copy.
    ///
    /// `.tif` is written tiled and deflate-compressed, `.png` as is.
    pub fn export(raster: &MemRaster, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let mut options = CslStringList::new();
        let driver_name = match extension.as_str() {
            "tif" | "tiff" => {
                options.set_name_value("TILED", "YES")?;
                options.set_name_value("COMPRESS", "DEFLATE")?;
                "GTiff"
            }
            "png" => "PNG",
            _ => bail!("Unsupported export format: {:?}", path),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
            }
        }

        {
            let dataset = Dataset::open(raster.path())
                .with_context(|| format!("Failed to open {}", raster))?;
            let driver = DriverManager::get_driver_by_name(driver_name)
                .with_context(|| format!("Failed to get {} driver", driver_name))?;
            // closed, and flushed, at the end of the scope
            let _out = dataset
                .create_copy(&driver, path, &options)
                .with_context(|| format!("Failed to write {:?}", path))?;
        }

        raster.clone().release()?;
        tracing::info!(target: "agknow", "raster saved to {:?}", path);
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::geometric::georeference::Georeferencer;
        use gdal::raster::{Buffer, ColorInterpretation};

        /// PNG bytes of a small gradient, produced through GDAL.
        fn png_bytes(width: usize, height: usize) -> Vec<u8> {
            let tif = vsimem_path("tif");
            let png = vsimem_path("png");
            {
                let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
                let dataset = driver
                    .create_with_band_type::<u8, _>(&tif, width, height, 1)
                    .unwrap();
                let data: Vec<u8> = (0..width * height).map(|i| (i % 251) as u8).collect();
                let mut buffer = Buffer::new((width, height), data);
                dataset
                    .rasterband(1)
                    .unwrap()
                    .write((0, 0), (width, height), &mut buffer)
                    .unwrap();
                let png_driver = DriverManager::get_driver_by_name("PNG").unwrap();
                dataset
                    .create_copy(&png_driver, &png, &CslStringList::new())
                    .unwrap();
            }
            let bytes = gdal::vsi::get_vsi_mem_file_bytes_owned(&png).unwrap();
            gdal::vsi::unlink_mem_file(&tif).unwrap();
            gdal::vsi::unlink_mem_file(&png).unwrap();
            bytes
        }

        /// RGBA PNG bytes, fully opaque except for the first row.
        fn rgba_png_bytes(width: usize, height: usize) -> Vec<u8> {
            let tif = vsimem_path("tif");
            let png = vsimem_path("png");
            {
                let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
                let dataset = driver
                    .create_with_band_type::<u8, _>(&tif, width, height, 4)
                    .unwrap();
                for index in 1..=4 {
                    let data: Vec<u8> = (0..width * height)
                        .map(|i| match index {
                            4 if i < width => 0,
                            4 => 255,
                            _ => (i * index % 251) as u8,
                        })
                        .collect();
                    let mut buffer = Buffer::new((width, height), data);
                    dataset
                        .rasterband(index)
                        .unwrap()
                        .write((0, 0), (width, height), &mut buffer)
                        .unwrap();
                }
                let png_driver = DriverManager::get_driver_by_name("PNG").unwrap();
                dataset
                    .create_copy(&png_driver, &png, &CslStringList::new())
                    .unwrap();
            }
            let bytes = gdal::vsi::get_vsi_mem_file_bytes_owned(&png).unwrap();
            gdal::vsi::unlink_mem_file(&tif).unwrap();
            gdal::vsi::unlink_mem_file(&png).unwrap();
            bytes
        }

        /// GeoTIFF bytes over the test bounds, in `epsg` when given.
        fn geotiff_bytes(epsg: Option<u32>) -> Vec<u8> {
            let tif = vsimem_path("tif");
            {
                let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
                let mut dataset = driver
                    .create_with_band_type::<f32, _>(&tif, 30, 20, 1)
                    .unwrap();
                dataset
                    .set_geo_transform(&bounds().geo_transform(30, 20))
                    .unwrap();
                if let Some(epsg) = epsg {
                    dataset
                        .set_spatial_ref(&SpatialRef::from_epsg(epsg).unwrap())
                        .unwrap();
                }
                let data: Vec<f32> = (0..600).map(|i| i as f32 / 600.0).collect();
                let mut buffer = Buffer::new((30, 20), data);
                dataset
                    .rasterband(1)
                    .unwrap()
                    .write((0, 0), (30, 20), &mut buffer)
                    .unwrap();
            }
            let bytes = gdal::vsi::get_vsi_mem_file_bytes_owned(&tif).unwrap();
            gdal::vsi::unlink_mem_file(&tif).unwrap();
            bytes
        }

        fn bounds() -> BoundingBox {
            BoundingBox::from([[45.34, 10.61], [45.36, 10.64]])
        }

        #[test]
        fn test_png_is_georeferenced_in_wgs84() {
            let raster = GdalPipeline::new()
                .materialize(png_bytes(30, 20), ImageFormat::Png, Some(&bounds()), 4326)
                .unwrap();
            {
                let dataset = Dataset::open(raster.path()).unwrap();
                let metadata = read_metadata(&dataset).unwrap();
                assert_eq!((metadata.width, metadata.height), (30, 20));
                assert_eq!(metadata.epsg, Some(4326));
                let gt = metadata.geo_transform.unwrap();
                assert!((gt[0] - 10.61).abs() < 1e-9);
                assert!((gt[3] - 45.36).abs() < 1e-9);
                assert!((gt[1] - 0.03 / 30.0).abs() < 1e-9);
                assert!((gt[5] + 0.02 / 20.0).abs() < 1e-9);
            }
            raster.release().unwrap();
        }

        #[test]
        fn test_png_is_reprojected() {
            let raster = GdalPipeline::new()
                .materialize(png_bytes(30, 20), ImageFormat::Png, Some(&bounds()), 3857)
                .unwrap();
            {
                let dataset = Dataset::open(raster.path()).unwrap();
                let metadata = read_metadata(&dataset).unwrap();
                assert_eq!(metadata.epsg, Some(3857));
                assert_eq!((metadata.width, metadata.height), (30, 20));
                assert!(metadata.geo_transform.unwrap()[0] > 1_000_000.0);
            }
            raster.release().unwrap();
        }

        #[test]
        fn test_reprojected_png_keeps_alpha() {
            let raster = GdalPipeline::new()
                .materialize(rgba_png_bytes(30, 20), ImageFormat::Png, Some(&bounds()), 3857)
                .unwrap();
            {
                let dataset = Dataset::open(raster.path()).unwrap();
                assert_eq!(dataset.raster_count(), 4);
                assert_eq!(
                    dataset.rasterband(4).unwrap().color_interpretation(),
                    ColorInterpretation::AlphaBand
                );
            }
            raster.release().unwrap();
        }

        #[test]
        fn test_geotiff_in_working_crs_is_kept() {
            let raster = GdalPipeline::new()
                .materialize(geotiff_bytes(Some(4326)), ImageFormat::Tif, None, 4326)
                .unwrap();
            {
                let dataset = Dataset::open(raster.path()).unwrap();
                let metadata = read_metadata(&dataset).unwrap();
                assert_eq!(metadata.epsg, Some(4326));
                assert_eq!(metadata.data_type, "Float32");
                let gt = metadata.geo_transform.unwrap();
                assert!((gt[0] - 10.61).abs() < 1e-9);
                assert!((gt[3] - 45.36).abs() < 1e-9);
            }
            raster.release().unwrap();
        }

        #[test]
        fn test_geotiff_is_reprojected() {
            let raster = GdalPipeline::new()
                .materialize(geotiff_bytes(Some(4326)), ImageFormat::Tif, None, 3857)
                .unwrap();
            {
                let dataset = Dataset::open(raster.path()).unwrap();
                let metadata = read_metadata(&dataset).unwrap();
                assert_eq!(metadata.epsg, Some(3857));
                assert_eq!((metadata.width, metadata.height), (30, 20));
                let gt = metadata.geo_transform.unwrap();
                // 10.61E, 45.36N in web mercator
                assert!((gt[0] - 1_181_100.0).abs() < 1_000.0);
                assert!((gt[3] - 5_678_375.0).abs() < 1_000.0);
            }
            raster.release().unwrap();
        }

        #[test]
        fn test_geotiff_without_projection_fails() {
            let result =
                GdalPipeline::new().materialize(geotiff_bytes(None), ImageFormat::Tif, None, 4326);
            assert!(result.is_err());
        }

        #[test]
        fn test_undecodable_bytes_fail() {
            let result = GdalPipeline::new().materialize(
                b"<html>not an image</html>".to_vec(),
                ImageFormat::Png,
                Some(&bounds()),
                4326,
            );
            assert!(result.is_err());
        }

        #[test]
        fn test_png_without_bounds_fails() {
            let result =
                GdalPipeline::new().materialize(png_bytes(4, 4), ImageFormat::Png, None, 4326);
            assert!(result.is_err());
        }

        #[test]
        fn test_export_to_tif() {
            let raster = GdalPipeline::new()
                .materialize(png_bytes(16, 16), ImageFormat::Png, Some(&bounds()), 4326)
                .unwrap();
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("ndvi.tif");
            export(&raster, &out).unwrap();

            let dataset = Dataset::open(&out).unwrap();
            assert_eq!(dataset.raster_size(), (16, 16));
            assert!(Dataset::open(raster.path()).is_err());
        }

        #[test]
        fn test_export_rejects_unknown_extension() {
            let raster = MemRaster::new(vsimem_path("tif"));
            let dir = tempfile::tempdir().unwrap();
            assert!(export(&raster, &dir.path().join("out.jpg")).is_err());
        }
    }
}
