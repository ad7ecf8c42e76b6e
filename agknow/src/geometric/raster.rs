use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::commons::error::AgknowError;
use crate::geo_core::BoundingBox;
use crate::geometric::georeference::MemRaster;

/// Imagery products served per parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Visible,
    Vitality,
    Variations,
    Reflectances,
    Ndvi,
    Ndre1,
    Ndre2,
    Ndre3,
    Ndwi,
    Savi,
    Evi2,
    Cire,
}

impl Product {
    pub const ALL: [Product; 12] = [
        Product::Visible,
        Product::Vitality,
        Product::Variations,
        Product::Reflectances,
        Product::Ndvi,
        Product::Ndre1,
        Product::Ndre2,
        Product::Ndre3,
        Product::Ndwi,
        Product::Savi,
        Product::Evi2,
        Product::Cire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Visible => "visible",
            Product::Vitality => "vitality",
            Product::Variations => "variations",
            Product::Reflectances => "reflectances",
            Product::Ndvi => "ndvi",
            Product::Ndre1 => "ndre1",
            Product::Ndre2 => "ndre2",
            Product::Ndre3 => "ndre3",
            Product::Ndwi => "ndwi",
            Product::Savi => "savi",
            Product::Evi2 => "evi2",
            Product::Cire => "cire",
        }
    }

    /// Format actually requested from the server: reflectances only exist as GeoTIFF.
    pub fn fetch_format(&self, requested: ImageFormat) -> ImageFormat {
        match self {
            Product::Reflectances => ImageFormat::Tif,
            _ => requested,
        }
    }

    /// Format the product is pinned to, if any.
    pub fn frozen_format(&self) -> Option<ImageFormat> {
        match self {
            Product::Reflectances => Some(ImageFormat::Tif),
            Product::Visible => Some(ImageFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Product {
    type Err = AgknowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Product::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| AgknowError::UnknownProduct(s.to_string()))
    }
}

/// Satellite platform the imagery originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Landsat8,
    Sentinel2,
}

impl DataSource {
    pub const ALL: [DataSource; 2] = [DataSource::Landsat8, DataSource::Sentinel2];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Landsat8 => "landsat8",
            DataSource::Sentinel2 => "sentinel2",
        }
    }

    pub fn products(&self) -> &'static [Product] {
        const LANDSAT8: [Product; 3] = [Product::Visible, Product::Vitality, Product::Variations];
        match self {
            DataSource::Landsat8 => &LANDSAT8,
            DataSource::Sentinel2 => &Product::ALL,
        }
    }

    pub fn supports(&self, product: Product) -> bool {
        self.products().contains(&product)
    }

    /// Fail with [`AgknowError::IncompatibleProduct`] unless `product` is served by this source.
    pub fn check(&self, product: Product) -> Result<(), AgknowError> {
        if self.supports(product) {
            Ok(())
        } else {
            Err(AgknowError::IncompatibleProduct {
                product: product.to_string(),
                source: self.to_string(),
            })
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = AgknowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "landsat8" => Ok(DataSource::Landsat8),
            "sentinel2" => Ok(DataSource::Sentinel2),
            _ => Err(AgknowError::UnknownDataSource(s.to_string())),
        }
    }
}

/// Image encodings offered by the raster endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Visual preview, no embedded georeference
    Png,
    /// GeoTIFF, georeferenced by the server
    Tif,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Tif => "tif",
        }
    }

    pub fn is_georeferenced(&self) -> bool {
        matches!(self, ImageFormat::Tif)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = AgknowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "tif" | "tiff" => Ok(ImageFormat::Tif),
            _ => Err(AgknowError::UnknownImageFormat(s.to_string())),
        }
    }
}

/// Cache key of a set of downloaded rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterGroupKey {
    pub parcel_id: i64,
    pub product: Product,
    pub source: DataSource,
    pub format: ImageFormat,
}

impl RasterGroupKey {
    pub fn new(parcel_id: i64, product: Product, source: DataSource, format: ImageFormat) -> Self {
        RasterGroupKey {
            parcel_id,
            product,
            source,
            format,
        }
    }
}

impl fmt::Display for RasterGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.parcel_id, self.product, self.source, self.format
        )
    }
}

/// One entry of the raster listing endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RasterRecord {
    pub raster_id: i64,
    pub date: String,
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A raster of one parcel and, once downloaded, its in-memory resource.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDescriptor {
    pub parcel_id: i64,
    pub product: Product,
    pub source: DataSource,
    pub raster_id: i64,
    /// Acquisition date as delivered, usually `YYYY-MM-DD`
    pub date: String,
    pub format: ImageFormat,
    pub bounds: Option<BoundingBox>,
    pub extra: Map<String, Value>,
    pub resource: Option<MemRaster>,
}

impl RasterDescriptor {
    pub fn from_record(key: &RasterGroupKey, record: RasterRecord) -> Self {
        RasterDescriptor {
            parcel_id: key.parcel_id,
            product: key.product,
            source: key.source,
            raster_id: record.raster_id,
            date: record.date,
            format: key.product.fetch_format(key.format),
            bounds: record.bounds,
            extra: record.extra,
            resource: None,
        }
    }

    pub fn group_key(&self) -> RasterGroupKey {
        RasterGroupKey::new(self.parcel_id, self.product, self.source, self.format)
    }

    /// Calendar date of the acquisition; the time part, if any, is ignored.
    pub fn acquisition_date(&self) -> Option<NaiveDate> {
        let day = self.date.get(..10).unwrap_or(&self.date);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    /// `"{product}|{date}|{raster_id}|{source}"`
    pub fn layer_name(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.product, self.date, self.raster_id, self.source
        )
    }
}
