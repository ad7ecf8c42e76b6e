use geo::{Coord, Geometry, MapCoords};
use proj::Proj;
use serde::{Deserialize, Serialize};
use wkt::{ToWkt, TryFromWkt};

use crate::collect::global_variables::WGS84_EPSG;
use crate::commons::error::{AgknowError, Result};

/// GDAL-style affine transform:
/// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`
pub type GeoTransform = [f64; 6];

/// Coordinate reference system handling for one working EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoCore {
    /// EPSG code of the working coordinate system
    pub epsg: i32,
}

impl Default for GeoCore {
    fn default() -> Self {
        GeoCore::new(WGS84_EPSG)
    }
}

impl GeoCore {
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg }
    }

    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    pub fn set_epsg(&mut self, epsg: i32) {
        self.epsg = epsg;
    }

    /// Build a transformation between two EPSG codes.
    ///
    /// Both codes must be positive; PROJ must know them.
    pub fn projection(from_epsg: i32, to_epsg: i32) -> Result<Proj> {
        if from_epsg <= 0 || to_epsg <= 0 {
            return Err(AgknowError::NotTransformable {
                src_epsg: from_epsg,
                dst_epsg: to_epsg,
                reason: "EPSG codes must be positive integers".to_string(),
            });
        }
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        Proj::new_known_crs(&from_crs, &to_crs, None).map_err(|e| AgknowError::NotTransformable {
            src_epsg: from_epsg,
            dst_epsg: to_epsg,
            reason: format!("Failed to create Proj transformation: {}", e),
        })
    }

    /// Transform coordinates from one CRS to another
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        let proj = Self::projection(from_epsg, to_epsg)?;
        convert(&proj, from_epsg, to_epsg, Coord { x, y }).map(|c| (c.x, c.y))
    }
}

fn convert(proj: &Proj, src_epsg: i32, dst_epsg: i32, c: Coord<f64>) -> Result<Coord<f64>> {
    let (x, y) = proj
        .convert((c.x, c.y))
        .map_err(|e| AgknowError::NotTransformable {
            src_epsg,
            dst_epsg,
            reason: format!("Projection failed: {}", e),
        })?;
    if !x.is_finite() || !y.is_finite() {
        return Err(AgknowError::NotTransformable {
            src_epsg,
            dst_epsg,
            reason: format!("({}, {}) is outside the projection domain", c.x, c.y),
        });
    }
    Ok(Coord { x, y })
}

/// Reproject any geometry between two EPSG codes.
///
/// Equal codes return a copy. Invalid codes and coordinates PROJ cannot
/// transform are reported as [`AgknowError::NotTransformable`].
pub fn transform_geometry(
    geometry: &Geometry<f64>,
    src_epsg: i32,
    dst_epsg: i32,
) -> Result<Geometry<f64>> {
    let proj = GeoCore::projection(src_epsg, dst_epsg)?;
    if src_epsg == dst_epsg {
        return Ok(geometry.clone());
    }
    let proj = &proj;
    geometry.try_map_coords(|c| convert(proj, src_epsg, dst_epsg, c))
}

/// Parse well-known text into a geometry.
pub fn parse_wkt(wkt: &str) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from_wkt_str(wkt.trim())
        .map_err(|e| AgknowError::InvalidGeometry(format!("{}", e)))
}

/// Well-known text in upper case, as the registration endpoint expects.
pub fn to_wkt_upper(geometry: &Geometry<f64>) -> String {
    geometry.wkt_string().to_uppercase()
}

/// Bounding box structure
///
/// On the wire raster bounds are `[[minLat, minLon], [maxLat, maxLon]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 2]; 2]", into = "[[f64; 2]; 2]")]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl From<[[f64; 2]; 2]> for BoundingBox {
    fn from(corners: [[f64; 2]; 2]) -> Self {
        let [[min_lat, min_lon], [max_lat, max_lon]] = corners;
        BoundingBox::new(min_lon, min_lat, max_lon, max_lat)
    }
}

impl From<BoundingBox> for [[f64; 2]; 2] {
    fn from(bbox: BoundingBox) -> Self {
        [[bbox.min_y, bbox.min_x], [bbox.max_y, bbox.max_x]]
    }
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Geotransform placing a `width` x `height` pixel image on this box.
    ///
    /// Origin is the upper-left corner `(min_x, max_y)`; the row pixel size is
    /// negative because image rows run top to bottom while y grows upward.
    pub fn geo_transform(&self, width: usize, height: usize) -> GeoTransform {
        let pixel_width = (self.max_x - self.min_x) / width as f64;
        let pixel_height = (self.max_y - self.min_y) / height as f64;
        [self.min_x, pixel_width, 0.0, self.max_y, 0.0, -pixel_height]
    }

    /// Bounding box covered by a raster of the given size and geotransform.
    pub fn from_geo_transform(gt: &GeoTransform, width: usize, height: usize) -> Self {
        let x0 = gt[0];
        let y0 = gt[3];
        let x1 = gt[0] + gt[1] * width as f64 + gt[2] * height as f64;
        let y1 = gt[3] + gt[4] * width as f64 + gt[5] * height as f64;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Transform bounding box to another CRS
    ///
    /// Edges are densified so curved projections of straight edges are
    /// still enclosed.
    pub fn transform(&self, from_epsg: i32, to_epsg: i32) -> Result<Self> {
        const STEPS: usize = 20;
        let proj = GeoCore::projection(from_epsg, to_epsg)?;
        if from_epsg == to_epsg {
            return Ok(*self);
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for i in 0..=STEPS {
            let t = i as f64 / STEPS as f64;
            let x = self.min_x + self.width() * t;
            let y = self.min_y + self.height() * t;
            for c in [
                Coord { x, y: self.min_y },
                Coord { x, y: self.max_y },
                Coord { x: self.min_x, y },
                Coord { x: self.max_x, y },
            ] {
                let p = convert(&proj, from_epsg, to_epsg, c)?;
                min_x = min_x.min(p.x);
                min_y = min_y.min(p.y);
                max_x = max_x.max(p.x);
                max_y = max_y.max(p.y);
            }
        }

        Ok(BoundingBox::new(min_x, min_y, max_x, max_y))
    }
}
