use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use geo::Geometry;
use geojson::{Feature, FeatureCollection, GeoJson};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::collect::global_variables::WGS84_EPSG;
use crate::commons::error::AgknowError;
use crate::geo_core::{parse_wkt, to_wkt_upper, transform_geometry};

/// Entry of the parcel listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelSummary {
    pub parcel_id: i64,
    #[serde(default)]
    pub name: String,
}

impl ParcelSummary {
    /// Selector label, `"{parcel_id} - {name}"`
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParcelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.parcel_id, self.name)
    }
}

/// A parcel with its geometry in the working coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub parcel_id: i64,
    pub name: String,
    pub entity: Option<String>,
    pub crop: Option<String>,
    pub startdate: Option<String>,
    pub enddate: Option<String>,
    pub planting: Option<String>,
    pub harvest: Option<String>,
    pub area: Option<f64>,
    /// API key the parcel was fetched with
    pub apikey: String,
    /// Host name of the API the parcel was fetched from
    pub host: String,
    pub geometry: Geometry<f64>,
    pub epsg: i32,
    /// Every non-geometry attribute returned by the API
    pub attributes: Map<String, Value>,
}

fn attr_string(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    match attributes.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

impl Parcel {
    /// Build a parcel from detail attributes and its WGS84 WKT geometry,
    /// reprojected to `epsg`.
    pub fn from_detail(
        attributes: Map<String, Value>,
        wkt: &str,
        epsg: i32,
    ) -> Result<Parcel, AgknowError> {
        let parcel_id = attributes
            .get("parcel_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AgknowError::InvalidResponse("parcel detail without parcel_id".into()))?;
        let geometry = transform_geometry(&parse_wkt(wkt)?, WGS84_EPSG, epsg)?;

        Ok(Parcel {
            parcel_id,
            name: attr_string(&attributes, "name").unwrap_or_default(),
            entity: attr_string(&attributes, "entity"),
            crop: attr_string(&attributes, "crop"),
            startdate: attr_string(&attributes, "startdate"),
            enddate: attr_string(&attributes, "enddate"),
            planting: attr_string(&attributes, "planting"),
            harvest: attr_string(&attributes, "harvest"),
            area: attributes.get("area").and_then(Value::as_f64),
            apikey: attr_string(&attributes, "apikey").unwrap_or_default(),
            host: attr_string(&attributes, "host").unwrap_or_default(),
            geometry,
            epsg,
            attributes,
        })
    }

    pub fn summary(&self) -> ParcelSummary {
        ParcelSummary {
            parcel_id: self.parcel_id,
            name: self.name.clone(),
        }
    }

    fn to_feature(&self) -> Feature {
        let mut properties = self.attributes.clone();
        properties.insert("parcel_id".into(), Value::from(self.parcel_id));
        properties.insert("apikey".into(), Value::String(self.apikey.clone()));
        properties.insert("host".into(), Value::String(self.host.clone()));

        let mut feature = Feature::from(geojson::Geometry::new(geojson::Value::from(
            &self.geometry,
        )));
        feature.id = Some(geojson::feature::Id::Number(self.parcel_id.into()));
        feature.properties = Some(properties);
        feature
    }
}

/// Parcels known to a session, keyed by id.
///
/// The key set doubles as the membership set used to avoid adding a parcel twice.
#[derive(Debug, Clone, Default)]
pub struct ParcelLayer {
    pub epsg: i32,
    parcels: BTreeMap<i64, Parcel>,
}

impl ParcelLayer {
    pub fn new(epsg: i32) -> Self {
        ParcelLayer {
            epsg,
            parcels: BTreeMap::new(),
        }
    }

    pub fn contains(&self, parcel_id: i64) -> bool {
        self.parcels.contains_key(&parcel_id)
    }

    /// Insert or replace a parcel. Returns `true` when the id was new.
    pub fn upsert(&mut self, parcel: Parcel) -> bool {
        self.parcels.insert(parcel.parcel_id, parcel).is_none()
    }

    pub fn get(&self, parcel_id: i64) -> Option<&Parcel> {
        self.parcels.get(&parcel_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.parcels.keys().copied().collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.parcels.values().map(|p| p.summary().label()).collect()
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parcel> {
        self.parcels.values()
    }

    pub fn clear(&mut self) {
        self.parcels.clear();
    }

    pub fn to_geojson(&self) -> GeoJson {
        GeoJson::from(FeatureCollection {
            bbox: None,
            foreign_members: None,
            features: self.parcels.values().map(Parcel::to_feature).collect(),
        })
    }

    /// Save the layer as a GeoJSON file
    pub fn save_geojson(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_geojson().to_string())
            .with_context(|| format!("Failed to write GeoJSON file: {:?}", path))?;
        tracing::info!(target: "agknow", "{} parcels saved to {:?}", self.len(), path);
        Ok(())
    }
}

/// Attributes of a parcel to register, geometry as WKT in `geometry_epsg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelRegistration {
    pub crop: String,
    pub name: String,
    pub entity: String,
    pub planting: String,
    pub harvest: String,
    pub geometry_wkt: String,
    pub geometry_epsg: i32,
}

impl ParcelRegistration {
    /// JSON body of the registration request, geometry as upper-case WKT in WGS84.
    pub fn post_body(&self) -> Result<String, AgknowError> {
        let geometry = parse_wkt(&self.geometry_wkt)?;
        let wgs84 = transform_geometry(&geometry, self.geometry_epsg, WGS84_EPSG)?;
        let body = serde_json::json!({
            "crop": self.crop,
            "name": self.name,
            "entity": self.entity,
            "planting": self.planting,
            "harvest": self.harvest,
            "geometry": to_wkt_upper(&wgs84),
        });
        Ok(body.to_string())
    }
}
