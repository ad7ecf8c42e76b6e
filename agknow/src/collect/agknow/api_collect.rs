use std::sync::Arc;

use serde_json::{Map, Value};

use super::responses::{self, ParcelListing, RegistrationOutcome};
use super::ApiVersion;
use crate::collect::global_variables::{SHORT_TIMEOUT, LONG_TIMEOUT};
use crate::collect::http::{HttpClient, ReqwestClient};
use crate::commons::config::Settings;
use crate::commons::error::{AgknowError, Result};
use crate::geo_core::BoundingBox;
use crate::geometric::parcel::ParcelRegistration;
use crate::geometric::raster::{DataSource, ImageFormat, Product, RasterRecord};

/// Client of the parcel and raster endpoints of one API deployment.
///
/// Every call is a single blocking request and must only be made from a
/// background task.
#[derive(Clone)]
pub struct AgknowCollect {
    /// Host followed by the version path, e.g. `https://geocledian.com/agknow/api/v3`
    pub base_url: String,
    pub api_key: String,
    pub version: ApiVersion,
    client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for AgknowCollect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgknowCollect")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl AgknowCollect {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        version: ApiVersion,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        AgknowCollect {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            version,
            client,
        }
    }

    /// Build a client with a reqwest transport from the settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let version = settings.api_version()?;
        let client = ReqwestClient::new(settings.ssl_verify)?;
        Ok(AgknowCollect::new(
            settings.base_url()?,
            settings.api_key.clone(),
            version,
            Arc::new(client),
        ))
    }

    /// Host name of the API, stored on every parcel.
    pub fn host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = format!(
            "{}{}?key={}",
            self.base_url,
            path,
            urlencoding::encode(&self.api_key)
        );
        for (name, value) in query {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    fn get_content(&self, url: &str, timeout: std::time::Duration) -> Result<Value> {
        let response = self.client.get(url, timeout)?;
        responses::content(self.version, url, &response)
    }

    /// One page of parcels. Paging is left to the caller.
    pub fn list_parcels(&self, limit: u32, offset: u32) -> Result<ParcelListing> {
        let url = self.url(
            "/parcels/",
            &[("limit", limit.to_string()), ("offset", offset.to_string())],
        );
        let response = self.client.get(&url, LONG_TIMEOUT)?;
        responses::parcel_listing(self.version, &url, &response)
    }

    /// Attributes and WGS84 WKT geometry of one parcel.
    ///
    /// `geometry` and `centroid` are removed from the attributes; `apikey` and
    /// `host` are added.
    pub fn get_parcel_detail(&self, parcel_id: i64) -> Result<(Map<String, Value>, String)> {
        let url = self.url(
            &format!("/parcels/{}/", parcel_id),
            &[("geoformat", "WKT".to_string())],
        );
        let content = self.get_content(&url, LONG_TIMEOUT)?;
        let mut attributes = responses::detail_record(self.version, content)?;

        let wkt = match attributes.remove("geometry") {
            Some(Value::String(wkt)) => wkt,
            _ => {
                return Err(AgknowError::InvalidResponse(format!(
                    "parcel {} has no WKT geometry",
                    parcel_id
                )))
            }
        };
        attributes.remove("centroid");
        attributes.insert("apikey".into(), Value::String(self.api_key.clone()));
        attributes.insert("host".into(), Value::String(self.host()));

        Ok((attributes, wkt))
    }

    /// Rasters available for a parcel, product and data source.
    pub fn list_rasters(
        &self,
        parcel_id: i64,
        product: Product,
        source: DataSource,
    ) -> Result<Vec<RasterRecord>> {
        source.check(product)?;
        let url = self.url(
            &format!("/parcels/{}/{}/", parcel_id, product),
            &[("source", source.to_string())],
        );
        match self.get_content(&url, SHORT_TIMEOUT)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(AgknowError::from))
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(AgknowError::InvalidResponse(format!(
                "unexpected raster listing: {}",
                other
            ))),
        }
    }

    /// Bounds of the first raster of a product; all rasters of a parcel share them.
    pub fn get_raster_bbox(&self, parcel_id: i64, product: Product) -> Result<BoundingBox> {
        let url = self.url(&format!("/parcels/{}/{}/", parcel_id, product), &[]);
        let content = self.get_content(&url, SHORT_TIMEOUT)?;
        let bounds = content
            .get(0)
            .and_then(|first| first.get("bounds"))
            .cloned()
            .ok_or_else(|| {
                AgknowError::InvalidResponse(format!(
                    "no raster bounds for parcel {} and {}",
                    parcel_id, product
                ))
            })?;
        Ok(serde_json::from_value(bounds)?)
    }

    /// Raw image bytes. Reflectances are always requested as GeoTIFF.
    pub fn fetch_raster_bytes(
        &self,
        parcel_id: i64,
        product: Product,
        source: DataSource,
        raster_id: i64,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let format = product.fetch_format(format);
        let url = self.url(
            &format!(
                "/parcels/{}/{}/{}/{}.{}",
                parcel_id,
                product,
                source,
                raster_id,
                format.extension()
            ),
            &[],
        );
        let response = self.client.get(&url, SHORT_TIMEOUT)?;
        if response.is_ok() {
            return Ok(response.body);
        }
        // error bodies are JSON on v4
        if self.version == ApiVersion::V4 {
            if let Some(message) = serde_json::from_slice::<Value>(&response.body)
                .ok()
                .as_ref()
                .and_then(responses::v4_error_message)
            {
                return Err(AgknowError::Application(message));
            }
        }
        Err(AgknowError::HttpStatus {
            url: crate::collect::http::redact_key(&url),
            status: response.status,
            body: response.text(),
        })
    }

    /// Register a new parcel; its geometry is sent as WGS84 WKT.
    pub fn register_parcel(&self, registration: &ParcelRegistration) -> Result<RegistrationOutcome> {
        let body = registration.post_body()?;
        let url = self.url("/parcels/", &[]);
        let response = self.client.post_json(&url, &body, LONG_TIMEOUT)?;
        responses::registration(self.version, &url, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::http::tests::MockHttpClient;

    const BASE: &str = "https://geocledian.test/agknow/api/v3";

    fn collect(mock: MockHttpClient, version: ApiVersion) -> (AgknowCollect, Arc<MockHttpClient>) {
        let mock = Arc::new(mock);
        let base = match version {
            ApiVersion::V3 => BASE.to_string(),
            ApiVersion::V4 => BASE.replace("v3", "v4"),
        };
        (
            AgknowCollect::new(base, "secret key", version, mock.clone()),
            mock,
        )
    }

    #[test]
    fn test_list_parcels_url() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v3/parcels/",
            200,
            r#"{"content":[{"parcel_id":5,"name":"East"}]}"#,
        );
        let (api, mock) = collect(mock, ApiVersion::V3);
        let listing = api.list_parcels(1000, 0).unwrap();
        assert!(matches!(listing, ParcelListing::Parcels(ref p) if p.len() == 1));
        assert_eq!(
            mock.requested_urls(),
            vec![format!("{}/parcels/?key=secret%20key&limit=1000&offset=0", BASE)]
        );
    }

    #[test]
    fn test_parcel_requests_use_long_timeout() {
        let mock = MockHttpClient::new()
            .with("/agknow/api/v3/parcels/", 200, r#"{"content":[]}"#)
            .with(
                "/agknow/api/v3/parcels/5/",
                200,
                r#"{"content":[{"parcel_id":5,"geometry":"POINT(1 2)"}]}"#,
            )
            .with("/agknow/api/v3/parcels/5/ndvi/", 200, r#"{"content":[]}"#);
        let (api, mock) = collect(mock, ApiVersion::V3);
        api.list_parcels(10, 0).unwrap();
        api.get_parcel_detail(5).unwrap();
        api.list_rasters(5, Product::Ndvi, DataSource::Sentinel2).unwrap();

        assert_eq!(
            *mock.timeouts.lock().unwrap(),
            vec![LONG_TIMEOUT, LONG_TIMEOUT, SHORT_TIMEOUT]
        );
    }

    #[test]
    fn test_parcel_detail_v3() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v3/parcels/5/",
            200,
            r#"{"content":[{"parcel_id":5,"name":"East","crop":"wheat",
                "geometry":"POLYGON((0 0,1 0,1 1,0 0))","centroid":"POINT(0.6 0.3)"}]}"#,
        );
        let (api, mock) = collect(mock, ApiVersion::V3);
        let (attributes, wkt) = api.get_parcel_detail(5).unwrap();

        assert!(wkt.starts_with("POLYGON"));
        assert!(!attributes.contains_key("geometry"));
        assert!(!attributes.contains_key("centroid"));
        assert_eq!(attributes["apikey"], "secret key");
        assert_eq!(attributes["host"], "geocledian.test");
        assert!(mock.requested_urls()[0].ends_with("&geoformat=WKT"));
    }

    #[test]
    fn test_parcel_detail_v4() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v4/parcels/5/",
            200,
            r#"{"content":{"parcel_id":5,"name":"East","geometry":"POINT(1 2)"}}"#,
        );
        let (api, _) = collect(mock, ApiVersion::V4);
        let (attributes, wkt) = api.get_parcel_detail(5).unwrap();
        assert_eq!(wkt, "POINT(1 2)");
        assert_eq!(attributes["parcel_id"], 5);
    }

    #[test]
    fn test_list_rasters_and_bbox() {
        let listing = r#"{"content":[
            {"raster_id":11,"date":"2018-06-01","bounds":[[45.34,10.61],[45.36,10.64]]},
            {"raster_id":12,"date":"2018-06-11","bounds":[[45.34,10.61],[45.36,10.64]]}]}"#;
        let mock = MockHttpClient::new().with("/agknow/api/v3/parcels/5/ndvi/", 200, listing);
        let (api, _) = collect(mock, ApiVersion::V3);

        let rasters = api
            .list_rasters(5, Product::Ndvi, DataSource::Sentinel2)
            .unwrap();
        assert_eq!(rasters.len(), 2);
        assert_eq!(rasters[1].raster_id, 12);

        let bbox = api.get_raster_bbox(5, Product::Ndvi).unwrap();
        assert_eq!(bbox.min_y, 45.34);
        assert_eq!(bbox.max_x, 10.64);
    }

    #[test]
    fn test_incompatible_product_is_not_requested() {
        let (api, mock) = collect(MockHttpClient::new(), ApiVersion::V3);
        assert!(matches!(
            api.list_rasters(5, Product::Ndvi, DataSource::Landsat8),
            Err(AgknowError::IncompatibleProduct { .. })
        ));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn test_fetch_reflectances_forces_tif() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v3/parcels/5/reflectances/sentinel2/11.tif",
            200,
            vec![0x49, 0x49, 0x2a, 0x00],
        );
        let (api, _) = collect(mock, ApiVersion::V3);
        let bytes = api
            .fetch_raster_bytes(
                5,
                Product::Reflectances,
                DataSource::Sentinel2,
                11,
                ImageFormat::Png,
            )
            .unwrap();
        assert_eq!(bytes, vec![0x49, 0x49, 0x2a, 0x00]);
    }

    #[test]
    fn test_fetch_missing_raster() {
        let (api, _) = collect(MockHttpClient::new(), ApiVersion::V3);
        let result =
            api.fetch_raster_bytes(5, Product::Ndvi, DataSource::Sentinel2, 1, ImageFormat::Png);
        assert!(matches!(
            result,
            Err(AgknowError::HttpStatus { status: 404, .. })
        ));
    }

    #[test]
    fn test_transport_error_propagates() {
        let mock = MockHttpClient::new().with_transport_error("/agknow/api/v3/parcels/");
        let (api, _) = collect(mock, ApiVersion::V3);
        assert!(matches!(
            api.list_parcels(10, 0),
            Err(AgknowError::Transport { .. })
        ));
    }

    #[test]
    fn test_register_parcel_v4() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v4/parcels/",
            200,
            r#"{"content":{"parcel_id":99}}"#,
        );
        let (api, mock) = collect(mock, ApiVersion::V4);
        let registration = ParcelRegistration {
            crop: "maize".into(),
            name: "South".into(),
            entity: "farm-b".into(),
            planting: "2019-04-01".into(),
            harvest: "2019-09-30".into(),
            geometry_wkt: "POLYGON((0 0, 1 0, 1 1, 0 0))".into(),
            geometry_epsg: 4326,
        };
        assert_eq!(
            api.register_parcel(&registration).unwrap(),
            RegistrationOutcome::Registered { parcel_id: 99 }
        );
        let requests = mock.requests.lock().unwrap();
        let body: Value = serde_json::from_str(requests[0].1.as_deref().unwrap()).unwrap();
        assert_eq!(body["name"], "South");
        assert!(body["geometry"].as_str().unwrap().starts_with("POLYGON"));
    }
}
