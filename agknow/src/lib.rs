//! Client for the ag|knowledge parcel API.
//!
//! Parcels and their per-date imagery are fetched on a background thread,
//! georeferenced and reprojected into a working CRS, and handed to a host
//! through the [`session::Display`] trait.

pub mod collect;
pub mod commons;
pub mod geo_core;
pub mod geometric;
pub mod session;
pub mod worker;

pub use collect::agknow::{AgknowCollect, ApiVersion, ParcelListing, RegistrationOutcome};
pub use commons::config::{ParcelDownloadMode, Settings};
pub use commons::error::{AgknowError, Result};
pub use geo_core::{BoundingBox, GeoCore};
pub use geometric::georeference::{Georeferencer, MemRaster};
pub use geometric::parcel::{Parcel, ParcelLayer, ParcelRegistration, ParcelSummary};
pub use geometric::raster::{DataSource, ImageFormat, Product, RasterDescriptor, RasterGroupKey};
pub use session::{Display, NoticeLevel, RasterCache, Session};
