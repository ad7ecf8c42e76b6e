//! Background operations started by the session

use std::sync::Arc;

use anyhow::{Context, Result};

use super::events::TaskOutput;
use super::progress::ProgressTracker;
use super::runner::{Task, TaskContext};
use crate::collect::agknow::AgknowCollect;
use crate::geo_core::BoundingBox;
use crate::geometric::georeference::Georeferencer;
use crate::geometric::parcel::{Parcel, ParcelRegistration};
use crate::geometric::raster::{
    DataSource, ImageFormat, Product, RasterDescriptor, RasterGroupKey, RasterRecord,
};

/// Fetch one page of the parcel listing.
pub struct ListParcelsTask {
    pub api: AgknowCollect,
    pub limit: u32,
    pub offset: u32,
}

impl Task for ListParcelsTask {
    fn name(&self) -> &'static str {
        "list_parcels"
    }

    fn run(self: Box<Self>, ctx: &TaskContext) -> Result<TaskOutput> {
        ctx.status(format!("Processing GET request from {}/parcels/", self.api.base_url));
        let listing = self
            .api
            .list_parcels(self.limit, self.offset)
            .context("Failed to list parcels")?;
        ctx.status("GET Request processed!");
        Ok(TaskOutput::ParcelList(listing))
    }
}

/// Fetch detail data of several parcels, reprojected to `epsg`.
///
/// A parcel that cannot be fetched or parsed is logged and left out.
pub struct ParcelDetailsTask {
    pub api: AgknowCollect,
    pub parcel_ids: Vec<i64>,
    pub epsg: i32,
}

impl ParcelDetailsTask {
    fn fetch(&self, parcel_id: i64) -> Result<Parcel> {
        let (attributes, wkt) = self.api.get_parcel_detail(parcel_id)?;
        Ok(Parcel::from_detail(attributes, &wkt, self.epsg)?)
    }
}

impl Task for ParcelDetailsTask {
    fn name(&self) -> &'static str {
        "parcel_details"
    }

    fn run(self: Box<Self>, ctx: &TaskContext) -> Result<TaskOutput> {
        ctx.status("Getting all parcels base data..");
        let mut tracker = ProgressTracker::new(self.parcel_ids.len());
        let mut parcels = Vec::with_capacity(self.parcel_ids.len());

        for &parcel_id in &self.parcel_ids {
            ctx.check_cancelled()?;
            match self.fetch(parcel_id) {
                Ok(parcel) => parcels.push(parcel),
                Err(e) => {
                    tracing::warn!(target: "agknow", "parcel {} skipped: {:#}", parcel_id, e)
                }
            }
            ctx.advance(&mut tracker);
        }

        ctx.status("Done!");
        Ok(TaskOutput::ParcelDetails(parcels))
    }
}

/// Download, georeference and reproject the rasters of several parcels for
/// one product, data source and format.
///
/// Rasters that fail are logged and dropped; their siblings continue.
pub struct ImagesTask {
    pub api: AgknowCollect,
    pub georeferencer: Arc<dyn Georeferencer>,
    pub parcel_ids: Vec<i64>,
    pub product: Product,
    pub source: DataSource,
    pub format: ImageFormat,
    pub epsg: i32,
}

impl ImagesTask {
    fn group_key(&self, parcel_id: i64) -> RasterGroupKey {
        RasterGroupKey::new(
            parcel_id,
            self.product,
            self.source,
            self.product.fetch_format(self.format),
        )
    }

    fn download(&self, raster: &RasterDescriptor, bounds: Option<&BoundingBox>) -> Result<RasterDescriptor> {
        let bytes = self.api.fetch_raster_bytes(
            raster.parcel_id,
            raster.product,
            raster.source,
            raster.raster_id,
            raster.format,
        )?;
        let resource = self
            .georeferencer
            .materialize(bytes, raster.format, bounds, self.epsg)?;
        Ok(RasterDescriptor {
            resource: Some(resource),
            ..raster.clone()
        })
    }
}

impl Task for ImagesTask {
    fn name(&self) -> &'static str {
        "images"
    }

    fn run(self: Box<Self>, ctx: &TaskContext) -> Result<TaskOutput> {
        tracing::info!(target: "agknow", "Downloading images..");
        self.source.check(self.product)?;

        let mut listings: Vec<(RasterGroupKey, Vec<RasterDescriptor>)> = Vec::new();
        for &parcel_id in &self.parcel_ids {
            ctx.check_cancelled()?;
            let key = self.group_key(parcel_id);
            let records: Vec<RasterRecord> = self
                .api
                .list_rasters(parcel_id, self.product, self.source)
                .with_context(|| format!("Failed to list rasters of {}", key))?;
            let descriptors = records
                .into_iter()
                .map(|record| RasterDescriptor::from_record(&key, record))
                .collect();
            listings.push((key, descriptors));
        }

        let total = listings.iter().map(|(_, rasters)| rasters.len()).sum();
        let mut tracker = ProgressTracker::new(total);
        let mut result = Vec::with_capacity(listings.len());

        for (counter, (key, rasters)) in listings.into_iter().enumerate() {
            ctx.status(format!(
                "Downloading images: {}/{} parcels ready",
                counter,
                self.parcel_ids.len()
            ));

            // rasters of a parcel share their bounds; look them up once if the listing lacks them
            let mut group_bounds: Option<BoundingBox> = None;
            let needs_bounds = !key.format.is_georeferenced()
                && rasters.iter().any(|r| r.bounds.is_none());
            if needs_bounds {
                match self.api.get_raster_bbox(key.parcel_id, key.product) {
                    Ok(bounds) => group_bounds = Some(bounds),
                    Err(e) => {
                        tracing::warn!(target: "agknow", "no bounds for {}: {:#}", key, e)
                    }
                }
            }

            let mut downloaded = Vec::with_capacity(rasters.len());
            for raster in &rasters {
                ctx.check_cancelled()?;
                let bounds = raster.bounds.as_ref().or(group_bounds.as_ref());
                match self.download(raster, bounds) {
                    Ok(descriptor) => downloaded.push(descriptor),
                    Err(e) => tracing::warn!(
                        target: "agknow",
                        "Download of image {} ({}) failed: {:#}",
                        raster.raster_id,
                        key,
                        e
                    ),
                }
                ctx.advance(&mut tracker);
            }
            result.push((key, downloaded));
        }

        ctx.status(format!(
            "Downloading images: {0}/{0} parcels ready",
            self.parcel_ids.len()
        ));
        Ok(TaskOutput::Images(result))
    }
}

/// Register one parcel.
pub struct RegisterParcelTask {
    pub api: AgknowCollect,
    pub registration: ParcelRegistration,
}

impl Task for RegisterParcelTask {
    fn name(&self) -> &'static str {
        "register_parcel"
    }

    fn run(self: Box<Self>, ctx: &TaskContext) -> Result<TaskOutput> {
        tracing::info!(target: "agknow", "Registering feature in ag|knowledge service..");
        ctx.status("Registering feature..");
        let outcome = self.api.register_parcel(&self.registration)?;
        Ok(TaskOutput::Registration(outcome))
    }
}
