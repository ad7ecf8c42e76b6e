//! Foreground orchestration
//!
//! A [`Session`] owns the connection state, the parcel layer and the
//! downloaded rasters. It runs at most one background task at a time; the host
//! drives it by calling [`Session::pump`] (or [`Session::wait_idle`]) from its
//! own loop, which forwards progress to the [`Display`] and hands the terminal
//! outcome of the task to the continuation chosen when the task was started.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collect::agknow::{AgknowCollect, ParcelListing, RegistrationOutcome};
use crate::collect::global_variables::GENERIC_FAILURE_MESSAGE;
use crate::collect::http::{HttpClient, ReqwestClient};
use crate::commons::config::{ParcelDownloadMode, Settings};
use crate::commons::error::{AgknowError, Result};
use crate::geometric::georeference::{Georeferencer, MemRaster};
use crate::geometric::parcel::{Parcel, ParcelLayer, ParcelRegistration, ParcelSummary};
use crate::geometric::raster::{DataSource, ImageFormat, Product, RasterDescriptor, RasterGroupKey};
use crate::worker::{
    Idle, ImagesTask, ListParcelsTask, ParcelDetailsTask, RegisterParcelTask, Running, Task,
    TaskEvent, TaskOutcome, TaskOutput, TaskRunner,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Critical,
}

/// The user-facing surface of the host application.
///
/// Every method is called on the foreground thread, from inside a
/// [`Session`] call. Only [`Display::notice`] must be implemented.
pub trait Display {
    fn progress(&mut self, _percentage: u8) {}

    fn status(&mut self, _message: &str) {}

    fn notice(&mut self, level: NoticeLevel, message: &str);

    /// Enable or disable user interaction while a task runs.
    fn set_interactive(&mut self, _enabled: bool) {}

    fn set_connected(&mut self, _connected: bool) {}

    /// Replace the entries of the parcel selector.
    fn parcel_labels(&mut self, _labels: &[String]) {}

    fn parcel_added(&mut self, _parcel: &Parcel) {}

    fn raster_added(&mut self, _raster: &RasterDescriptor, _layer_name: &str, _resource: &MemRaster) {}

    /// Remove every raster of a group from the view.
    fn rasters_cleared(&mut self, _key: &RasterGroupKey) {}

    /// Rasters of the current parcel, product and data source, in listing order.
    fn images_reloaded(&mut self, _rasters: &[RasterDescriptor]) {}

    fn focus_parcel(&mut self, _parcel: &Parcel) {}

    fn reset(&mut self) {}
}

/// Downloaded rasters per group. A cached group is never downloaded again
/// until it is invalidated.
#[derive(Debug, Default)]
pub struct RasterCache {
    groups: HashMap<RasterGroupKey, Vec<RasterDescriptor>>,
}

impl RasterCache {
    pub fn contains(&self, key: &RasterGroupKey) -> bool {
        self.groups.contains_key(key)
    }

    pub fn get(&self, key: &RasterGroupKey) -> Option<&[RasterDescriptor]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Store a group, returning the rasters it replaces.
    pub fn insert(&mut self, key: RasterGroupKey, rasters: Vec<RasterDescriptor>) -> Option<Vec<RasterDescriptor>> {
        self.groups.insert(key, rasters)
    }

    pub fn invalidate(&mut self, key: &RasterGroupKey) -> Option<Vec<RasterDescriptor>> {
        self.groups.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RasterGroupKey> {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Empty the cache, returning every raster it held.
    pub fn drain(&mut self) -> Vec<RasterDescriptor> {
        self.groups.drain().flat_map(|(_, rasters)| rasters).collect()
    }
}

/// Free the in-memory resources of rasters nothing refers to anymore.
fn release_rasters(rasters: impl IntoIterator<Item = RasterDescriptor>) {
    for raster in rasters {
        if let Some(resource) = raster.resource {
            if let Err(e) = resource.release() {
                tracing::warn!(target: "agknow", "{:#}", e);
            }
        }
    }
}

/// What happens with the outcome of a task, fixed when the task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    ParcelList,
    ParcelDetails {
        load_images: bool,
        /// Parcel selected by the user, `None` for a bulk download
        focus: Option<i64>,
    },
    Images,
    Registration,
}

impl fmt::Display for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Continuation::ParcelList => "parcel list",
            Continuation::ParcelDetails { .. } => "parcel details",
            Continuation::Images => "images",
            Continuation::Registration => "registration",
        };
        f.write_str(name)
    }
}

enum Slot {
    Idle(TaskRunner<Idle>),
    Running(TaskRunner<Running>, Continuation),
}

/// Client session against one API deployment.
pub struct Session<D: Display> {
    settings: Settings,
    display: D,
    georeferencer: Arc<dyn Georeferencer>,
    client: Option<Arc<dyn HttpClient>>,
    api: Option<AgknowCollect>,
    slot: Slot,
    summaries: Vec<ParcelSummary>,
    parcels: ParcelLayer,
    cache: RasterCache,
    current_parcel: Option<i64>,
    product: Product,
    source: DataSource,
    format: ImageFormat,
    connected: bool,
}

#[cfg(feature = "gdal")]
impl<D: Display> Session<D> {
    /// Session rendering rasters through GDAL.
    pub fn with_gdal(settings: Settings, display: D) -> Self {
        Session::new(
            settings,
            display,
            Arc::new(crate::geometric::georeference::GdalPipeline::new()),
        )
    }
}

impl<D: Display> Session<D> {
    pub fn new(settings: Settings, display: D, georeferencer: Arc<dyn Georeferencer>) -> Self {
        let format = settings.image_format;
        let epsg = settings.working_epsg;
        Session {
            settings,
            display,
            georeferencer,
            client: None,
            api: None,
            slot: Slot::Idle(TaskRunner::new()),
            summaries: Vec::new(),
            parcels: ParcelLayer::new(epsg),
            cache: RasterCache::default(),
            current_parcel: None,
            product: Product::Vitality,
            source: DataSource::Sentinel2,
            format,
            connected: false,
        }
    }

    /// Use `client` for every request instead of a reqwest client built from
    /// the settings.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings; they take effect on the next connect.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn parcels(&self) -> &ParcelLayer {
        &self.parcels
    }

    pub fn summaries(&self) -> &[ParcelSummary] {
        &self.summaries
    }

    pub fn cache(&self) -> &RasterCache {
        &self.cache
    }

    pub fn current_parcel(&self) -> Option<i64> {
        self.current_parcel
    }

    pub fn product(&self) -> Product {
        self.product
    }

    pub fn data_source(&self) -> DataSource {
        self.source
    }

    pub fn image_format(&self) -> ImageFormat {
        self.format
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.slot, Slot::Running(..))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() {
            Err(AgknowError::Busy)
        } else {
            Ok(())
        }
    }

    fn build_api(&self) -> Result<AgknowCollect> {
        let version = self.settings.api_version()?;
        let client: Arc<dyn HttpClient> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(ReqwestClient::new(self.settings.ssl_verify)?),
        };
        Ok(AgknowCollect::new(
            self.settings.base_url()?,
            self.settings.api_key.clone(),
            version,
            client,
        ))
    }

    fn connected_api(&self) -> Result<AgknowCollect> {
        match (&self.api, self.connected) {
            (Some(api), true) => Ok(api.clone()),
            _ => Err(AgknowError::NotConnected),
        }
    }

    /// Group of `parcel_id` for the current product, data source and format.
    pub fn group_key(&self, parcel_id: i64) -> RasterGroupKey {
        RasterGroupKey::new(
            parcel_id,
            self.product,
            self.source,
            self.product.fetch_format(self.format),
        )
    }

    fn start(&mut self, task: Box<dyn Task>, continuation: Continuation) -> Result<()> {
        let runner = match mem::replace(&mut self.slot, Slot::Idle(TaskRunner::new())) {
            Slot::Idle(runner) => runner,
            running @ Slot::Running(..) => {
                self.slot = running;
                return Err(AgknowError::Busy);
            }
        };
        tracing::debug!(target: "agknow", "{} task started", continuation);
        self.display.set_interactive(false);
        self.display.progress(0);
        self.slot = Slot::Running(runner.start(task), continuation);
        Ok(())
    }

    fn forward(&mut self, events: &[TaskEvent]) {
        for event in events {
            match event {
                TaskEvent::Progress(percentage) => self.display.progress(*percentage),
                TaskEvent::Status(message) => self.display.status(message),
                TaskEvent::Error(_) | TaskEvent::Finished(_) => {}
            }
        }
    }

    /// Join a finished task and run its continuation.
    fn teardown_if_done(&mut self) {
        if !matches!(&self.slot, Slot::Running(runner, _) if runner.is_done()) {
            return;
        }
        if let Slot::Running(runner, continuation) =
            mem::replace(&mut self.slot, Slot::Idle(TaskRunner::new()))
        {
            let (idle, outcome) = runner.finish();
            self.slot = Slot::Idle(idle);
            self.dispatch(continuation, outcome);
        }
    }

    /// Forward pending task events and run the continuation of a finished
    /// task. Returns `true` while a task is running.
    pub fn pump(&mut self) -> bool {
        let events = match &mut self.slot {
            Slot::Running(runner, _) => runner.poll(),
            Slot::Idle(_) => return false,
        };
        self.forward(&events);
        self.teardown_if_done();
        self.is_busy()
    }

    /// Pump until no task is running, including tasks started by
    /// continuations. Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let event = match &mut self.slot {
                Slot::Idle(_) => return true,
                Slot::Running(runner, _) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    runner.next_event((deadline - now).min(POLL_INTERVAL))
                }
            };
            if let Some(event) = event {
                self.forward(std::slice::from_ref(&event));
            }
            self.teardown_if_done();
        }
    }

    /// Cancel a running task and throw its outcome away.
    fn abort_task(&mut self) {
        if let Slot::Running(runner, continuation) =
            mem::replace(&mut self.slot, Slot::Idle(TaskRunner::new()))
        {
            runner.cancel();
            let (idle, outcome) = runner.finish();
            self.slot = Slot::Idle(idle);
            tracing::info!(target: "agknow", "{} task aborted", continuation);
            if let TaskOutcome::Finished(TaskOutput::Images(groups)) = outcome {
                release_rasters(groups.into_iter().flat_map(|(_, rasters)| rasters));
            }
        }
    }

    fn clear_state(&mut self) {
        release_rasters(self.cache.drain());
        self.parcels = ParcelLayer::new(self.settings.working_epsg);
        self.summaries.clear();
        self.current_parcel = None;
        self.api = None;
    }

    fn set_disconnected(&mut self) {
        self.connected = false;
        self.display.set_connected(false);
    }

    /// Forget everything and fetch the parcel listing.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.settings.validate()?;
        let api = self.build_api()?;

        self.clear_state();
        self.connected = false;
        self.display.reset();

        tracing::info!(target: "agknow", "Connecting to {}", api.base_url);
        let task = ListParcelsTask {
            api: api.clone(),
            limit: self.settings.parcel_limit,
            offset: 0,
        };
        self.api = Some(api);
        self.start(Box::new(task), Continuation::ParcelList)
    }

    /// Stop any running task and drop the parcel selector. Downloaded data
    /// stays until the next connect or reset.
    pub fn disconnect(&mut self) {
        self.abort_task();
        self.summaries.clear();
        self.current_parcel = None;
        self.display.parcel_labels(&[]);
        self.set_disconnected();
        self.display.set_interactive(true);
    }

    /// Stop any running task, release every raster and clear all state.
    pub fn reset(&mut self) {
        self.abort_task();
        self.clear_state();
        self.connected = false;
        self.display.reset();
    }

    /// Make `parcel_id` current, loading its detail data first if needed.
    pub fn select_parcel(&mut self, parcel_id: i64) -> Result<()> {
        self.ensure_idle()?;
        let api = self.connected_api()?;
        self.current_parcel = Some(parcel_id);

        if let Some(parcel) = self.parcels.get(parcel_id) {
            self.display.focus_parcel(parcel);
            return self.update_parcel_images(&[parcel_id]);
        }

        let task = ParcelDetailsTask {
            api,
            parcel_ids: vec![parcel_id],
            epsg: self.settings.working_epsg,
        };
        self.start(
            Box::new(task),
            Continuation::ParcelDetails {
                load_images: self.settings.download_images,
                focus: Some(parcel_id),
            },
        )
    }

    /// Switch product. Products with a single format force that format.
    pub fn set_product(&mut self, product: Product) -> Result<()> {
        self.ensure_idle()?;
        self.source.check(product)?;
        self.product = product;
        if let Some(format) = product.frozen_format() {
            self.format = format;
        }
        self.images_changed()
    }

    pub fn set_data_source(&mut self, source: DataSource) -> Result<()> {
        self.ensure_idle()?;
        source.check(self.product)?;
        self.source = source;
        self.images_changed()
    }

    /// Switch image format. Ignored for products whose format is frozen.
    pub fn set_image_format(&mut self, format: ImageFormat) -> Result<()> {
        self.ensure_idle()?;
        match self.product.frozen_format() {
            Some(frozen) if frozen != format => {
                tracing::warn!(
                    target: "agknow",
                    "{} is only available as {}, keeping it",
                    self.product,
                    frozen
                );
                return Ok(());
            }
            _ => self.format = format,
        }
        self.images_changed()
    }

    fn images_changed(&mut self) -> Result<()> {
        match self.current_parcel {
            Some(parcel_id) if self.connected => self.update_parcel_images(&[parcel_id]),
            _ => Ok(()),
        }
    }

    /// Download the current group of the current parcel again.
    pub fn refresh(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.connected_api()?;
        let parcel_id = self.current_parcel.ok_or(AgknowError::NoParcelSelected)?;
        let key = self.group_key(parcel_id);
        if let Some(rasters) = self.cache.invalidate(&key) {
            tracing::info!(target: "agknow", "refreshing {}", key);
            self.display.rasters_cleared(&key);
            release_rasters(rasters);
        }
        self.update_parcel_images(&[parcel_id])
    }

    fn reload_current(&mut self) {
        let Some(parcel_id) = self.current_parcel else {
            return;
        };
        let key = self.group_key(parcel_id);
        match self.cache.get(&key) {
            Some(rasters) => self.display.images_reloaded(rasters),
            None => tracing::debug!(target: "agknow", "{} not downloaded", key),
        }
    }

    /// Download the current group of every parcel in `parcel_ids` not cached yet.
    pub fn update_parcel_images(&mut self, parcel_ids: &[i64]) -> Result<()> {
        self.ensure_idle()?;
        let api = self.connected_api()?;
        self.source.check(self.product)?;

        if !self.settings.download_images {
            self.reload_current();
            self.display.set_interactive(true);
            return Ok(());
        }

        let mut missing = Vec::new();
        for &parcel_id in parcel_ids {
            let key = self.group_key(parcel_id);
            if self.cache.contains(&key) {
                tracing::info!(target: "agknow", "{} exists already", key);
            } else {
                tracing::info!(target: "agknow", "{} not found - downloading from server", key);
                self.display.rasters_cleared(&key);
                missing.push(parcel_id);
            }
        }

        if missing.is_empty() {
            self.reload_current();
            self.display.set_interactive(true);
            return Ok(());
        }

        let task = ImagesTask {
            api,
            georeferencer: self.georeferencer.clone(),
            parcel_ids: missing,
            product: self.product,
            source: self.source,
            format: self.format,
            epsg: self.settings.working_epsg,
        };
        self.start(Box::new(task), Continuation::Images)
    }

    /// Register a new parcel. Needs valid settings but no connection.
    pub fn register_parcel(&mut self, registration: ParcelRegistration) -> Result<()> {
        self.ensure_idle()?;
        let api = match &self.api {
            Some(api) => api.clone(),
            None => self.build_api()?,
        };
        self.start(
            Box::new(RegisterParcelTask { api, registration }),
            Continuation::Registration,
        )
    }

    fn dispatch(&mut self, continuation: Continuation, outcome: TaskOutcome) {
        let output = match outcome {
            TaskOutcome::Finished(output) => output,
            TaskOutcome::Failed(message) => return self.on_failure(continuation, &message),
        };
        let result = match (continuation, output) {
            (Continuation::ParcelList, TaskOutput::ParcelList(listing)) => self.on_parcel_list(listing),
            (Continuation::ParcelDetails { load_images, focus }, TaskOutput::ParcelDetails(parcels)) => {
                self.on_parcel_details(parcels, load_images, focus)
            }
            (Continuation::Images, TaskOutput::Images(groups)) => {
                self.on_images(groups);
                Ok(())
            }
            (Continuation::Registration, TaskOutput::Registration(outcome)) => {
                self.on_registration(outcome);
                Ok(())
            }
            (continuation, output) => {
                tracing::error!(
                    target: "agknow",
                    "{} continuation received {} output",
                    continuation,
                    output.kind()
                );
                self.display.notice(NoticeLevel::Critical, GENERIC_FAILURE_MESSAGE);
                self.display.set_interactive(true);
                Ok(())
            }
        };
        if let Err(e) = result {
            self.on_failure(continuation, &e.to_string());
        }
    }

    fn on_failure(&mut self, continuation: Continuation, message: &str) {
        tracing::error!(target: "agknow", "{} failed: {}", continuation, message);
        self.display.notice(NoticeLevel::Critical, GENERIC_FAILURE_MESSAGE);
        if continuation == Continuation::ParcelList {
            self.set_disconnected();
        }
        self.display.set_interactive(true);
    }

    fn on_parcel_list(&mut self, listing: ParcelListing) -> Result<()> {
        let summaries = match listing {
            ParcelListing::Unauthorized => {
                tracing::error!(target: "agknow", "API key is not authorized!");
                self.display.notice(NoticeLevel::Critical, "API key is not authorized!");
                self.set_disconnected();
                self.display.set_interactive(true);
                return Ok(());
            }
            ParcelListing::Empty => {
                tracing::warn!(target: "agknow", "No parcels found for this API Key!");
                self.display.notice(NoticeLevel::Warning, "No parcels found for this API Key!");
                self.set_disconnected();
                self.display.set_interactive(true);
                return Ok(());
            }
            ParcelListing::Parcels(summaries) => summaries,
        };

        self.connected = true;
        self.display.set_connected(true);
        let ids: Vec<i64> = summaries.iter().map(|s| s.parcel_id).collect();
        let labels: Vec<String> = summaries.iter().map(ParcelSummary::label).collect();
        self.summaries = summaries;

        match self.settings.parcel_download_mode {
            ParcelDownloadMode::OneByOne => {
                self.display.parcel_labels(&labels);
                self.display
                    .notice(NoticeLevel::Success, "Successfully downloaded base parcel data!");
                tracing::info!(target: "agknow", "Successfully downloaded base parcel data.");
                // ids is never empty here: an empty listing is ParcelListing::Empty
                match ids.first() {
                    Some(&first) => self.select_parcel(first),
                    None => {
                        self.display.set_interactive(true);
                        Ok(())
                    }
                }
            }
            ParcelDownloadMode::AllAtOnce => {
                let message = "Loading all parcel detail data at once may take a while..";
                self.display.notice(NoticeLevel::Info, message);
                tracing::info!(target: "agknow", "{}", message);
                let task = ParcelDetailsTask {
                    api: self.connected_api()?,
                    parcel_ids: ids,
                    epsg: self.settings.working_epsg,
                };
                self.start(
                    Box::new(task),
                    Continuation::ParcelDetails {
                        load_images: self.settings.download_images,
                        focus: None,
                    },
                )
            }
        }
    }

    fn on_parcel_details(&mut self, parcels: Vec<Parcel>, load_images: bool, focus: Option<i64>) -> Result<()> {
        if parcels.is_empty() {
            let message = match focus {
                Some(parcel_id) => format!("No detail data for parcel {}!", parcel_id),
                None => "No parcels found for this API Key!".to_string(),
            };
            tracing::warn!(target: "agknow", "{}", message);
            self.display.notice(NoticeLevel::Warning, &message);
            self.display.set_interactive(true);
            return Ok(());
        }

        let ids: Vec<i64> = parcels.iter().map(|p| p.parcel_id).collect();
        for parcel in parcels {
            self.display.parcel_added(&parcel);
            self.parcels.upsert(parcel);
        }

        if focus.is_none() {
            // bulk download: the selector lists the parcels that could be loaded
            self.summaries = self.parcels.iter().map(Parcel::summary).collect();
            self.display.parcel_labels(&self.parcels.labels());
            self.current_parcel = ids.first().copied();
            self.display
                .notice(NoticeLevel::Success, "Successfully downloaded parcels detail data!");
            tracing::info!(target: "agknow", "Successfully downloaded parcels detail data.");
        }

        if let Some(parcel) = self.current_parcel.and_then(|id| self.parcels.get(id)) {
            self.display.focus_parcel(parcel);
        }

        if load_images {
            self.update_parcel_images(&ids)
        } else {
            self.display.set_interactive(true);
            Ok(())
        }
    }

    fn on_images(&mut self, groups: Vec<(RasterGroupKey, Vec<RasterDescriptor>)>) {
        for (key, rasters) in groups {
            tracing::info!(target: "agknow", "{}: {} images downloaded", key, rasters.len());
            for raster in &rasters {
                if let Some(resource) = &raster.resource {
                    self.display.raster_added(raster, &raster.layer_name(), resource);
                }
            }
            if self.current_parcel == Some(key.parcel_id) {
                self.display.images_reloaded(&rasters);
            }
            if let Some(replaced) = self.cache.insert(key, rasters) {
                release_rasters(replaced);
            }
        }

        if let Some(parcel) = self.current_parcel.and_then(|id| self.parcels.get(id)) {
            self.display.focus_parcel(parcel);
        }
        self.display.set_interactive(true);
    }

    fn on_registration(&mut self, outcome: RegistrationOutcome) {
        match outcome {
            RegistrationOutcome::Registered { parcel_id } => {
                tracing::info!(target: "agknow", "parcel {} registered", parcel_id);
                self.display.notice(
                    NoticeLevel::Success,
                    &format!("Successfully registered parcel {}!", parcel_id),
                );
            }
            RegistrationOutcome::Rejected { message } => {
                tracing::warn!(target: "agknow", "registration rejected: {}", message);
                self.display.notice(NoticeLevel::Critical, &message);
            }
        }
        self.display.set_interactive(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::http::tests::MockHttpClient;
    use crate::worker::tasks::tests::{raster_listing, MockGeoreferencer, BASE};

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Default)]
    struct Recorder {
        notices: Vec<(NoticeLevel, String)>,
        interactive: Vec<bool>,
        connected: Option<bool>,
        labels: Vec<String>,
        added_parcels: Vec<i64>,
        added_rasters: Vec<String>,
        cleared: Vec<String>,
        reloaded: Vec<usize>,
        focused: Vec<i64>,
        progress: Vec<u8>,
        resets: usize,
    }

    impl Display for Recorder {
        fn progress(&mut self, percentage: u8) {
            self.progress.push(percentage);
        }

        fn notice(&mut self, level: NoticeLevel, message: &str) {
            self.notices.push((level, message.to_string()));
        }

        fn set_interactive(&mut self, enabled: bool) {
            self.interactive.push(enabled);
        }

        fn set_connected(&mut self, connected: bool) {
            self.connected = Some(connected);
        }

        fn parcel_labels(&mut self, labels: &[String]) {
            self.labels = labels.to_vec();
        }

        fn parcel_added(&mut self, parcel: &Parcel) {
            self.added_parcels.push(parcel.parcel_id);
        }

        fn raster_added(&mut self, _raster: &RasterDescriptor, layer_name: &str, _resource: &MemRaster) {
            self.added_rasters.push(layer_name.to_string());
        }

        fn rasters_cleared(&mut self, key: &RasterGroupKey) {
            self.cleared.push(key.to_string());
        }

        fn images_reloaded(&mut self, rasters: &[RasterDescriptor]) {
            self.reloaded.push(rasters.len());
        }

        fn focus_parcel(&mut self, parcel: &Parcel) {
            self.focused.push(parcel.parcel_id);
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    impl Recorder {
        fn last_notice(&self) -> Option<&(NoticeLevel, String)> {
            self.notices.last()
        }
    }

    fn detail(parcel_id: i64, name: &str) -> String {
        format!(
            r#"{{"content":[{{"parcel_id":{},"name":"{}","geometry":"POLYGON((10 45,10.1 45,10.1 45.1,10 45))"}}]}}"#,
            parcel_id, name
        )
    }

    /// Parcels 5 and 6, each with two vitality rasters.
    fn two_parcels() -> MockHttpClient {
        let mut mock = MockHttpClient::new()
            .with(
                "/agknow/api/v3/parcels/",
                200,
                r#"{"content":[{"parcel_id":5,"name":"North"},{"parcel_id":6,"name":"South"}]}"#,
            )
            .with("/agknow/api/v3/parcels/5/", 200, detail(5, "North"))
            .with("/agknow/api/v3/parcels/6/", 200, detail(6, "South"));
        for parcel_id in [5, 6] {
            mock = mock.with(
                &format!("/agknow/api/v3/parcels/{}/vitality/", parcel_id),
                200,
                raster_listing(&[1, 2]),
            );
            for raster_id in [1, 2] {
                mock = mock.with(
                    &format!(
                        "/agknow/api/v3/parcels/{}/vitality/sentinel2/{}.tif",
                        parcel_id, raster_id
                    ),
                    200,
                    "tif",
                );
            }
        }
        mock
    }

    fn session(mock: MockHttpClient, mode: ParcelDownloadMode) -> (Session<Recorder>, Arc<MockHttpClient>) {
        let settings = Settings {
            host_url: BASE.trim_end_matches("/agknow/api/v3").to_string(),
            api_key: "k".to_string(),
            parcel_download_mode: mode,
            ..Settings::default()
        };
        let mock = Arc::new(mock);
        let session = Session::new(
            settings,
            Recorder::default(),
            Arc::new(MockGeoreferencer::default()),
        )
        .with_http_client(mock.clone());
        (session, mock)
    }

    #[test]
    fn test_connect_one_by_one() {
        let (mut session, _) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        assert!(session.is_connected());
        let display = session.display();
        assert_eq!(display.connected, Some(true));
        assert_eq!(display.labels, vec!["5 - North", "6 - South"]);
        assert_eq!(display.added_parcels, vec![5]);
        assert_eq!(display.added_rasters.len(), 2);
        assert_eq!(display.added_rasters[0], "vitality|2018-06-01|1|sentinel2");
        assert_eq!(display.reloaded, vec![2]);
        assert_eq!(display.interactive.last(), Some(&true));
        assert_eq!(session.current_parcel(), Some(5));
        assert!(session.cache().contains(&session.group_key(5)));
        assert!(!session.cache().contains(&session.group_key(6)));
    }

    #[test]
    fn test_cached_group_is_not_downloaded_again() {
        let (mut session, mock) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));
        let requests = mock.request_count();

        session.select_parcel(5).unwrap();
        assert!(!session.is_busy());
        assert_eq!(mock.request_count(), requests);
        assert_eq!(session.display().reloaded, vec![2, 2]);
        assert_eq!(session.display().interactive.last(), Some(&true));
    }

    #[test]
    fn test_select_other_parcel_fetches_detail_then_images() {
        let (mut session, _) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        session.select_parcel(6).unwrap();
        assert!(session.wait_idle(WAIT));
        assert_eq!(session.display().added_parcels, vec![5, 6]);
        assert_eq!(session.parcels().len(), 2);
        assert_eq!(session.cache().len(), 2);
        assert_eq!(session.display().focused.last(), Some(&6));
    }

    #[test]
    fn test_connect_all_at_once() {
        let (mut session, _) = session(two_parcels(), ParcelDownloadMode::AllAtOnce);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        let display = session.display();
        assert_eq!(display.added_parcels, vec![5, 6]);
        assert_eq!(display.labels, vec!["5 - North", "6 - South"]);
        assert_eq!(display.added_rasters.len(), 4);
        // only the current parcel feeds the time slider
        assert_eq!(display.reloaded, vec![2]);
        assert_eq!(
            display.notices[0],
            (
                NoticeLevel::Info,
                "Loading all parcel detail data at once may take a while..".to_string()
            )
        );
        assert_eq!(session.cache().len(), 2);
        assert_eq!(session.current_parcel(), Some(5));
    }

    #[test]
    fn test_busy_while_task_runs() {
        let (mut session, _) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        // nothing is torn down before the next pump
        assert!(matches!(session.connect(), Err(AgknowError::Busy)));
        assert!(matches!(session.refresh(), Err(AgknowError::Busy)));
        assert!(session.wait_idle(WAIT));
    }

    #[test]
    fn test_unauthorized_key() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v3/parcels/",
            200,
            r#"{"content":"key is not authorized"}"#,
        );
        let (mut session, _) = session(mock, ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        assert!(!session.is_connected());
        let display = session.display();
        assert_eq!(
            display.last_notice(),
            Some(&(NoticeLevel::Critical, "API key is not authorized!".to_string()))
        );
        assert_eq!(display.connected, Some(false));
        assert_eq!(display.interactive.last(), Some(&true));
    }

    #[test]
    fn test_no_parcels() {
        let mock = MockHttpClient::new().with("/agknow/api/v3/parcels/", 200, r#"{"content":[]}"#);
        let (mut session, _) = session(mock, ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        assert!(!session.is_connected());
        assert_eq!(
            session.display().last_notice(),
            Some(&(NoticeLevel::Warning, "No parcels found for this API Key!".to_string()))
        );
    }

    #[test]
    fn test_failure_reenables_interaction() {
        let mock = MockHttpClient::new().with_transport_error("/agknow/api/v3/parcels/");
        let (mut session, _) = session(mock, ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        let display = session.display();
        assert_eq!(
            display.last_notice(),
            Some(&(NoticeLevel::Critical, GENERIC_FAILURE_MESSAGE.to_string()))
        );
        assert_eq!(display.interactive, vec![false, true]);
        assert_eq!(display.connected, Some(false));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_refresh_downloads_current_group_again() {
        let (mut session, mock) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));
        let requests = mock.request_count();

        session.refresh().unwrap();
        assert!(session.wait_idle(WAIT));

        // listing and two rasters
        assert_eq!(mock.request_count(), requests + 3);
        assert!(session
            .display()
            .cleared
            .contains(&"5_vitality_sentinel2_tif".to_string()));
        assert_eq!(session.display().added_rasters.len(), 4);
        assert_eq!(session.cache().get(&session.group_key(5)).map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_product_and_format_rules() {
        let (mut session, mock) = session(MockHttpClient::new(), ParcelDownloadMode::OneByOne);

        session.set_product(Product::Ndvi).unwrap();
        assert!(matches!(
            session.set_data_source(DataSource::Landsat8),
            Err(AgknowError::IncompatibleProduct { .. })
        ));
        assert_eq!(session.data_source(), DataSource::Sentinel2);

        session.set_product(Product::Visible).unwrap();
        assert_eq!(session.image_format(), ImageFormat::Png);
        session.set_image_format(ImageFormat::Tif).unwrap();
        assert_eq!(session.image_format(), ImageFormat::Png);

        session.set_product(Product::Reflectances).unwrap();
        assert_eq!(session.image_format(), ImageFormat::Tif);

        // not connected: nothing is requested
        assert_eq!(mock.request_count(), 0);
        assert!(matches!(session.refresh(), Err(AgknowError::NotConnected)));
    }

    #[test]
    fn test_register_rejected() {
        let mock = MockHttpClient::new().with(
            "/agknow/api/v3/parcels/",
            200,
            r#"{"errors":"bad wkt","id":null}"#,
        );
        let (mut session, _) = session(mock, ParcelDownloadMode::OneByOne);
        session
            .register_parcel(ParcelRegistration {
                crop: "maize".into(),
                name: "n".into(),
                entity: "e".into(),
                planting: "2019-04-01".into(),
                harvest: "2019-09-30".into(),
                geometry_wkt: "POLYGON((10 45,10.1 45,10.1 45.1,10 45))".into(),
                geometry_epsg: 4326,
            })
            .unwrap();
        assert!(session.wait_idle(WAIT));
        assert_eq!(
            session.display().last_notice(),
            Some(&(NoticeLevel::Critical, "bad wkt".to_string()))
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut session, _) = session(two_parcels(), ParcelDownloadMode::OneByOne);
        session.connect().unwrap();
        assert!(session.wait_idle(WAIT));

        session.reset();
        assert!(!session.is_connected());
        assert!(session.parcels().is_empty());
        assert!(session.cache().is_empty());
        assert_eq!(session.current_parcel(), None);
        // once on connect, once on reset
        assert_eq!(session.display().resets, 2);
    }
}
