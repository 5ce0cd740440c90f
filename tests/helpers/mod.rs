//! Stub collaborators and wiring shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use tempfile::TempDir;
use uuid::Uuid;

use neighborhood_insight::{
    app_state::AppState,
    models::analysis::{AnalysisRequest, TaskStatusResponse},
    models::job::{AnalysisJob, AnalysisKind, Coordinates, JobStatus},
    services::{
        amenities::{AmenityError, AmenityLocator, AmenitySource, Place},
        dispatcher::{Dispatcher, InProcessBackend, TaskBackend},
        geocoder::{GeocodeError, Geocoder},
        green_space::GreenSpaceClassifier,
        job_store::{InMemoryJobStore, JobStore, StoreError},
        map_render::{LeafletMapRenderer, MapError, MapInput, MapRenderer},
        pipeline::{PipelineExecutor, ProgressReporter},
        queue::{BackendError, DistributedBackend, TaskState},
        status::StatusResolver,
        tiles::{TileError, TileSource},
    },
};

use crate::fixtures;

pub fn origin() -> Coordinates {
    Coordinates::new(fixtures::ORIGIN.0, fixtures::ORIGIN.1)
}

pub fn request(address: &str, radius_m: u32, amenity_types: &[&str]) -> AnalysisRequest {
    AnalysisRequest {
        address: address.to_string(),
        radius_m,
        amenity_types: amenity_types.iter().map(|s| s.to_string()).collect(),
        include_buildings: false,
        generate_map: true,
    }
}

// ---------------------------------------------------------------------------
// Geocoders
// ---------------------------------------------------------------------------

pub struct StubGeocoder;

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Coordinates, GeocodeError> {
        Ok(origin())
    }
}

pub struct FailingGeocoder;

#[async_trait]
impl Geocoder for FailingGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        Err(GeocodeError::NotFound(address.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Amenity sources
// ---------------------------------------------------------------------------

/// Three restaurants and two parks, all within 400 m of the origin.
pub struct StubAmenities;

fn near(category: &str, name: &str, north_millideg: f64) -> Place {
    Place {
        category: category.to_string(),
        name: Some(name.to_string()),
        coordinates: Coordinates::new(
            fixtures::ORIGIN.0 + north_millideg / 1000.0,
            fixtures::ORIGIN.1,
        ),
    }
}

#[async_trait]
impl AmenitySource for StubAmenities {
    async fn search(
        &self,
        _origin: Coordinates,
        _radius_m: u32,
        categories: &[String],
    ) -> Result<Vec<Place>, AmenityError> {
        let places = vec![
            near("restaurant", "Meghana Foods", 1.0),
            near("restaurant", "Truffles", 2.0),
            near("restaurant", "Toit", 3.0),
            near("park", "Agara Lake Park", 1.5),
            near("park", "Jyoti Nivas Ground", 2.5),
        ];
        Ok(places
            .into_iter()
            .filter(|p| categories.contains(&p.category))
            .collect())
    }

    async fn count_buildings(&self, _origin: Coordinates, _radius_m: u32) -> Result<u32, AmenityError> {
        Ok(42)
    }
}

pub struct FailingAmenities;

#[async_trait]
impl AmenitySource for FailingAmenities {
    async fn search(
        &self,
        _origin: Coordinates,
        _radius_m: u32,
        _categories: &[String],
    ) -> Result<Vec<Place>, AmenityError> {
        Err(AmenityError::Payload("amenity provider unavailable".to_string()))
    }

    async fn count_buildings(&self, _origin: Coordinates, _radius_m: u32) -> Result<u32, AmenityError> {
        Err(AmenityError::Payload("amenity provider unavailable".to_string()))
    }
}

/// Finds the usual places but cannot count buildings.
pub struct NoBuildingAmenities;

#[async_trait]
impl AmenitySource for NoBuildingAmenities {
    async fn search(
        &self,
        origin: Coordinates,
        radius_m: u32,
        categories: &[String],
    ) -> Result<Vec<Place>, AmenityError> {
        StubAmenities.search(origin, radius_m, categories).await
    }

    async fn count_buildings(&self, _origin: Coordinates, _radius_m: u32) -> Result<u32, AmenityError> {
        Err(AmenityError::Payload("building query timed out".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Map renderers
// ---------------------------------------------------------------------------

pub struct FailingMapRenderer;

#[async_trait]
impl MapRenderer for FailingMapRenderer {
    async fn render(&self, _input: &MapInput<'_>) -> Result<String, MapError> {
        Err(MapError::Io(std::io::Error::other("disk full")))
    }
}

// ---------------------------------------------------------------------------
// Tile sources
// ---------------------------------------------------------------------------

/// Writes a fixed raster and remembers where it was written.
pub struct StubTiles {
    image: RgbImage,
    pub written: Mutex<Vec<PathBuf>>,
    pub radii: Mutex<Vec<u32>>,
}

impl StubTiles {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            written: Mutex::new(Vec::new()),
            radii: Mutex::new(Vec::new()),
        }
    }

    pub fn half_forest() -> Self {
        Self::new(fixtures::half_forest(80, 40))
    }

    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileSource for StubTiles {
    async fn fetch_area(&self, _center: Coordinates, radius_m: u32, dest: &Path) -> Result<(), TileError> {
        self.written.lock().unwrap().push(dest.to_path_buf());
        self.radii.lock().unwrap().push(radius_m);
        self.image.save_with_format(dest, ImageFormat::Png)?;
        Ok(())
    }
}

pub struct FailingTiles;

#[async_trait]
impl TileSource for FailingTiles {
    async fn fetch_area(&self, _center: Coordinates, _radius_m: u32, _dest: &Path) -> Result<(), TileError> {
        Err(TileError::Io(std::io::Error::other("tile server unreachable")))
    }
}

/// Writes bytes that are not an image, so classification fails after download.
pub struct CorruptTiles {
    pub written: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl TileSource for CorruptTiles {
    async fn fetch_area(&self, _center: Coordinates, _radius_m: u32, dest: &Path) -> Result<(), TileError> {
        self.written.lock().unwrap().push(dest.to_path_buf());
        std::fs::write(dest, b"definitely not a png")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// In-memory store that records every saved (status, progress) pair.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryJobStore,
    saves: Mutex<HashMap<Uuid, Vec<(JobStatus, u8)>>>,
}

impl RecordingStore {
    pub fn history(&self, id: Uuid) -> Vec<(JobStatus, u8)> {
        self.saves.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        self.inner.create(job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        self.inner.get(id).await
    }

    async fn save(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        self.inner.save(job).await?;
        self.saves
            .lock()
            .unwrap()
            .entry(job.id)
            .or_default()
            .push((job.status, job.progress));
        Ok(())
    }

    async fn list_recent_completed(
        &self,
        kind: AnalysisKind,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        self.inner.list_recent_completed(kind, limit).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Distributed backends
// ---------------------------------------------------------------------------

/// Backend whose every call fails, as when redis is down.
pub struct FailingBackend;

fn connection_refused() -> BackendError {
    BackendError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl DistributedBackend for FailingBackend {
    async fn enqueue(&self, _job_id: Uuid) -> Result<String, BackendError> {
        Err(connection_refused())
    }

    async fn task_state(&self, _task_id: &str) -> Result<Option<TaskState>, BackendError> {
        Err(connection_refused())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Err(connection_refused())
    }
}

/// Accepts submissions without running them; states are set by the test.
#[derive(Default)]
pub struct StubBackend {
    pub states: Mutex<HashMap<String, TaskState>>,
    pub enqueued: Mutex<Vec<Uuid>>,
    pub lookups: AtomicUsize,
}

impl StubBackend {
    pub fn set(&self, task_id: &str, state: TaskState) {
        self.states.lock().unwrap().insert(task_id.to_string(), state);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedBackend for StubBackend {
    async fn enqueue(&self, job_id: Uuid) -> Result<String, BackendError> {
        let mut enqueued = self.enqueued.lock().unwrap();
        enqueued.push(job_id);
        Ok(format!("task-{}", enqueued.len()))
    }

    async fn task_state(&self, task_id: &str) -> Result<Option<TaskState>, BackendError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.states.lock().unwrap().get(task_id).cloned())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub executor: Arc<PipelineExecutor>,
    pub artifacts: TempDir,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        amenities: Arc<dyn AmenitySource>,
        tiles: Arc<dyn TileSource>,
    ) -> Self {
        Self::build(geocoder, amenities, tiles, None)
    }

    /// Stub collaborators with the given map renderer.
    pub fn with_maps(maps: Arc<dyn MapRenderer>) -> Self {
        Self::build(
            Arc::new(StubGeocoder),
            Arc::new(StubAmenities),
            Arc::new(StubTiles::half_forest()),
            Some(maps),
        )
    }

    fn build(
        geocoder: Arc<dyn Geocoder>,
        amenities: Arc<dyn AmenitySource>,
        tiles: Arc<dyn TileSource>,
        maps: Option<Arc<dyn MapRenderer>>,
    ) -> Self {
        let artifacts = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let maps = maps.unwrap_or_else(|| Arc::new(LeafletMapRenderer::new(artifacts.path())));
        let executor = PipelineExecutor::new(
            store.clone(),
            Arc::new(AmenityLocator::new(geocoder, amenities)),
            tiles,
            maps,
            Arc::new(GreenSpaceClassifier::new(artifacts.path())),
            scratch.path(),
        );
        Self {
            store,
            executor: Arc::new(executor),
            artifacts,
            scratch,
        }
    }

    /// Stub geocoder and amenities with the given tile source.
    pub fn with_tiles(tiles: Arc<dyn TileSource>) -> Self {
        Self::new(Arc::new(StubGeocoder), Arc::new(StubAmenities), tiles)
    }

    pub fn dispatcher(&self, backend: TaskBackend) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            backend,
            InProcessBackend::new(self.executor.clone()),
        )
    }

    pub fn resolver(&self, backend: Option<Arc<dyn DistributedBackend>>) -> StatusResolver {
        StatusResolver::new(self.store.clone(), backend)
    }

    pub fn app_state(&self, backend: TaskBackend) -> AppState {
        AppState::new(self.store.clone(), self.dispatcher(backend))
    }

    /// Create a pending job directly in the store.
    pub async fn create_job(&self, request: AnalysisRequest) -> AnalysisJob {
        let job = AnalysisJob::new(
            request.address,
            request.radius_m,
            request.amenity_types,
            request.include_buildings,
            request.generate_map,
        );
        self.store.create(&job).await.unwrap();
        job
    }

    pub async fn create_green_space_job(&self, address: &str, radius_m: u32) -> AnalysisJob {
        let job = AnalysisJob::green_space(address, radius_m);
        self.store.create(&job).await.unwrap();
        job
    }
}

/// Collects every snapshot handed to the reporter.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(JobStatus, u8)>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<(JobStatus, u8)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, job: &AnalysisJob) {
        self.reports.lock().unwrap().push((job.status, job.progress));
    }
}

/// Poll until the task reaches a terminal status, asserting progress never drops.
pub async fn wait_for_terminal(resolver: &StatusResolver, task_id: &str) -> TaskStatusResponse {
    let mut last_progress = 0;
    for _ in 0..500 {
        let status = resolver.resolve(task_id).await.unwrap();
        assert!(
            status.progress >= last_progress,
            "progress went from {} to {}",
            last_progress,
            status.progress
        );
        last_progress = status.progress;
        if status.status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", task_id);
}
