//! Stage-by-stage execution of one analysis job.
//!
//! Stages run strictly in order and each returns a [`StageResult`]. The
//! executor alone decides what a failure means: a fatal [`StageError`] moves
//! the job to `failed` and stops the run, a recoverable one is logged and the
//! corresponding result fields stay empty. The job is saved after every
//! checkpoint so pollers see progress as it happens.
//!
//! Green-space jobs run only the geocode and green-space stages, and there the
//! green-space stage is fatal since it is the whole point of the job.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{AmenityMap, AnalysisJob, AnalysisKind, Coordinates, JobStateError};
use crate::services::amenities::{AmenityLocator, OverpassClient};
use crate::services::geocoder::NominatimClient;
use crate::services::green_space::{GreenSpaceClassifier, GreenSpaceReport};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::map_render::{LeafletMapRenderer, MapInput, MapRenderer};
use crate::services::tiles::{OsmTileClient, ScratchTile, TileSource};
use crate::services::walkability;

/// Largest radius fetched as imagery for classification.
pub const MAX_TILE_RADIUS_M: u32 = 1000;
/// Largest radius searched for building footprints.
pub const MAX_BUILDING_RADIUS_M: u32 = 500;

const PROGRESS_STARTED: u8 = 5;
const PROGRESS_GEOCODED: u8 = 10;
const PROGRESS_AMENITIES: u8 = 40;
const PROGRESS_WALK_SCORE: u8 = 55;
const PROGRESS_GREEN_SPACE: u8 = 75;
const PROGRESS_BUILDINGS: u8 = 80;
const PROGRESS_MAP: u8 = 85;
const PROGRESS_TILES: u8 = 30;

/// Why a stage did not produce its output.
#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub stage: &'static str,
    pub reason: String,
    pub fatal: bool,
}

impl StageError {
    pub fn fatal(stage: &'static str, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
            fatal: true,
        }
    }

    pub fn recoverable(stage: &'static str, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
            fatal: false,
        }
    }

    /// The same failure, now ending the run.
    pub fn escalate(self) -> Self {
        Self { fatal: true, ..self }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.reason)
    }
}

pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Analysis job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    State(#[from] JobStateError),
}

impl PipelineError {
    /// The job was already completed or failed by someone else.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::State(JobStateError::Terminal(_)) | PipelineError::Store(StoreError::Terminal(..))
        )
    }
}

/// Receives every persisted snapshot of a running job.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, job: &AnalysisJob);
}

/// Reporter for runs whose progress is only read back from the job store.
pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn report(&self, _job: &AnalysisJob) {}
}

pub struct PipelineExecutor {
    store: Arc<dyn JobStore>,
    locator: Arc<AmenityLocator>,
    tiles: Arc<dyn TileSource>,
    maps: Arc<dyn MapRenderer>,
    classifier: Arc<GreenSpaceClassifier>,
    scratch_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        locator: Arc<AmenityLocator>,
        tiles: Arc<dyn TileSource>,
        maps: Arc<dyn MapRenderer>,
        classifier: Arc<GreenSpaceClassifier>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            locator,
            tiles,
            maps,
            classifier,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Wire the OpenStreetMap-backed collaborators described by `config`.
    pub fn from_config(config: &AppConfig, store: Arc<dyn JobStore>, http: Client) -> Self {
        let geocoder = Arc::new(NominatimClient::new(http.clone(), config.nominatim_url.clone()));
        let overpass = Arc::new(OverpassClient::new(http.clone(), config.overpass_url.clone()));
        Self::new(
            store,
            Arc::new(AmenityLocator::new(geocoder, overpass)),
            Arc::new(OsmTileClient::new(http, config.tile_url.clone())),
            Arc::new(LeafletMapRenderer::new(config.artifacts_dir.clone())),
            Arc::new(GreenSpaceClassifier::new(config.artifacts_dir.clone())),
            config.scratch_dir(),
        )
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run every stage for `job_id` and return the terminal job.
    ///
    /// Only store and state-machine errors surface as `Err`; stage failures
    /// end up in the job record.
    pub async fn run(
        &self,
        job_id: Uuid,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnalysisJob, PipelineError> {
        let started = Instant::now();
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;

        job.start("Starting neighborhood analysis")?;
        job.checkpoint(PROGRESS_STARTED, "Starting neighborhood analysis")?;
        self.persist(&job, reporter).await?;

        let outcome = match job.kind {
            AnalysisKind::Neighborhood => self.run_stages(&mut job, reporter).await?,
            AnalysisKind::GreenSpace => self.run_green_space_stages(&mut job, reporter).await?,
        };

        match outcome {
            Ok(()) => {
                job.complete()?;
                metrics::counter!("analysis_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    kind = %job.kind,
                    walk_score = ?job.walk_score,
                    total_amenities = job.total_amenities(),
                    green_space = ?job.green_space_percentage,
                    "Analysis completed"
                );
            }
            Err(e) => {
                job.fail(e.reason.clone())?;
                metrics::counter!("analysis_jobs_failed_total").increment(1);
                tracing::warn!(job_id = %job.id, stage = e.stage, error = %e.reason, "Analysis failed");
            }
        }

        self.persist(&job, reporter).await?;
        metrics::histogram!("analysis_processing_seconds").record(started.elapsed().as_secs_f64());
        Ok(job)
    }

    /// Run `job_id` and leave both the store and `reporter` on a terminal state.
    ///
    /// A job that is already terminal (e.g. a redelivered queue entry) is not
    /// touched; its stored state is reported again instead. Any other abort is
    /// recorded as a failure. `Err` means the store itself could not be used.
    pub async fn execute(
        &self,
        job_id: Uuid,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnalysisJob, PipelineError> {
        let error = match self.run(job_id, reporter).await {
            Ok(job) => return Ok(job),
            Err(e) if e.is_terminal() => {
                tracing::info!(job_id = %job_id, reason = %e, "Analysis already finished, reporting stored state");
                return self.report_stored(job_id, reporter).await;
            }
            Err(e) => e,
        };

        tracing::error!(job_id = %job_id, error = %error, "Analysis aborted");
        match self.mark_failed(job_id, &error.to_string()).await {
            Ok(job) => {
                reporter.report(&job).await;
                Ok(job)
            }
            Err(e) if e.is_terminal() => self.report_stored(job_id, reporter).await,
            Err(e) => Err(e),
        }
    }

    async fn report_stored(
        &self,
        job_id: Uuid,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnalysisJob, PipelineError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;
        reporter.report(&job).await;
        Ok(job)
    }

    /// Record a job that could not be run at all, e.g. a worker crash.
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<AnalysisJob, PipelineError> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;
        job.fail(error)?;
        self.store.save(&job).await?;
        metrics::counter!("analysis_jobs_failed_total").increment(1);
        Ok(job)
    }

    /// Outer `Err` aborts the run; inner `Err` is the fatal stage error.
    async fn run_stages(
        &self,
        job: &mut AnalysisJob,
        reporter: &dyn ProgressReporter,
    ) -> Result<StageResult<()>, PipelineError> {
        let origin = match self.geocode(job).await {
            Ok(origin) => origin,
            Err(e) => return Ok(Err(e)),
        };
        job.coordinates = Some(origin);
        job.checkpoint(PROGRESS_GEOCODED, "Address geocoded, searching nearby amenities")?;
        self.persist(job, reporter).await?;

        match self.amenities(job, origin).await {
            Ok(amenities) => job.amenities = amenities,
            Err(e) => return Ok(Err(e)),
        }
        let found = job.total_amenities();
        job.checkpoint(PROGRESS_AMENITIES, format!("Found {} amenities, computing walk score", found))?;
        self.persist(job, reporter).await?;

        match score(origin, &job.amenities) {
            Ok(walk_score) => job.walk_score = Some(walk_score),
            Err(e) => self.skip(job, e),
        }
        job.checkpoint(PROGRESS_WALK_SCORE, "Walk score computed, analyzing green space")?;
        self.persist(job, reporter).await?;

        let tile_radius = job.radius_m.min(MAX_TILE_RADIUS_M);
        match self.green_space(job, origin, tile_radius).await {
            Ok(report) => record_green_space(job, report),
            Err(e) => self.skip(job, e),
        }
        job.checkpoint(PROGRESS_GREEN_SPACE, "Green space analyzed")?;
        self.persist(job, reporter).await?;

        if job.include_buildings {
            match self.buildings(job, origin).await {
                Ok(count) => job.building_count = Some(count),
                Err(e) => self.skip(job, e),
            }
            job.checkpoint(PROGRESS_BUILDINGS, "Building footprints counted")?;
            self.persist(job, reporter).await?;
        }

        if job.generate_map {
            match self.map(job, origin).await {
                Ok(map_ref) => job.map_ref = Some(map_ref),
                Err(e) => self.skip(job, e),
            }
            job.checkpoint(PROGRESS_MAP, "Map generated")?;
            self.persist(job, reporter).await?;
        }

        Ok(Ok(()))
    }

    /// Geocode, then classify imagery over the full requested radius.
    async fn run_green_space_stages(
        &self,
        job: &mut AnalysisJob,
        reporter: &dyn ProgressReporter,
    ) -> Result<StageResult<()>, PipelineError> {
        let origin = match self.geocode(job).await {
            Ok(origin) => origin,
            Err(e) => return Ok(Err(e)),
        };
        job.coordinates = Some(origin);
        job.checkpoint(PROGRESS_GEOCODED, "Address geocoded")?;
        self.persist(job, reporter).await?;

        job.checkpoint(PROGRESS_TILES, "Fetching map tiles and analyzing green space")?;
        self.persist(job, reporter).await?;

        let radius_m = job.radius_m;
        match self.green_space(job, origin, radius_m).await {
            Ok(report) => record_green_space(job, report),
            Err(e) => return Ok(Err(e.escalate())),
        }
        Ok(Ok(()))
    }

    async fn persist(&self, job: &AnalysisJob, reporter: &dyn ProgressReporter) -> Result<(), StoreError> {
        self.store.save(job).await?;
        tracing::debug!(job_id = %job.id, progress = job.progress, message = %job.message, "Checkpoint saved");
        reporter.report(job).await;
        Ok(())
    }

    fn skip(&self, job: &AnalysisJob, e: StageError) {
        metrics::counter!("analysis_stage_failures_total", "stage" => e.stage).increment(1);
        tracing::warn!(job_id = %job.id, stage = e.stage, error = %e.reason, "Stage skipped");
    }

    async fn geocode(&self, job: &AnalysisJob) -> StageResult<Coordinates> {
        let origin = self
            .locator
            .geocode(&job.address)
            .await
            .map_err(|e| StageError::fatal("geocode", e))?;
        if !origin.is_valid() {
            return Err(StageError::fatal(
                "geocode",
                format!("geocoder returned an invalid coordinate ({}, {})", origin.latitude, origin.longitude),
            ));
        }
        Ok(origin)
    }

    async fn amenities(&self, job: &AnalysisJob, origin: Coordinates) -> StageResult<AmenityMap> {
        self.locator
            .nearby(origin, job.radius_m, &job.amenity_types)
            .await
            .map_err(|e| StageError::fatal("amenities", e))
    }

    async fn green_space(
        &self,
        job: &AnalysisJob,
        origin: Coordinates,
        radius_m: u32,
    ) -> StageResult<GreenSpaceReport> {
        const STAGE: &str = "green_space";

        let scratch = ScratchTile::create_in(&self.scratch_dir)
            .map_err(|e| StageError::recoverable(STAGE, e))?;

        self.tiles
            .fetch_area(origin, radius_m, scratch.path())
            .await
            .map_err(|e| StageError::recoverable(STAGE, e))?;

        // Classification is CPU-bound; the scratch tile lives until this returns.
        let classifier = Arc::clone(&self.classifier);
        let path = scratch.path().to_path_buf();
        let job_ref = job.id.simple().to_string();
        tokio::task::spawn_blocking(move || classifier.classify_file(&path, &job_ref))
            .await
            .map_err(|e| StageError::recoverable(STAGE, e))?
            .map_err(|e| StageError::recoverable(STAGE, e))
    }

    async fn buildings(&self, job: &AnalysisJob, origin: Coordinates) -> StageResult<u32> {
        self.locator
            .count_buildings(origin, job.radius_m.min(MAX_BUILDING_RADIUS_M))
            .await
            .map_err(|e| StageError::recoverable("buildings", e))
    }

    async fn map(&self, job: &AnalysisJob, origin: Coordinates) -> StageResult<String> {
        let input = MapInput {
            job_id: job.id,
            address: &job.address,
            origin,
            radius_m: job.radius_m,
            amenities: &job.amenities,
        };
        self.maps
            .render(&input)
            .await
            .map_err(|e| StageError::recoverable("map", e))
    }
}

fn record_green_space(job: &mut AnalysisJob, report: GreenSpaceReport) {
    job.green_space_percentage = Some(report.percentage);
    job.green_space_breakdown = Some(report.breakdown);
    job.green_pixels = Some(report.pixel_count);
    job.total_pixels = Some(report.total_pixel_count);
    job.visualization_ref = report.visualization_ref;
}

fn score(origin: Coordinates, amenities: &AmenityMap) -> StageResult<f64> {
    walkability::walk_score(origin, amenities).map_err(|e| StageError::recoverable("walk_score", e))
}
