use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a neighborhood analysis job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What a job computes. Both kinds share the job store, dispatch and status lookup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisKind {
    /// Every stage: amenities, walk score, green space, buildings, map.
    #[default]
    Neighborhood,
    /// Geocode, then classify imagery around the address.
    GreenSpace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A nearby place annotated with its straight-line distance from the origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointOfInterest {
    pub name: String,
    pub distance_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

/// Category tag → places, nearest first.
pub type AmenityMap = BTreeMap<String, Vec<PointOfInterest>>;

/// One persisted pipeline run. Mutated in place by the executor that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    #[serde(default)]
    pub kind: AnalysisKind,
    pub address: String,
    pub radius_m: u32,
    pub amenity_types: Vec<String>,
    pub include_buildings: bool,
    pub generate_map: bool,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub coordinates: Option<Coordinates>,
    pub amenities: AmenityMap,
    pub walk_score: Option<f64>,
    pub green_space_percentage: Option<f64>,
    pub green_space_breakdown: Option<BTreeMap<String, f64>>,
    pub green_pixels: Option<u64>,
    pub total_pixels: Option<u64>,
    pub visualization_ref: Option<String>,
    pub building_count: Option<u32>,
    pub map_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JobStateError {
    #[error("job is already {0} and cannot change")]
    Terminal(JobStatus),

    #[error("job must be processing to record progress (currently {0})")]
    NotProcessing(JobStatus),
}

impl AnalysisJob {
    pub fn new(
        address: impl Into<String>,
        radius_m: u32,
        amenity_types: Vec<String>,
        include_buildings: bool,
        generate_map: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: AnalysisKind::Neighborhood,
            address: address.into(),
            radius_m,
            amenity_types,
            include_buildings,
            generate_map,
            status: JobStatus::Pending,
            progress: 0,
            message: "Queued for analysis".to_string(),
            coordinates: None,
            amenities: AmenityMap::new(),
            walk_score: None,
            green_space_percentage: None,
            green_space_breakdown: None,
            green_pixels: None,
            total_pixels: None,
            visualization_ref: None,
            building_count: None,
            map_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// A green-space-only job around `address`.
    pub fn green_space(address: impl Into<String>, radius_m: u32) -> Self {
        Self {
            kind: AnalysisKind::GreenSpace,
            ..Self::new(address, radius_m, Vec::new(), false, false)
        }
    }

    pub fn total_amenities(&self) -> usize {
        self.amenities.values().map(Vec::len).sum()
    }

    /// Move a pending job into processing. Re-entering processing is a no-op.
    pub fn start(&mut self, message: impl Into<String>) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal(self.status));
        }
        self.status = JobStatus::Processing;
        self.message = message.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a checkpoint. Progress never decreases and stays below 100
    /// until the job reaches a terminal state.
    pub fn checkpoint(&mut self, progress: u8, message: impl Into<String>) -> Result<(), JobStateError> {
        match self.status {
            JobStatus::Processing => {}
            s if s.is_terminal() => return Err(JobStateError::Terminal(s)),
            s => return Err(JobStateError::NotProcessing(s)),
        }
        self.progress = self.progress.max(progress.min(99));
        self.message = message.into();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal(self.status));
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = "Analysis completed".to_string();
        self.error = None;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::Terminal(self.status));
        }
        let error = error.into();
        self.status = JobStatus::Failed;
        self.progress = 100;
        self.message = format!("Analysis failed: {}", error);
        self.error = Some(error);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Result snapshot exposed once the job has completed.
    pub fn result(&self) -> Option<AnalysisResult> {
        if self.status != JobStatus::Completed {
            return None;
        }
        Some(AnalysisResult {
            analysis_id: self.id,
            address: self.address.clone(),
            coordinates: self.coordinates,
            walk_score: self.walk_score,
            total_amenities: self.total_amenities(),
            amenities: self.amenities.clone(),
            green_space_percentage: self.green_space_percentage,
            green_space_breakdown: self.green_space_breakdown.clone(),
            green_pixels: self.green_pixels,
            total_pixels: self.total_pixels,
            green_space_visualization: self.visualization_ref.clone(),
            building_count: self.building_count,
            map_ref: self.map_ref.clone(),
            completed_at: self.completed_at,
        })
    }

    /// Result snapshot of a completed green-space job.
    pub fn green_space_result(&self) -> Option<GreenSpaceResult> {
        if self.status != JobStatus::Completed {
            return None;
        }
        Some(GreenSpaceResult {
            analysis_id: self.id,
            address: self.address.clone(),
            coordinates: self.coordinates,
            radius_m: self.radius_m,
            green_space_percentage: self.green_space_percentage,
            breakdown: self.green_space_breakdown.clone(),
            green_pixels: self.green_pixels,
            total_pixels: self.total_pixels,
            visualization_ref: self.visualization_ref.clone(),
            completed_at: self.completed_at,
        })
    }

    /// Result payload for this job's kind, as exposed to pollers.
    pub fn result_json(&self) -> Option<serde_json::Value> {
        match self.kind {
            AnalysisKind::Neighborhood => self.result().and_then(|r| serde_json::to_value(r).ok()),
            AnalysisKind::GreenSpace => self
                .green_space_result()
                .and_then(|r| serde_json::to_value(r).ok()),
        }
    }
}

/// Final result payload of a completed analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: Uuid,
    pub address: String,
    pub coordinates: Option<Coordinates>,
    pub walk_score: Option<f64>,
    pub total_amenities: usize,
    pub amenities: AmenityMap,
    pub green_space_percentage: Option<f64>,
    pub green_space_breakdown: Option<BTreeMap<String, f64>>,
    pub green_pixels: Option<u64>,
    pub total_pixels: Option<u64>,
    pub green_space_visualization: Option<String>,
    pub building_count: Option<u32>,
    pub map_ref: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final result payload of a completed green-space analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreenSpaceResult {
    pub analysis_id: Uuid,
    pub address: String,
    pub coordinates: Option<Coordinates>,
    pub radius_m: u32,
    pub green_space_percentage: Option<f64>,
    pub breakdown: Option<BTreeMap<String, f64>>,
    pub green_pixels: Option<u64>,
    pub total_pixels: Option<u64>,
    pub visualization_ref: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> AnalysisJob {
        AnalysisJob::new(
            "Koramangala, Bengaluru",
            1000,
            vec!["restaurant".to_string(), "park".to_string()],
            false,
            true,
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = sample_job();
        job.start("Geocoding address").unwrap();
        job.checkpoint(40, "Amenities fetched").unwrap();
        job.checkpoint(10, "Stale write").unwrap();
        assert_eq!(job.progress, 40);
    }

    #[test]
    fn test_checkpoint_caps_below_100() {
        let mut job = sample_job();
        job.start("Geocoding address").unwrap();
        job.checkpoint(100, "Almost").unwrap();
        assert_eq!(job.progress, 99);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_checkpoint_requires_processing() {
        let mut job = sample_job();
        assert_eq!(
            job.checkpoint(10, "too early"),
            Err(JobStateError::NotProcessing(JobStatus::Pending))
        );
    }

    #[test]
    fn test_complete_sets_terminal_fields() {
        let mut job = sample_job();
        job.start("Geocoding address").unwrap();
        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        assert!(job.result().is_some());
    }

    #[test]
    fn test_fail_sets_error_and_progress() {
        let mut job = sample_job();
        job.start("Geocoding address").unwrap();
        job.fail("address not found").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.error.as_deref(), Some("address not found"));
        assert!(job.result().is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = sample_job();
        job.start("Geocoding address").unwrap();
        job.fail("boom").unwrap();
        assert_eq!(job.complete(), Err(JobStateError::Terminal(JobStatus::Failed)));
        assert_eq!(job.start("again"), Err(JobStateError::Terminal(JobStatus::Failed)));
        assert_eq!(
            job.checkpoint(50, "late"),
            Err(JobStateError::Terminal(JobStatus::Failed))
        );
    }

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("unknown".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_green_space_job_result_shape() {
        let mut job = AnalysisJob::green_space("Cubbon Park", 800);
        assert_eq!(job.kind, AnalysisKind::GreenSpace);
        assert!(job.amenity_types.is_empty());
        assert!(!job.generate_map);
        assert!(job.result_json().is_none());

        job.start("Geocoding address").unwrap();
        job.green_space_percentage = Some(62.5);
        job.complete().unwrap();

        let result = job.result_json().unwrap();
        assert_eq!(result["green_space_percentage"], 62.5);
        assert_eq!(result["radius_m"], 800);
        assert!(result.get("walk_score").is_none());
    }

    #[test]
    fn test_kind_defaults_to_neighborhood() {
        let mut value = serde_json::to_value(sample_job()).unwrap();
        value.as_object_mut().unwrap().remove("kind");
        let job: AnalysisJob = serde_json::from_value(value).unwrap();
        assert_eq!(job.kind, AnalysisKind::Neighborhood);
        assert_eq!("green_space".parse::<AnalysisKind>().unwrap(), AnalysisKind::GreenSpace);
    }

    #[test]
    fn test_total_amenities_counts_all_categories() {
        let mut job = sample_job();
        let poi = |name: &str| PointOfInterest {
            name: name.to_string(),
            distance_m: 100.0,
            coordinates: None,
        };
        job.amenities
            .insert("restaurant".into(), vec![poi("A"), poi("B"), poi("C")]);
        job.amenities.insert("park".into(), vec![poi("P"), poi("Q")]);
        assert_eq!(job.total_amenities(), 5);
    }
}
