use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{AnalysisResult, Coordinates, GreenSpaceResult, JobStatus};

/// Categories searched when a request does not name any.
pub const DEFAULT_AMENITY_TYPES: [&str; 6] =
    ["restaurant", "cafe", "school", "hospital", "park", "supermarket"];

/// Request to analyze the neighborhood around an address.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalysisRequest {
    #[garde(length(min = 1, max = 500), custom(not_blank))]
    pub address: String,

    #[serde(default = "default_radius")]
    #[garde(range(min = 100, max = 5000))]
    pub radius_m: u32,

    #[serde(default = "default_amenity_types")]
    #[garde(length(min = 1, max = 20), custom(valid_category_tags))]
    pub amenity_types: Vec<String>,

    #[serde(default)]
    #[garde(skip)]
    pub include_buildings: bool,

    #[serde(default = "default_generate_map")]
    #[garde(skip)]
    pub generate_map: bool,
}

/// Request for a green-space-only analysis around an address.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GreenSpaceRequest {
    #[garde(length(min = 1, max = 500), custom(not_blank))]
    pub address: String,

    #[serde(default = "default_green_space_radius")]
    #[garde(range(min = 100, max = 4000))]
    pub radius_m: u32,
}

fn default_radius() -> u32 {
    1000
}

fn default_green_space_radius() -> u32 {
    500
}

fn default_amenity_types() -> Vec<String> {
    DEFAULT_AMENITY_TYPES.iter().map(|s| s.to_string()).collect()
}

fn default_generate_map() -> bool {
    true
}

#[allow(clippy::ptr_arg)]
fn not_blank(value: &String, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("address must not be blank"));
    }
    Ok(())
}

/// Category tags end up inside provider queries, so only `[a-z_]` is accepted.
#[allow(clippy::ptr_arg)]
fn valid_category_tags(value: &Vec<String>, _ctx: &()) -> garde::Result {
    for tag in value {
        let ok = !tag.is_empty()
            && tag.len() <= 40
            && tag.chars().all(|c| c.is_ascii_lowercase() || c == '_');
        if !ok {
            return Err(garde::Error::new(format!("invalid amenity type: {:?}", tag)));
        }
    }
    Ok(())
}

/// Response after submitting an analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub analysis_id: Uuid,
    pub task_id: String,
    pub address: String,
    pub status: String,
    pub message: String,
}

/// Which lookup strategy answered a status query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedVia {
    InProcess,
    Distributed,
    BareJobId,
}

/// Response for polling a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub analysis_id: Option<Uuid>,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resolved_via: ResolvedVia,
}

/// Row of the recent-analyses listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentAnalysis {
    pub analysis_id: Uuid,
    pub address: String,
    pub walk_score: Option<f64>,
    pub total_amenities: usize,
    pub amenity_categories: usize,
    pub green_space_percentage: Option<f64>,
    pub map_available: bool,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&AnalysisResult> for RecentAnalysis {
    fn from(result: &AnalysisResult) -> Self {
        Self {
            analysis_id: result.analysis_id,
            address: result.address.clone(),
            walk_score: result.walk_score,
            total_amenities: result.total_amenities,
            amenity_categories: result.amenities.len(),
            green_space_percentage: result.green_space_percentage,
            map_available: result.map_ref.is_some(),
            completed_at: result.completed_at,
        }
    }
}

/// Row of the recent green-space listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentGreenSpace {
    pub analysis_id: Uuid,
    pub address: String,
    pub coordinates: Option<Coordinates>,
    pub radius_m: u32,
    pub green_space_percentage: Option<f64>,
    pub breakdown: Option<std::collections::BTreeMap<String, f64>>,
    pub visualization_ref: Option<String>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<GreenSpaceResult> for RecentGreenSpace {
    fn from(result: GreenSpaceResult) -> Self {
        Self {
            analysis_id: result.analysis_id,
            address: result.address,
            coordinates: result.coordinates,
            radius_m: result.radius_m,
            green_space_percentage: result.green_space_percentage,
            breakdown: result.breakdown,
            visualization_ref: result.visualization_ref,
            completed_at: result.completed_at,
        }
    }
}
