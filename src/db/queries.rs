use std::collections::BTreeMap;

use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{AmenityMap, AnalysisJob, AnalysisKind, Coordinates, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, kind, address, radius_m, amenity_types, include_buildings, generate_map,
    status, progress, message, latitude, longitude, amenities, walk_score,
    green_space_percentage, green_space_breakdown, green_pixels, total_pixels,
    visualization_ref, building_count, map_ref, error,
    created_at, updated_at, completed_at
"#;

/// Insert a new analysis job
pub async fn create_job(pool: &PgPool, job: &AnalysisJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (
            id, kind, address, radius_m, amenity_types, include_buildings, generate_map,
            status, progress, message, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(job.id)
    .bind(job.kind.to_string())
    .bind(&job.address)
    .bind(job.radius_m as i32)
    .bind(Json(&job.amenity_types))
    .bind(job.include_buildings)
    .bind(job.generate_map)
    .bind(job.status.to_string())
    .bind(job.progress as i16)
    .bind(&job.message)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<AnalysisJob>, sqlx::Error> {
    let sql = format!("SELECT {} FROM analysis_jobs WHERE id = $1", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Replace every mutable field of a job in one statement.
///
/// Rows already in a terminal state are left untouched; the returned count is
/// zero in that case (and when the job does not exist).
pub async fn update_job(pool: &PgPool, job: &AnalysisJob) -> Result<u64, sqlx::Error> {
    let (latitude, longitude) = match job.coordinates {
        Some(c) => (Some(c.latitude), Some(c.longitude)),
        None => (None, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = $2,
            progress = $3,
            message = $4,
            latitude = $5,
            longitude = $6,
            amenities = $7,
            walk_score = $8,
            green_space_percentage = $9,
            green_space_breakdown = $10,
            green_pixels = $11,
            total_pixels = $12,
            visualization_ref = $13,
            building_count = $14,
            map_ref = $15,
            error = $16,
            updated_at = $17,
            completed_at = $18
        WHERE id = $1
          AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(job.id)
    .bind(job.status.to_string())
    .bind(job.progress as i16)
    .bind(&job.message)
    .bind(latitude)
    .bind(longitude)
    .bind(Json(&job.amenities))
    .bind(job.walk_score)
    .bind(job.green_space_percentage)
    .bind(job.green_space_breakdown.as_ref().map(Json))
    .bind(job.green_pixels.map(|v| v as i64))
    .bind(job.total_pixels.map(|v| v as i64))
    .bind(&job.visualization_ref)
    .bind(job.building_count.map(|v| v as i32))
    .bind(&job.map_ref)
    .bind(&job.error)
    .bind(job.updated_at)
    .bind(job.completed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Completed jobs of one kind, most recently completed first
pub async fn list_recent_completed(
    pool: &PgPool,
    kind: AnalysisKind,
    limit: i64,
) -> Result<Vec<AnalysisJob>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT {}
        FROM analysis_jobs
        WHERE kind = $1 AND status = 'completed'
        ORDER BY completed_at DESC
        LIMIT $2
        "#,
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(kind.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(job_from_row).collect()
}

fn job_from_row(r: &PgRow) -> Result<AnalysisJob, sqlx::Error> {
    let status_str: String = r.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let kind_str: String = r.try_get("kind")?;
    let kind = kind_str
        .parse::<AnalysisKind>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let latitude: Option<f64> = r.try_get("latitude")?;
    let longitude: Option<f64> = r.try_get("longitude")?;
    let coordinates = latitude
        .zip(longitude)
        .map(|(lat, lon)| Coordinates::new(lat, lon));

    let amenity_types: Json<Vec<String>> = r.try_get("amenity_types")?;
    let amenities: Json<AmenityMap> = r.try_get("amenities")?;
    let breakdown: Option<Json<BTreeMap<String, f64>>> = r.try_get("green_space_breakdown")?;
    let radius_m: i32 = r.try_get("radius_m")?;
    let progress: i16 = r.try_get("progress")?;
    let green_pixels: Option<i64> = r.try_get("green_pixels")?;
    let total_pixels: Option<i64> = r.try_get("total_pixels")?;
    let building_count: Option<i32> = r.try_get("building_count")?;

    Ok(AnalysisJob {
        id: r.try_get("id")?,
        kind,
        address: r.try_get("address")?,
        radius_m: radius_m.max(0) as u32,
        amenity_types: amenity_types.0,
        include_buildings: r.try_get("include_buildings")?,
        generate_map: r.try_get("generate_map")?,
        status,
        progress: progress.clamp(0, 100) as u8,
        message: r.try_get("message")?,
        coordinates,
        amenities: amenities.0,
        walk_score: r.try_get("walk_score")?,
        green_space_percentage: r.try_get("green_space_percentage")?,
        green_space_breakdown: breakdown.map(|b| b.0),
        green_pixels: green_pixels.map(|v| v.max(0) as u64),
        total_pixels: total_pixels.map(|v| v.max(0) as u64),
        visualization_ref: r.try_get("visualization_ref")?,
        building_count: building_count.map(|v| v.max(0) as u32),
        map_ref: r.try_get("map_ref")?,
        error: r.try_get("error")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        completed_at: r.try_get("completed_at")?,
    })
}
