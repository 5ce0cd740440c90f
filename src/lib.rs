//! Neighborhood insight service
//!
//! Geocodes an address, gathers nearby amenities, scores walkability and
//! measures green-space coverage from map imagery. A green-space-only
//! analysis is offered as well. Analyses run as tracked jobs, either in the
//! API process or on redis-fed workers, and are polled through a single
//! task-status endpoint.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
