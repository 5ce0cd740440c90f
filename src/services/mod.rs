pub mod amenities;
pub mod dispatcher;
pub mod geocoder;
pub mod green_space;
pub mod job_store;
pub mod map_render;
pub mod pipeline;
pub mod queue;
pub mod raster;
pub mod status;
pub mod tiles;
pub mod walkability;
