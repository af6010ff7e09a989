//! Location resolution
//!
//! Maps free-text location input onto canonical location rows, creating new
//! rows for privileged actors.

pub mod resolver;

pub use resolver::{
    LocationPrediction, LocationResolution, LocationResolver, ResolvedLocation, canonical_row_name,
    predict, resolve,
};

/// Capacity given to lazily created locations
pub const DEFAULT_MAX_CAPACITY: i64 = 550;

/// Zone tag given to lazily created locations
pub const DEFAULT_ZONE: &str = "UNASSIGNED";
