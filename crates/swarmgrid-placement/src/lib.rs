//! SwarmGrid geographic placement.
//!
//! Decisions that need a destination host pick it by demand: request
//! counts polled from every ready node are used as weights for a
//! spherical midpoint, and the ready node closest to that midpoint wins.
//!
//! # Components
//!
//! - **`geo`**: weighted spherical midpoint and great-circle distance
//! - **`locations`**: parallel polling of request-origin histograms
//! - **`placer`**: closest-node choice with exclusions and fallback

pub mod geo;
pub mod locations;
pub mod placer;

pub use geo::{LocationWeight, haversine_km, weighted_midpoint};
pub use locations::LocationSampler;
pub use placer::{Placer, closest_node};
