pub mod collaborators;
pub mod config;
pub mod duration;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::*;
pub use config::{ConfigError, SwarmgridConfig};
pub use duration::parse_duration;
pub use types::*;
