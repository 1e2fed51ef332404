//! Request-origin histograms served by the location monitor on each node.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use swarmgrid_core::config::LocationsConfig;
use swarmgrid_core::{ConfigError, RequestLocationSource};
use swarmgrid_state::HostAddress;

use crate::error::RemoteError;
use crate::http;

pub struct HttpLocations {
    port: u16,
    path: String,
    timeout: Duration,
}

impl HttpLocations {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            path: path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LocationsConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.port, config.path.clone(), config.timeout()?))
    }
}

#[async_trait]
impl RequestLocationSource for HttpLocations {
    async fn location_requests(&self, node: &HostAddress) -> anyhow::Result<HashMap<String, u64>> {
        let address = format!("{}:{}", node.public_ip, self.port);
        let body = http::get(&address, &self.path, self.timeout).await?;
        let requests = serde_json::from_slice(&body).map_err(|e| RemoteError::Decode {
            source_name: format!("location monitor at {address}"),
            reason: e.to_string(),
        })?;
        Ok(requests)
    }
}
