//! Request-location sampling.
//!
//! Every ready node runs a request-location monitor reporting how many
//! requests each service received there recently. Polling all nodes in
//! parallel turns those counts into weighted locations for the midpoint.

use std::collections::HashMap;
use std::sync::Arc;

use swarmgrid_core::RequestLocationSource;
use swarmgrid_state::{Coordinates, Node};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::geo::{LocationWeight, weighted_midpoint};

#[derive(Clone)]
pub struct LocationSampler {
    source: Arc<dyn RequestLocationSource>,
}

impl LocationSampler {
    pub fn new(source: Arc<dyn RequestLocationSource>) -> Self {
        Self { source }
    }

    /// Request histograms of every ready node with known coordinates.
    ///
    /// Nodes are polled concurrently; a node that fails is logged and
    /// contributes nothing, without affecting the others.
    pub async fn poll(&self, nodes: &[Node]) -> Vec<(Coordinates, HashMap<String, u64>)> {
        let mut tasks = JoinSet::new();
        for node in nodes.iter().filter(|n| n.is_ready()) {
            let Some(coordinates) = node.coordinates() else {
                continue;
            };
            let source = self.source.clone();
            let address = node.host_address();
            let node_id = node.id.clone();
            tasks.spawn(async move {
                let result = source.location_requests(&address).await;
                (node_id, coordinates, result)
            });
        }

        let mut histograms = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, coordinates, Ok(counts))) => histograms.push((coordinates, counts)),
                Ok((node_id, _, Err(e))) => {
                    warn!(%node_id, error = %e, "request locations unavailable");
                }
                Err(e) => warn!(error = %e, "request location task failed"),
            }
        }
        histograms
    }

    /// Weighted locations for one service, or for all traffic when `None`.
    pub async fn samples(&self, nodes: &[Node], service: Option<&str>) -> Vec<LocationWeight> {
        self.poll(nodes)
            .await
            .into_iter()
            .filter_map(|(coordinates, counts)| {
                let weight: u64 = match service {
                    Some(s) => counts.get(s).copied().unwrap_or(0),
                    None => counts.values().sum(),
                };
                (weight > 0).then_some(LocationWeight {
                    coordinates,
                    weight: weight as f64,
                })
            })
            .collect()
    }

    /// Demand midpoint for a service; `None` when no demand was observed.
    pub async fn midpoint(&self, nodes: &[Node], service: Option<&str>) -> Option<Coordinates> {
        let samples = self.samples(nodes, service).await;
        let midpoint = weighted_midpoint(&samples);
        debug!(service = service.unwrap_or("*"), samples = samples.len(), ?midpoint, "demand midpoint");
        midpoint
    }
}
