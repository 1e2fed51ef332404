//! Placer: chooses the destination host for a launch.

use swarmgrid_state::{Coordinates, Node};
use tracing::debug;

use crate::geo::haversine_km;
use crate::locations::LocationSampler;

/// The ready node closest to `target`, skipping `exclude`d node ids and
/// nodes without coordinates.
pub fn closest_node<'a>(nodes: &'a [Node], target: Coordinates, exclude: &[&str]) -> Option<&'a Node> {
    nodes
        .iter()
        .filter(|n| n.is_ready() && !exclude.contains(&n.id.as_str()))
        .filter_map(|n| n.coordinates().map(|c| (n, haversine_km(c, target))))
        .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)))
        .map(|(n, _)| n)
}

#[derive(Clone)]
pub struct Placer {
    locations: LocationSampler,
}

impl Placer {
    pub fn new(locations: LocationSampler) -> Self {
        Self { locations }
    }

    /// Pick a host for a new instance of `service`.
    ///
    /// Uses the service's demand midpoint; without observed demand, falls
    /// back to `anchor` (e.g. the overloaded host's position); without
    /// either, the first eligible ready node by id.
    pub async fn choose(
        &self,
        nodes: &[Node],
        service: Option<&str>,
        exclude: &[&str],
        anchor: Option<Coordinates>,
    ) -> Option<Node> {
        let target = match self.locations.midpoint(nodes, service).await {
            Some(midpoint) => Some(midpoint),
            None => anchor,
        };

        let chosen = match target {
            Some(t) => closest_node(nodes, t, exclude),
            None => None,
        }
        .or_else(|| {
            nodes
                .iter()
                .filter(|n| n.is_ready() && !exclude.contains(&n.id.as_str()))
                .min_by(|a, b| a.id.cmp(&b.id))
        });

        debug!(
            service = service.unwrap_or("*"),
            ?target,
            chosen = chosen.map(|n| n.id.as_str()).unwrap_or("none"),
            "placement chosen"
        );
        chosen.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use swarmgrid_core::testing::FakeLocations;
    use swarmgrid_state::{NodeAvailability, NodeRole, NodeState, labels};

    fn node(id: &str, ip: &str, coords: Option<(f64, f64)>) -> Node {
        let mut node_labels = BTreeMap::new();
        if let Some((lat, lon)) = coords {
            node_labels.insert(
                labels::COORDINATES.to_string(),
                format!(r#"{{"latitude":{lat},"longitude":{lon}}}"#),
            );
        }
        Node {
            id: id.into(),
            hostname: id.into(),
            address: ip.into(),
            role: NodeRole::Worker,
            availability: NodeAvailability::Active,
            state: NodeState::Ready,
            manager_status: None,
            labels: node_labels,
            version: 1,
        }
    }

    fn cluster() -> Vec<Node> {
        vec![
            node("lisbon", "10.0.0.1", Some((38.72, -9.14))),
            node("porto", "10.0.0.2", Some((41.16, -8.63))),
            node("berlin", "10.0.0.3", Some((52.52, 13.40))),
        ]
    }

    #[test]
    fn closest_respects_exclusions_and_readiness() {
        let mut nodes = cluster();
        let near_porto = Coordinates::new(41.0, -8.6);
        assert_eq!(closest_node(&nodes, near_porto, &[]).unwrap().id, "porto");
        assert_eq!(closest_node(&nodes, near_porto, &["porto"]).unwrap().id, "lisbon");

        nodes[0].availability = NodeAvailability::Drain;
        assert_eq!(
            closest_node(&nodes, near_porto, &["porto"]).unwrap().id,
            "berlin"
        );
    }

    #[tokio::test]
    async fn demand_decides_destination() {
        let source = Arc::new(FakeLocations::new());
        source.set("10.0.0.3", "web", 100);
        source.set("10.0.0.1", "web", 1);
        let placer = Placer::new(LocationSampler::new(source));

        let chosen = placer.choose(&cluster(), Some("web"), &[], None).await.unwrap();
        assert_eq!(chosen.id, "berlin");
    }

    #[tokio::test]
    async fn anchor_then_any_ready_node() {
        let placer = Placer::new(LocationSampler::new(Arc::new(FakeLocations::new())));
        let anchor = Some(Coordinates::new(38.7, -9.1));
        let chosen = placer
            .choose(&cluster(), Some("web"), &["lisbon"], anchor)
            .await
            .unwrap();
        assert_eq!(chosen.id, "porto");

        let bare = vec![node("b", "10.0.0.5", None), node("a", "10.0.0.4", None)];
        let chosen = placer.choose(&bare, None, &[], None).await.unwrap();
        assert_eq!(chosen.id, "a");
        assert!(placer.choose(&bare, None, &["a", "b"], None).await.is_none());
    }
}
