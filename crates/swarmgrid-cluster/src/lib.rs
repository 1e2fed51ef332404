//! swarmgrid-cluster: swarm membership for SwarmGrid.
//!
//! # Architecture
//!
//! ```text
//! SwarmManager
//!   ├── init()     → cluster-init on the bootstrap host, label, overlay network
//!   ├── join()     → stale leave, role token from the leader, join, label
//!   ├── rejoin()   → remove the stale record, join again with the same role
//!   ├── leave()    → demote a manager first while other managers exist
//!   └── destroy()  → every non-leader leaves in parallel, the leader last
//!
//! NodeRegistry
//!   ├── Persisted node records (versioned, stale writes rejected)
//!   └── Engine-side updates (labels, role, availability, removal)
//! ```

pub mod error;
pub mod registry;
pub mod swarm;

pub use error::{ClusterError, ClusterResult};
pub use registry::NodeRegistry;
pub use swarm::{SwarmManager, TeardownReport, host_labels, parse_init_output};
