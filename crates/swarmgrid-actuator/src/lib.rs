//! swarmgrid-actuator: applies actionable decisions.
//!
//! | Target    | ScaleUp / Replicate        | ScaleDown / Stop        | Migrate                  |
//! |-----------|----------------------------|-------------------------|--------------------------|
//! | Service   | launch where demand is     | stop the newest replica | move one replica         |
//! | Container | launch beside it           | stop it                 | launch elsewhere, stop   |
//! | Host      | move one container off     | drain, leave the swarm  | move one container off   |
//! | App       | fan out to each service    | fan out                 | fan out                  |
//!
//! A migration always launches the replacement before stopping the
//! original. Orchestration failures are returned, never retried here.

pub mod actuator;
pub mod error;
pub mod hosts;

pub use actuator::{Action, Actuator};
pub use error::{ActuatorError, ActuatorResult};
pub use hosts::{CloudProvisioning, HostLimits, HostLookup};
