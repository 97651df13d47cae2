//! Partition ownership: routing, placement, membership and the engine
//! lifecycle that ties them together

pub mod engine;
pub mod membership;
pub mod placement;
pub mod routing;

pub use engine::{EngineState, ExecutorEngine};
pub use membership::{MembershipEvent, MembershipWatcher, Reassignment};
pub use placement::PlacementStrategy;
pub use routing::{Partition, RoutingTable};
