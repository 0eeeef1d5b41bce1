pub mod aggregator;
pub mod protocol;

pub use aggregator::{AdminAggregator, Aggregate, NodeResponse};
pub use protocol::{AdminCommand, AdminReply, InfoResponse};
