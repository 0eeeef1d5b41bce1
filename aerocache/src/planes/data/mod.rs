pub mod operation;
pub mod read_through;
pub mod single_flight;

pub use operation::CacheMap;
pub use read_through::ReadThroughCache;
pub use single_flight::{Role, SingleFlight};
