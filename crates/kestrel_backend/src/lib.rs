pub mod connector;
pub mod gateway;
pub mod pool;

pub use connector::{BackendConnection, Connector, NativeConnector, QueryOutput};
pub use gateway::BackendGateway;
pub use pool::{BackendPool, PoolSettings, PoolStats, PooledSlot, HEALTH_PROBE_SQL};
