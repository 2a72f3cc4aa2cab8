pub mod driver;
pub mod error;
pub mod manager;
pub mod pool;

pub use driver::{BoxFuture, Connector, PooledIo, SqlxConnector, SqlxIo};
pub use error::PoolError;
pub use manager::PoolManager;
pub use pool::{IoGuard, Pool, PoolConfig, PooledConnection};
