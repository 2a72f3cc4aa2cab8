//! Driver seam between the pool and concrete database clients.
//!
//! The pool only needs three things from a connection: make one, probe it,
//! close it. Everything else (query execution) is reached by downcasting
//! the concrete IO type, which keeps the pool free of driver generics.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;

use sqlx::AnyConnection;
use sqlx::Connection;

use quay_core::config::DatabasePoolSettings;

use crate::error::PoolError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A live driver connection owned by the pool.
pub trait PooledIo: Send {
    /// Lightweight liveness probe.
    fn ping(&mut self) -> BoxFuture<'_, Result<(), PoolError>>;

    /// Close the underlying connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Downcast hook for consumers that need the concrete client.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Factory for [`PooledIo`] instances; one per pool.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PooledIo>, PoolError>>;
}

/// sqlx-backed connector. PostgreSQL and MySQL descriptors are served
/// through sqlx's `Any` driver; other kinds are rejected at configure time.
pub struct SqlxConnector {
    url: String,
    probe_query: String,
}

impl SqlxConnector {
    pub fn from_settings(settings: &DatabasePoolSettings) -> Result<Self, PoolError> {
        let scheme = match settings.driver.to_lowercase().as_str() {
            "postgresql" | "postgres" => "postgres",
            "mysql" => "mysql",
            other => return Err(PoolError::UnsupportedDriver(other.to_string())),
        };
        sqlx::any::install_default_drivers();
        Ok(Self {
            url: format!(
                "{scheme}://{}:{}@{}:{}/{}",
                settings.username, settings.password, settings.host, settings.port,
                settings.database
            ),
            probe_query: settings.health_check_query.clone(),
        })
    }
}

impl Connector for SqlxConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PooledIo>, PoolError>> {
        Box::pin(async move {
            let conn = AnyConnection::connect(&self.url)
                .await
                .map_err(|e| PoolError::Driver(e.to_string()))?;
            Ok(Box::new(SqlxIo {
                conn,
                probe_query: self.probe_query.clone(),
            }) as Box<dyn PooledIo>)
        })
    }
}

/// sqlx `Any` connection plus its configured probe statement.
pub struct SqlxIo {
    conn: AnyConnection,
    probe_query: String,
}

impl SqlxIo {
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.conn
    }
}

impl PooledIo for SqlxIo {
    fn ping(&mut self) -> BoxFuture<'_, Result<(), PoolError>> {
        Box::pin(async move {
            sqlx::query(self.probe_query.as_str())
                .execute(&mut self.conn)
                .await
                .map(|_| ())
                .map_err(|e| PoolError::Driver(e.to_string()))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let _ = self.conn.close().await;
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
