//! Opening per-database connections.
//!
//! `Connector` and `TargetConnection` are the seam between the dispatcher and
//! the MySQL driver; `MySqlConnector` is the real implementation.

use super::types::{ResultRow, Value};
use crate::config::DatabaseSettings;
use crate::error::{DbError, TransportError};
use crate::services::transport::{Transport, TransportRelay};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Row};
use std::sync::Arc;

/// Opens connections, each scoped to one database.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: TargetConnection;

    /// `None` opens the server's default database (used for enumeration).
    async fn open(&self, database: Option<&str>) -> Result<Self::Connection, DbError>;
}

/// A connection owned by exactly one task.
#[async_trait]
pub trait TargetConnection: Send + 'static {
    /// Run `query` and stream its rows in scan order.
    ///
    /// An error before the first row is `DbError::Execute`; an error after
    /// rows started arriving is `DbError::Scan`.
    fn fetch<'c>(&'c mut self, query: &'c str) -> BoxStream<'c, Result<ResultRow, DbError>>;

    async fn close(self);
}

pub struct MySqlConnector {
    options: MySqlConnectOptions,
    relay: Option<TransportRelay>,
}

impl MySqlConnector {
    /// Prepare connections to the server in `settings` through `transport`.
    ///
    /// A passthrough transport lets the driver connect directly; any other
    /// transport is bridged through a loopback relay that lives as long as
    /// the connector.
    pub async fn new(
        settings: &DatabaseSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let (host, port, relay) = if transport.is_passthrough() {
            (settings.host.clone(), settings.port, None)
        } else {
            let relay = TransportRelay::start(transport, settings.addr()).await?;
            let local = relay.local_addr();
            (local.ip().to_string(), local.port(), Some(relay))
        };

        let options = connect_options(settings, &host, port);

        tracing::debug!(
            "MySQL connector for {} via {}:{}",
            settings.addr(),
            host,
            port
        );

        Ok(Self { options, relay })
    }
}

/// Driver options that leave the server's session settings alone, so queries
/// run exactly as they would in the `mysql` client: no `PIPES_AS_CONCAT` or
/// `NO_ENGINE_SUBSTITUTION` added to `sql_mode`, and no forced `time_zone`.
fn connect_options(settings: &DatabaseSettings, host: &str, port: u16) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .username(&settings.user)
        .password(&settings.password)
        .pipes_as_concat(false)
        .no_engine_substitution(false)
        .timezone(None::<String>)
        .disable_statement_logging();
    match &settings.database {
        Some(database) => options.database(database),
        None => options,
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Connection = MySqlTarget;

    async fn open(&self, database: Option<&str>) -> Result<MySqlTarget, DbError> {
        let options = match database {
            Some(database) => self.options.clone().database(database),
            None => self.options.clone(),
        };
        match MySqlConnection::connect_with(&options).await {
            Ok(conn) => Ok(MySqlTarget { conn }),
            Err(e) => match self.relay.as_ref().and_then(TransportRelay::take_dial_failure) {
                Some(failure) => {
                    tracing::debug!("Driver error caused by failed dial: {}", e);
                    Err(DbError::Transport(failure))
                }
                None => Err(DbError::Connect(e)),
            },
        }
    }
}

pub struct MySqlTarget {
    conn: MySqlConnection,
}

#[async_trait]
impl TargetConnection for MySqlTarget {
    fn fetch<'c>(&'c mut self, query: &'c str) -> BoxStream<'c, Result<ResultRow, DbError>> {
        // Text protocol, so every column arrives as its textual bytes.
        let mut rows_seen = false;
        sqlx::raw_sql(query)
            .fetch(&mut self.conn)
            .map(move |item| match item {
                Ok(row) => {
                    rows_seen = true;
                    decode_row(&row).map_err(DbError::Scan)
                }
                Err(e) if rows_seen => Err(DbError::Scan(e)),
                Err(e) => Err(DbError::Execute(e)),
            })
            .boxed()
    }

    async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!("Error closing MySQL connection: {}", e);
        }
    }
}

fn decode_row(row: &MySqlRow) -> Result<ResultRow, sqlx::Error> {
    (0..row.len())
        .map(|i| {
            row.try_get_unchecked::<Option<Vec<u8>>, _>(i)
                .map(Value::from_raw)
        })
        .collect()
}
