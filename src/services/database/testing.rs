//! In-memory stand-ins for a MySQL server, used by the dispatcher tests.

use super::connector::{Connector, TargetConnection};
use super::enumerate::LIST_DATABASES;
use super::types::{ResultRow, Value};
use crate::error::DbError;
use crate::output::RowSink;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(Option<String>),
    Closed(Option<String>),
}

#[derive(Debug, Clone)]
pub enum FakeItem {
    Row(ResultRow),
    ScanError,
    ExecuteError,
}

impl FakeItem {
    fn into_result(self) -> Result<ResultRow, DbError> {
        match self {
            FakeItem::Row(row) => Ok(row),
            FakeItem::ScanError => Err(DbError::Scan(sqlx::Error::Protocol(
                "malformed row".into(),
            ))),
            FakeItem::ExecuteError => Err(DbError::Execute(sqlx::Error::Protocol(
                "syntax error".into(),
            ))),
        }
    }
}

pub fn row(values: &[&str]) -> ResultRow {
    values.iter().map(|v| Value::from(*v)).collect()
}

#[derive(Default)]
pub struct FakeServer {
    databases: Vec<String>,
    results: HashMap<String, Vec<FakeItem>>,
    delays: HashMap<String, Duration>,
    failing_opens: HashSet<Option<String>>,
    fail_listing: bool,
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeServer {
    pub fn new(databases: &[&str]) -> Self {
        Self {
            databases: databases.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_items(mut self, database: &str, items: Vec<FakeItem>) -> Self {
        self.results.insert(database.to_string(), items);
        self
    }

    pub fn with_rows(self, database: &str, rows: Vec<ResultRow>) -> Self {
        self.with_items(database, rows.into_iter().map(FakeItem::Row).collect())
    }

    pub fn with_delay(mut self, database: &str, delay: Duration) -> Self {
        self.delays.insert(database.to_string(), delay);
        self
    }

    pub fn fail_open(mut self, database: Option<&str>) -> Self {
        self.failing_opens.insert(database.map(str::to_string));
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Opened(Some(db)) => Some(db),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connector for FakeServer {
    type Connection = FakeConnection;

    async fn open(&self, database: Option<&str>) -> Result<FakeConnection, DbError> {
        let database = database.map(str::to_string);
        if self.failing_opens.contains(&database) {
            return Err(DbError::Connect(sqlx::Error::Protocol(
                "access denied".into(),
            )));
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::Opened(database.clone()));

        let key = database.clone().unwrap_or_default();
        Ok(FakeConnection {
            items: self.results.get(&key).cloned().unwrap_or_default(),
            delay: self.delays.get(&key).copied(),
            databases: self.databases.clone(),
            fail_listing: self.fail_listing,
            events: self.events.clone(),
            database,
        })
    }
}

pub struct FakeConnection {
    database: Option<String>,
    databases: Vec<String>,
    items: Vec<FakeItem>,
    delay: Option<Duration>,
    fail_listing: bool,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl TargetConnection for FakeConnection {
    fn fetch<'c>(&'c mut self, query: &'c str) -> BoxStream<'c, Result<ResultRow, DbError>> {
        let items = if query != LIST_DATABASES {
            self.items.clone()
        } else if self.fail_listing {
            vec![FakeItem::ExecuteError]
        } else {
            self.databases
                .iter()
                .map(|name| FakeItem::Row(row(&[name.as_str()])))
                .collect()
        };
        let delay = self.delay;

        stream::iter(items)
            .then(move |item| async move {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => tokio::task::yield_now().await,
                }
                item.into_result()
            })
            .boxed()
    }

    async fn close(self) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Closed(self.database.clone()));
    }
}

/// Keeps every emitted row in arrival order.
#[derive(Default)]
pub struct CollectingSink {
    rows: Mutex<Vec<(String, ResultRow)>>,
}

impl CollectingSink {
    pub fn rows(&self) -> Vec<(String, ResultRow)> {
        self.rows.lock().unwrap().clone()
    }

    pub fn rows_for(&self, database: &str) -> Vec<ResultRow> {
        self.rows()
            .into_iter()
            .filter(|(db, _)| db == database)
            .map(|(_, row)| row)
            .collect()
    }

    pub fn database_order(&self) -> Vec<String> {
        self.rows().into_iter().map(|(db, _)| db).collect()
    }
}

impl RowSink for CollectingSink {
    fn emit(&self, database: &str, row: &ResultRow) {
        self.rows
            .lock()
            .unwrap()
            .push((database.to_string(), row.clone()));
    }
}
