//! Fan one query out over every target database.

use super::barrier::CompletionBarrier;
use super::connector::{Connector, TargetConnection};
use crate::error::{DbError, RunError};
use crate::output::RowSink;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// How targets are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// One target at a time, in enumeration order
    #[default]
    Sequential,
    /// One task per target, all started before any is awaited
    Concurrent,
}

impl Strategy {
    pub fn from_threaded(threaded: bool) -> Self {
        if threaded {
            Strategy::Concurrent
        } else {
            Strategy::Sequential
        }
    }
}

/// What a finished dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Targets in the order they finished
    pub completed: Vec<String>,
    /// Targets whose rows were cut short by a scan error
    pub scan_failures: Vec<String>,
    pub rows: u64,
}

impl DispatchReport {
    fn record(&mut self, database: String, summary: TargetSummary) {
        self.rows += summary.rows;
        if summary.scan_failed {
            self.scan_failures.push(database.clone());
        }
        self.completed.push(database);
    }
}

#[derive(Debug, Clone, Copy)]
struct TargetSummary {
    rows: u64,
    scan_failed: bool,
}

pub struct Dispatcher<C> {
    connector: Arc<C>,
    strategy: Strategy,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: Arc<C>, strategy: Strategy) -> Self {
        Self {
            connector,
            strategy,
        }
    }

    /// Run `query` against every target and hand each row to `sink`.
    ///
    /// A connection or query failure on any target ends the whole dispatch
    /// with that error. A row scan failure only ends that target's rows.
    pub async fn dispatch(
        &self,
        targets: &[String],
        query: &str,
        sink: Arc<dyn RowSink>,
    ) -> Result<DispatchReport, RunError> {
        tracing::info!(
            "Dispatching query to {} databases ({:?})",
            targets.len(),
            self.strategy
        );
        let report = match self.strategy {
            Strategy::Sequential => self.dispatch_sequential(targets, query, sink).await?,
            Strategy::Concurrent => self.dispatch_concurrent(targets, query, sink).await?,
        };
        tracing::info!(
            "Finished {} databases, {} rows, {} cut short",
            report.completed.len(),
            report.rows,
            report.scan_failures.len()
        );
        Ok(report)
    }

    async fn dispatch_sequential(
        &self,
        targets: &[String],
        query: &str,
        sink: Arc<dyn RowSink>,
    ) -> Result<DispatchReport, RunError> {
        let mut report = DispatchReport::default();
        for database in targets {
            let summary = run_target(self.connector.as_ref(), database, query, sink.as_ref()).await?;
            report.record(database.clone(), summary);
        }
        Ok(report)
    }

    async fn dispatch_concurrent(
        &self,
        targets: &[String],
        query: &str,
        sink: Arc<dyn RowSink>,
    ) -> Result<DispatchReport, RunError> {
        let query: Arc<str> = Arc::from(query);
        let (mut barrier, signal) = CompletionBarrier::new(targets.len());

        let mut tasks = AbortOnDrop(Vec::with_capacity(targets.len()));
        for database in targets {
            let connector = self.connector.clone();
            let query = query.clone();
            let sink = sink.clone();
            let signal = signal.clone();
            let database = database.clone();
            tasks.0.push(tokio::spawn(async move {
                let outcome =
                    run_target(connector.as_ref(), &database, &query, sink.as_ref()).await;
                signal.complete(database, outcome);
            }));
        }
        drop(signal);

        let mut report = DispatchReport::default();
        while let Some(completion) = barrier.next().await {
            let completion = completion?;
            // Returning early drops `tasks`, which aborts the siblings.
            let summary = completion.outcome?;
            report.record(completion.database, summary);
        }
        Ok(report)
    }
}

/// Aborts any still-running tasks when dropped.
struct AbortOnDrop(Vec<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

async fn run_target<C: Connector>(
    connector: &C,
    database: &str,
    query: &str,
    sink: &dyn RowSink,
) -> Result<TargetSummary, RunError> {
    tracing::debug!("Opening connection to {}", database);
    let mut connection = connector
        .open(Some(database))
        .await
        .map_err(|source| RunError::dispatch(database, source))?;

    let summary = stream_rows(&mut connection, database, query, sink).await;
    connection.close().await;
    tracing::debug!("Closed connection to {}", database);
    summary
}

async fn stream_rows<T: TargetConnection>(
    connection: &mut T,
    database: &str,
    query: &str,
    sink: &dyn RowSink,
) -> Result<TargetSummary, RunError> {
    let mut rows = connection.fetch(query);
    let mut summary = TargetSummary {
        rows: 0,
        scan_failed: false,
    };

    while let Some(row) = rows.next().await {
        match row {
            Ok(row) => {
                sink.emit(database, &row);
                summary.rows += 1;
            }
            Err(DbError::Scan(e)) => {
                tracing::warn!("{}: failed to scan row, skipping the rest: {}", database, e);
                summary.scan_failed = true;
                break;
            }
            Err(source) => {
                return Err(RunError::dispatch(database, source));
            }
        }
    }

    Ok(summary)
}
