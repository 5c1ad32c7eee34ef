//! Database side of a run: enumerating targets and dispatching the query.

mod barrier;
mod connector;
mod dispatch;
mod enumerate;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use barrier::{BarrierError, Completion, CompletionBarrier, CompletionSignal};
pub use connector::{Connector, MySqlConnector, MySqlTarget, TargetConnection};
pub use dispatch::{DispatchReport, Dispatcher, Strategy};
pub use enumerate::{DatabaseFilter, LIST_DATABASES, enumerate, list_targets};
pub use types::{ResultRow, Value};
