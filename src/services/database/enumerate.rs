//! Discovering which databases a run targets.

use super::connector::{Connector, TargetConnection};
use super::types::Value;
use crate::error::RunError;
use futures::StreamExt;

pub const LIST_DATABASES: &str = "SHOW DATABASES";

/// Name filters applied to the server's database list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseFilter {
    /// Keep only names starting with this; empty keeps everything
    pub prefix: String,
    /// Drop names containing this; empty drops nothing
    pub exclude: String,
}

impl DatabaseFilter {
    pub fn new(prefix: impl Into<String>, exclude: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            exclude: exclude.into(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        let prefixed = self.prefix.is_empty() || name.starts_with(&self.prefix);
        let excluded = !self.exclude.is_empty() && name.contains(&self.exclude);
        prefixed && !excluded
    }

    /// Filter `names`, keeping their order.
    pub fn apply(&self, names: impl IntoIterator<Item = String>) -> Vec<String> {
        names.into_iter().filter(|name| self.matches(name)).collect()
    }
}

/// List the databases visible on `connection` that pass `filter`, in the
/// order the server reports them.
pub async fn enumerate<T: TargetConnection>(
    connection: &mut T,
    filter: &DatabaseFilter,
) -> Result<Vec<String>, RunError> {
    let mut rows = connection.fetch(LIST_DATABASES);
    let mut names = Vec::new();
    while let Some(row) = rows.next().await {
        let row = row.map_err(RunError::enumeration)?;
        if let Some(Value::Text(name)) = row.values().first() {
            names.push(name.clone());
        }
    }
    Ok(filter.apply(names))
}

/// Open an administrative connection, enumerate, and close it again.
pub async fn list_targets<C: Connector>(
    connector: &C,
    filter: &DatabaseFilter,
) -> Result<Vec<String>, RunError> {
    let mut connection = connector.open(None).await.map_err(RunError::enumeration)?;
    let targets = enumerate(&mut connection, filter).await;
    connection.close().await;

    let targets = targets?;
    tracing::info!("Matched {} databases", targets.len());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::testing::{Event, FakeServer};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefix_filter() {
        let filter = DatabaseFilter::new("app_", "");
        assert_eq!(
            filter.apply(names(&["app_1", "app_2", "other"])),
            ["app_1", "app_2"]
        );
    }

    #[test]
    fn test_prefix_and_exclude() {
        let filter = DatabaseFilter::new("app_", "temp");
        assert_eq!(
            filter.apply(names(&["app_1", "app_temp", "app_2"])),
            ["app_1", "app_2"]
        );
    }

    #[test]
    fn test_exclude_without_prefix() {
        let filter = DatabaseFilter::new("", "schema");
        assert_eq!(
            filter.apply(names(&["information_schema", "app_1", "performance_schema", "mysql"])),
            ["app_1", "mysql"]
        );
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let all = names(&["b", "a", "c"]);
        assert_eq!(DatabaseFilter::default().apply(all.clone()), all);
    }

    #[test]
    fn test_result_is_prefix_set_minus_excluded_set() {
        let all = names(&["app_1", "app_x_old", "old_app", "app_2", "appx", "app_old"]);
        let filter = DatabaseFilter::new("app_", "old");

        let prefixed: Vec<_> = all.iter().filter(|n| n.starts_with("app_")).collect();
        let expected: Vec<String> = prefixed
            .into_iter()
            .filter(|n| !n.contains("old"))
            .cloned()
            .collect();
        assert_eq!(filter.apply(all), expected);
    }

    #[tokio::test]
    async fn test_list_targets_keeps_server_order() {
        let server = FakeServer::new(&["zeta_1", "app_2", "app_1", "sys"]);
        let targets = list_targets(&server, &DatabaseFilter::new("app_", ""))
            .await
            .unwrap();
        assert_eq!(targets, ["app_2", "app_1"]);
        assert_eq!(server.events(), [Event::Opened(None), Event::Closed(None)]);
    }

    #[tokio::test]
    async fn test_list_failure_is_enumeration_error() {
        let server = FakeServer::new(&["app_1"]).fail_listing();
        let result = list_targets(&server, &DatabaseFilter::default()).await;
        assert!(matches!(result, Err(RunError::Enumeration(_))));
        assert_eq!(server.events(), [Event::Opened(None), Event::Closed(None)]);
    }

    #[tokio::test]
    async fn test_admin_connect_failure_is_enumeration_error() {
        let server = FakeServer::new(&["app_1"]).fail_open(None);
        let result = list_targets(&server, &DatabaseFilter::default()).await;
        assert!(matches!(result, Err(RunError::Enumeration(_))));
    }
}
