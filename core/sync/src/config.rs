//! Sync configuration.

use url::Url;

/// Configuration for the replication orchestrator.
///
/// Every option is explicit and passed in at construction; nothing is read
/// from the process environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote store.
    pub endpoint: Url,
    /// Fallback document key for the verification point read when a
    /// collection yields no documents.
    pub default_scenario_id: Option<String>,
    /// Page size for bulk reads.
    pub page_limit: u32,
    /// Page size for checkpoint pulls.
    pub pull_batch_size: u32,
    /// Projection applied to all reads; `None` returns full documents.
    pub fields: Option<Vec<String>>,
    /// Whether bulk reads request the collection total.
    pub include_total: bool,
}

impl SyncConfig {
    /// Configuration with default page sizes against `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            default_scenario_id: None,
            page_limit: 2000,
            pull_batch_size: 100,
            fields: None,
            include_total: false,
        }
    }

    /// Set the fallback key for verification reads.
    pub fn with_default_scenario_id(mut self, id: impl Into<String>) -> Self {
        self.default_scenario_id = Some(id.into());
        self
    }

    /// Set the bulk read page size.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    /// Set the checkpoint pull page size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Restrict reads to the given fields.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Request collection totals on bulk reads.
    pub fn with_include_total(mut self, include_total: bool) -> Self {
        self.include_total = include_total;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new(Url::parse("http://remote").unwrap());
        assert_eq!(config.page_limit, 2000);
        assert_eq!(config.pull_batch_size, 100);
        assert!(config.default_scenario_id.is_none());
        assert!(config.fields.is_none());
        assert!(!config.include_total);
    }

    #[test]
    fn test_builder() {
        let config = SyncConfig::new(Url::parse("http://remote").unwrap())
            .with_default_scenario_id("scenario-1")
            .with_page_limit(50)
            .with_pull_batch_size(10)
            .with_fields(vec!["id".to_string(), "updated_at".to_string()])
            .with_include_total(true);

        assert_eq!(config.default_scenario_id.as_deref(), Some("scenario-1"));
        assert_eq!(config.page_limit, 50);
        assert_eq!(config.pull_batch_size, 10);
        assert_eq!(config.fields.as_ref().map(Vec::len), Some(2));
        assert!(config.include_total);
    }
}
