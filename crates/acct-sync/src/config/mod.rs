//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl SourceConfig {
    /// Build the ODBC connection string.
    pub fn connection_string(&self) -> String {
        if let Some(ref conn) = self.connection_string {
            return conn.clone();
        }
        format!(
            "DSN={};UID={};PWD={};",
            self.dsn, self.username, self.password
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ClearMode, EntityKind};

    const MINIMAL: &str = r#"
source:
  dsn: ACCOUNTS
  username: dba
  password: sql
api:
  base_url: https://sync.example.com
  client_id: acme-01
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.login_timeout_secs, 10);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.api.max_retries, 3);
        assert_eq!(config.api.retry_statuses, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.sync.default_batch_size, 500);
        assert_eq!(config.sync.large_table_batch_size, 200);
        assert_eq!(config.sync.large_dataset_threshold, 1000);
        assert_eq!(config.sync.success_policy, SuccessPolicy::CriticalOnly);
        assert_eq!(config.sync.order, EntityKind::ALL.to_vec());
        assert!(config.logging.level.is_none());
    }

    #[test]
    fn test_entity_overrides_parse() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
sync:
  success_policy: all_entities
  order: [master, ledger]
  tables:
    ledger: GL_ENTRIES
  entities:
    ledger:
      batch_size: 50
      clear_mode: best_effort
      critical: true
"#
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.sync.success_policy, SuccessPolicy::AllEntities);
        assert_eq!(config.sync.order, vec![EntityKind::Master, EntityKind::Ledger]);
        assert_eq!(
            config.sync.tables.get(&EntityKind::Ledger).map(String::as_str),
            Some("GL_ENTRIES")
        );
        let ledger = &config.sync.entities[&EntityKind::Ledger];
        assert_eq!(ledger.batch_size, Some(50));
        assert_eq!(ledger.clear_mode, Some(ClearMode::BestEffort));
        assert_eq!(ledger.critical, Some(true));
    }

    #[test]
    fn test_dsn_connection_string() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(
            config.source.connection_string(),
            "DSN=ACCOUNTS;UID=dba;PWD=sql;"
        );
    }

    #[test]
    fn test_explicit_connection_string_wins() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.source.connection_string = Some("Driver={SQL Anywhere 17};Host=db".into());
        assert_eq!(
            config.source.connection_string(),
            "Driver={SQL Anywhere 17};Host=db"
        );
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Io(_)));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api.client_id, "acme-01");
    }
}
