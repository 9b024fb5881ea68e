//! Pipeline topology and connection settings
//!
//! Loaded from a JSON file. Relative paths (cursor files, index schemas)
//! resolve against the directory of the config file. `DB_PASSWORD` and
//! `ES_HOST` from the environment override the file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backoff::RetryPolicy;
use crate::error::{OrchestratorError, Result};
use crate::loader::DocumentErrorPolicy;
use crate::producer::bootstrap_template;
use crate::template::SqlTemplate;
use crate::transform::RecordKind;

pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_ES_HOST: &str = "ES_HOST";

fn default_pg_port() -> u16 {
    5432
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_refresh_minutes() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dbname: String,
    pub user: String,
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticConfig {
    pub host: String,
    /// Documents per bulk request; also the merger chunk size
    #[serde(alias = "limit")]
    pub bulk_size: usize,
}

/// Incremental extractor over one state column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerSpec {
    pub name: String,
    pub state_file_path: PathBuf,
    pub state_field: String,
    /// Page size bound to `:limit`
    pub limit: usize,
    pub sql: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnricherSpec {
    pub name: String,
    /// Producer whose pages this enricher maps
    #[serde(rename = "use")]
    pub source: String,
    pub sql: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergerSpec {
    pub name: String,
    /// Producers and enrichers whose id sets are unioned
    #[serde(rename = "use")]
    pub sources: Vec<String>,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderSpec {
    pub name: String,
    #[serde(rename = "use")]
    pub merger: String,
    pub index: String,
    pub kind: RecordKind,
    /// Index mapping/settings document created when the index is missing
    #[serde(default)]
    pub schema: Option<PathBuf>,
    #[serde(default)]
    pub on_document_error: DocumentErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtlConfig {
    #[serde(alias = "dsn")]
    pub database: DatabaseConfig,
    #[serde(alias = "es")]
    pub elastic: ElasticConfig,
    pub producers: Vec<ProducerSpec>,
    #[serde(default)]
    pub enrichers: Vec<EnricherSpec>,
    pub mergers: Vec<MergerSpec>,
    pub loaders: Vec<LoaderSpec>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u64,
}

impl EtlConfig {
    /// Read, apply environment overrides, resolve paths and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_json_str(&text)?;
        config.apply_env_overrides();
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;

        info!(
            "Loaded {} with {} producers, {} enrichers, {} mergers, {} loaders",
            path.display(),
            config.producers.len(),
            config.enrichers.len(),
            config.mergers.len(),
            config.loaders.len()
        );
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(OrchestratorError::config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(ENV_DB_PASSWORD) {
            self.database.password = Some(password);
        }
        if let Ok(host) = std::env::var(ENV_ES_HOST) {
            self.elastic.host = host;
        }
    }

    /// Anchor relative cursor and schema paths at `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for producer in &mut self.producers {
            if producer.state_file_path.is_relative() {
                producer.state_file_path = base.join(&producer.state_file_path);
            }
        }
        for loader in &mut self.loaders {
            if let Some(schema) = loader.schema.as_mut() {
                if schema.is_relative() {
                    *schema = base.join(&*schema);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.elastic.bulk_size == 0 {
            return Err(OrchestratorError::config("elastic.bulk_size must be positive"));
        }
        self.retry.validate()?;

        let mut names = HashSet::new();
        let mut producers = HashSet::new();
        let mut cursors: HashSet<(&Path, &str)> = HashSet::new();
        for p in &self.producers {
            check_name("producer", &p.name, &mut names)?;
            producers.insert(p.name.as_str());
            if p.limit == 0 {
                return Err(OrchestratorError::config(format!(
                    "producer '{}': limit must be positive",
                    p.name
                )));
            }
            require_placeholders("producer", &p.name, &p.sql, &["watermark", "limit"])?;
            bootstrap_template(&p.name, &p.sql)?;
            if !cursors.insert((p.state_file_path.as_path(), p.state_field.as_str())) {
                return Err(OrchestratorError::config(format!(
                    "producer '{}': state field '{}' in {} already belongs to another producer",
                    p.name,
                    p.state_field,
                    p.state_file_path.display()
                )));
            }
        }

        let mut enrichers = HashSet::new();
        for e in &self.enrichers {
            check_name("enricher", &e.name, &mut names)?;
            enrichers.insert(e.name.as_str());
            if !producers.contains(e.source.as_str()) {
                return Err(OrchestratorError::config(format!(
                    "enricher '{}' uses unknown producer '{}'",
                    e.name, e.source
                )));
            }
            require_placeholders("enricher", &e.name, &e.sql, &["ids"])?;
        }

        let mut mergers = HashSet::new();
        for m in &self.mergers {
            check_name("merger", &m.name, &mut mergers)?;
            if m.sources.is_empty() {
                return Err(OrchestratorError::config(format!(
                    "merger '{}' uses nothing",
                    m.name
                )));
            }
            for source in &m.sources {
                if !producers.contains(source.as_str()) && !enrichers.contains(source.as_str()) {
                    return Err(OrchestratorError::config(format!(
                        "merger '{}' uses unknown producer or enricher '{}'",
                        m.name, source
                    )));
                }
            }
            require_placeholders("merger", &m.name, &m.sql, &["ids"])?;
        }

        let mut loaders = HashSet::new();
        for l in &self.loaders {
            check_name("loader", &l.name, &mut loaders)?;
            if !mergers.contains(l.merger.as_str()) {
                return Err(OrchestratorError::config(format!(
                    "loader '{}' uses unknown merger '{}'",
                    l.name, l.merger
                )));
            }
            if l.index.trim().is_empty() {
                return Err(OrchestratorError::config(format!(
                    "loader '{}' has an empty index name",
                    l.name
                )));
            }
        }

        Ok(())
    }
}

fn check_name<'a>(what: &str, name: &'a str, seen: &mut HashSet<&'a str>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(OrchestratorError::config(format!("{} with empty name", what)));
    }
    if !seen.insert(name) {
        return Err(OrchestratorError::config(format!(
            "duplicate {} name '{}'",
            what, name
        )));
    }
    Ok(())
}

fn require_placeholders(what: &str, name: &str, sql: &str, required: &[&str]) -> Result<()> {
    let template = SqlTemplate::new(sql);
    for placeholder in required {
        if !template.references(placeholder) {
            return Err(OrchestratorError::config(format!(
                "{} '{}' query must reference :{}",
                what, name, placeholder
            )));
        }
    }
    Ok(())
}
