//! Sync configuration and declarative table definitions.

use crate::error::{MirrorError, Result};
use crate::schema::{Field, FieldType, Schema, Table};
use crate::types::{BlockNumber, TableId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with a log entry whose table is not registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTablePolicy {
    /// Fail with `SchemaMismatch` and halt the sync.
    #[default]
    Reject,
    /// Log a warning and skip the entry.
    Skip,
}

/// Sync configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// First block to request. Overridden by a loaded snapshot.
    pub start_block: BlockNumber,

    pub unknown_tables: UnknownTablePolicy,

    /// Buffer for channel subscriptions created by a sync session.
    /// Default: 1000
    pub subscription_buffer: usize,

    /// Start syncing as soon as the session is built.
    pub start_sync: bool,

    /// Snapshot to hydrate from, if it exists.
    pub snapshot_path: Option<PathBuf>,

    /// Tables to mirror.
    pub tables: Vec<TableDefinition>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: BlockNumber(0),
            unknown_tables: UnknownTablePolicy::Reject,
            subscription_buffer: 1000,
            start_sync: true,
            snapshot_path: None,
            tables: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MirrorError::InvalidFormat(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build every declared table.
    pub fn build_tables(&self) -> Result<Vec<Table>> {
        self.tables.iter().map(TableDefinition::to_table).collect()
    }
}

/// A field as declared in config: name plus Solidity type name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Declarative table definition.
///
/// ```json
/// {
///   "namespace": "app",
///   "name": "Score",
///   "key": [{ "name": "id", "type": "uint32" }],
///   "value": [{ "name": "name", "type": "string" }, { "name": "score", "type": "uint32" }]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub offchain: bool,
    #[serde(default)]
    pub key: Vec<FieldDef>,
    pub value: Vec<FieldDef>,
}

impl TableDefinition {
    pub fn table_id(&self) -> TableId {
        if self.offchain {
            TableId::offchain(&self.namespace, &self.name)
        } else {
            TableId::new(&self.namespace, &self.name)
        }
    }

    pub fn to_table(&self) -> Result<Table> {
        Ok(Table::new(
            self.table_id(),
            build_schema(&self.key)?,
            build_schema(&self.value)?,
        ))
    }
}

fn build_schema(defs: &[FieldDef]) -> Result<Schema> {
    let fields = defs
        .iter()
        .map(|def| -> Result<Field> {
            let field_type: FieldType = def.field_type.parse()?;
            Ok(Field::new(def.name.clone(), field_type))
        })
        .collect::<Result<Vec<_>>>()?;
    Schema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "start_block": 100,
        "unknown_tables": "skip",
        "tables": [
            {
                "namespace": "app",
                "name": "Score",
                "key": [{ "name": "id", "type": "uint32" }],
                "value": [
                    { "name": "name", "type": "string" },
                    { "name": "score", "type": "uint32" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.subscription_buffer, 1000);
        assert!(config.start_sync);
    }

    #[test]
    fn test_parse_tables() {
        let config = SyncConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.start_block, BlockNumber(100));
        assert_eq!(config.unknown_tables, UnknownTablePolicy::Skip);

        let tables = config.build_tables().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].id, TableId::new("app", "Score"));
        assert_eq!(tables[0].value_schema.num_dynamic(), 1);
        assert_eq!(tables[0].value_schema.static_length(), 4);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let def = TableDefinition {
            namespace: "app".into(),
            name: "Bad".into(),
            offchain: false,
            key: vec![],
            value: vec![FieldDef {
                name: "x".into(),
                field_type: "uint7".into(),
            }],
        };
        assert!(matches!(def.to_table(), Err(MirrorError::SchemaMismatch(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, CONFIG).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.tables[0].name, "Score");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SyncConfig::from_json("{ not json"),
            Err(MirrorError::InvalidFormat(_))
        ));
    }
}
