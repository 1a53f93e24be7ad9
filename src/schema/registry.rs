//! Per-table schema registry.

use super::field::Schema;
use crate::error::{MirrorError, Result};
use crate::types::TableId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A table: id plus key and value schemas. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub id: TableId,
    pub key_schema: Schema,
    pub value_schema: Schema,
}

impl Table {
    pub fn new(id: TableId, key_schema: Schema, value_schema: Schema) -> Self {
        Self {
            id,
            key_schema,
            value_schema,
        }
    }
}

/// Holds the schemas of every mirrored table.
///
/// Populated before sync starts. Once sealed it is read-only, and a schema
/// change requires a new registry and a fresh sync session.
#[derive(Default)]
pub struct SchemaRegistry {
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
    sealed: AtomicBool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the store's and the world's built-in tables.
    pub fn with_store_tables() -> Result<Self> {
        let registry = Self::new();
        let mut tables = store_tables()?;
        tables.extend(world_tables()?);
        registry.register_all(tables)?;
        Ok(registry)
    }

    /// Register a table.
    ///
    /// Registering an identical table again is a no-op.
    pub fn register(&self, table: Table) -> Result<()> {
        self.register_all(std::iter::once(table))
    }

    /// Register many tables, all or nothing.
    pub fn register_all(&self, tables: impl IntoIterator<Item = Table>) -> Result<()> {
        self.ensure_writable()?;
        let incoming: Vec<Table> = tables.into_iter().collect();

        let mut current = self.tables.write();

        // Validate everything first so a conflict leaves the registry untouched
        let mut staged: HashMap<TableId, &Table> = HashMap::new();
        for table in &incoming {
            let existing = current
                .get(&table.id)
                .map(|t| t.as_ref())
                .or_else(|| staged.get(&table.id).copied());
            match existing {
                Some(existing) if existing != table => {
                    return Err(MirrorError::DuplicateTable(table.id));
                }
                Some(_) => {}
                None => {
                    staged.insert(table.id, table);
                }
            }
        }

        for table in incoming {
            current.entry(table.id).or_insert_with(|| Arc::new(table));
        }
        Ok(())
    }

    /// Merge another registry's tables into this one, all or nothing.
    pub fn merge(&self, other: &SchemaRegistry) -> Result<()> {
        let tables: Vec<Table> = other
            .tables
            .read()
            .values()
            .map(|t| t.as_ref().clone())
            .collect();
        self.register_all(tables)
    }

    pub fn lookup(&self, id: &TableId) -> Option<Arc<Table>> {
        self.tables.read().get(id).cloned()
    }

    pub fn contains(&self, id: &TableId) -> bool {
        self.tables.read().contains_key(id)
    }

    /// All registered table ids, sorted.
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Make the registry read-only.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(MirrorError::InvalidOperation(
                "schema registry is sealed while a sync session is active".into(),
            ));
        }
        Ok(())
    }
}

type FieldList<'a> = &'a [(&'a str, &'a str)];

fn builtin(id: TableId, key: FieldList<'_>, value: FieldList<'_>) -> Result<Table> {
    Ok(Table::new(id, Schema::parse(key)?, Schema::parse(value)?))
}

/// Tables the store itself maintains for every instance.
fn store_tables() -> Result<Vec<Table>> {
    Ok(vec![
        builtin(
            TableId::new("store", "Tables"),
            &[("tableId", "bytes32")],
            &[
                ("fieldLayout", "bytes32"),
                ("keySchema", "bytes32"),
                ("valueSchema", "bytes32"),
                ("abiEncodedKeyNames", "bytes"),
                ("abiEncodedFieldNames", "bytes"),
            ],
        )?,
        builtin(
            TableId::new("store", "ResourceIds"),
            &[("resourceId", "bytes32")],
            &[("exists", "bool")],
        )?,
    ])
}

/// Tables every world writes while registering namespaces, systems and access.
///
/// Names longer than 16 bytes are truncated in the resource id, the same way
/// the world truncates them on chain. `Balances` is a uint256 and is mirrored
/// as its raw 32-byte word.
fn world_tables() -> Result<Vec<Table>> {
    Ok(vec![
        builtin(
            TableId::new("world", "NamespaceOwner"),
            &[("namespaceId", "bytes32")],
            &[("owner", "address")],
        )?,
        builtin(
            TableId::new("world", "ResourceAccess"),
            &[("resourceId", "bytes32"), ("caller", "address")],
            &[("access", "bool")],
        )?,
        builtin(
            TableId::new("world", "InstalledModules"),
            &[("moduleAddress", "address"), ("argumentsHash", "bytes32")],
            &[("isInstalled", "bool")],
        )?,
        builtin(
            TableId::new("world", "UserDelegationControl"),
            &[("delegator", "address"), ("delegatee", "address")],
            &[("delegationControlId", "bytes32")],
        )?,
        builtin(
            TableId::new("world", "NamespaceDelegationControl"),
            &[("namespaceId", "bytes32")],
            &[("delegationControlId", "bytes32")],
        )?,
        builtin(
            TableId::new("world", "Balances"),
            &[("namespaceId", "bytes32")],
            &[("balance", "bytes32")],
        )?,
        builtin(
            TableId::new("world", "Systems"),
            &[("systemId", "bytes32")],
            &[("system", "address"), ("publicAccess", "bool")],
        )?,
        builtin(
            TableId::new("world", "SystemRegistry"),
            &[("system", "address")],
            &[("systemId", "bytes32")],
        )?,
        builtin(
            TableId::new("world", "SystemHooks"),
            &[("systemId", "bytes32")],
            &[("value", "bytes21[]")],
        )?,
        builtin(
            TableId::new("world", "FunctionSelectors"),
            &[("worldFunctionSelector", "bytes4")],
            &[("systemId", "bytes32"), ("systemFunctionSelector", "bytes4")],
        )?,
        builtin(
            TableId::offchain("world", "FunctionSignatures"),
            &[("functionSelector", "bytes4")],
            &[("functionSignature", "string")],
        )?,
        builtin(
            TableId::new("world", "InitModuleAddress"),
            &[],
            &[("value", "address")],
        )?,
    ])
}
