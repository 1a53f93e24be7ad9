//! Reading a single record from a deployed world.

use super::WorldDeploy;
use crate::codec::{decode_layout, encode_key, PackedLayout};
use crate::error::Result;
use crate::schema::{FieldValue, Table};
use crate::types::{Address, BlockNumber, TableId};

/// Reads packed records from a remote store.
pub trait TableReader {
    /// The record stored under `key` as of `block`. Absent records come back
    /// as the table's zero value.
    fn get_record(
        &self,
        world: Address,
        block: BlockNumber,
        table_id: &TableId,
        key: &[u8],
    ) -> Result<PackedLayout>;
}

/// Read and decode a record at the deployment's state block.
pub fn get_table_value(
    reader: &dyn TableReader,
    deploy: &WorldDeploy,
    table: &Table,
    key: &[FieldValue],
) -> Result<Vec<FieldValue>> {
    let key = encode_key(&table.key_schema, key)?;
    let layout = reader.get_record(deploy.address, deploy.state_block, &table.id, &key)?;
    decode_layout(&table.value_schema, &layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_value;
    use crate::error::MirrorError;
    use crate::schema::Schema;
    use std::collections::HashMap;

    struct FixedReader {
        deploy: WorldDeploy,
        records: HashMap<(TableId, Vec<u8>), PackedLayout>,
    }

    impl TableReader for FixedReader {
        fn get_record(
            &self,
            world: Address,
            block: BlockNumber,
            table_id: &TableId,
            key: &[u8],
        ) -> Result<PackedLayout> {
            if world != self.deploy.address || block != self.deploy.state_block {
                return Err(MirrorError::Transport("wrong world or block".into()));
            }
            self.records
                .get(&(*table_id, key.to_vec()))
                .cloned()
                .ok_or_else(|| MirrorError::record_not_found(*table_id, key))
        }
    }

    fn table() -> Table {
        Table::new(
            TableId::new("", "ResourceAccess"),
            Schema::parse(&[("resource", "bytes32"), ("caller", "address")]).unwrap(),
            Schema::parse(&[("access", "bool")]).unwrap(),
        )
    }

    #[test]
    fn test_reads_at_state_block() {
        let table = table();
        let deploy = WorldDeploy {
            address: Address([1; 20]),
            deploy_block: BlockNumber(5),
            state_block: BlockNumber(6),
        };
        let key_values = vec![
            FieldValue::FixedBytes(vec![0; 32]),
            FieldValue::Address(Address([2; 20])),
        ];
        let key = encode_key(&table.key_schema, &key_values).unwrap();
        let layout = encode_value(&table.value_schema, &[FieldValue::Bool(true)]).unwrap();

        let reader = FixedReader {
            deploy,
            records: HashMap::from([((table.id, key), layout)]),
        };

        let value = get_table_value(&reader, &deploy, &table, &key_values).unwrap();
        assert_eq!(value, vec![FieldValue::Bool(true)]);
    }

    #[test]
    fn test_key_shape_checked() {
        let table = table();
        let deploy = WorldDeploy {
            address: Address([1; 20]),
            deploy_block: BlockNumber(5),
            state_block: BlockNumber(6),
        };
        let reader = FixedReader {
            deploy,
            records: HashMap::new(),
        };

        let result = get_table_value(&reader, &deploy, &table, &[FieldValue::Bool(true)]);
        assert!(matches!(result, Err(MirrorError::SchemaMismatch(_))));
    }
}
