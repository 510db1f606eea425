//! 🔄 Transforms: one SAP row in, one verdict out.
//!
//! 🎬 COLD OPEN. INT. CUSTOMS OFFICE, THE BORDER BETWEEN SAP AND THE STORE
//!
//! Every row walks up to the desk. `ItemCode`, `ItemsGroupCode`, `U_direction`,
//! PascalCase from head to toe. The officer looks it over and stamps exactly one of:
//!
//! - [`Outcome::Upsert`]: welcome, here is your [`Operation`]
//! - [`Outcome::Skip`]: you already live here, nothing to do
//! - [`Outcome::Failed`]: denied, with the reason written on an [`ErrorRecord`]
//!
//! Transforms never fail the run. A transform that cannot handle a row says so on that
//! row and the next row is served.
//!
//! ## Knowledge Graph 🧠
//! - Reference maps are built before the pool starts and handed in by `Arc`
//! - Used by: `supervisors::workers::ShardWorker`, once per record
//! - Implementations: products (with QR enrichment), item groups, warehouses, exchange
//!   rates, stock levels
//!
//! 🦆

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{ErrorRecord, Fields, Operation, SourceRecord};

pub(crate) mod exchange_rate;
pub(crate) mod item_group;
pub(crate) mod product;
pub(crate) mod stock;
pub(crate) mod warehouse;

pub(crate) use exchange_rate::{ExchangeRateTransform, fold_rates};
pub(crate) use item_group::ItemGroupTransform;
pub(crate) use product::ProductTransform;
pub(crate) use stock::{ProductLookup, StockTransform, WarehouseLookup};
pub(crate) use warehouse::WarehouseTransform;

/// ⚖️ The verdict for one record. Exactly one per record, no exceptions, no appeals.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Upsert(Operation),
    Skip,
    Failed(ErrorRecord),
}

/// 🔄 Maps one [`SourceRecord`] to an [`Outcome`].
///
/// Async because enrichment talks to the network. `&self` because one instance is shared
/// by every worker in the pool; anything a transform needs to look up (reference maps,
/// the enricher) lives inside it, frozen before the first call.
#[async_trait]
pub(crate) trait Transform: std::fmt::Debug + Send + Sync {
    async fn transform(&self, record: &SourceRecord) -> Outcome;
}

// -- 🕰️ every timestamp written to the store is RFC 3339, UTC
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn new_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 🧱 `json!({...})` → [`Fields`]. Anything that is not an object comes out empty.
pub(crate) fn object(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        _ => Fields::new(),
    }
}

/// 🚫 A row without its natural key cannot be upserted: the filter would be meaningless.
pub(crate) fn missing_key(record: &SourceRecord, what: &str, err: impl std::fmt::Display) -> Outcome {
    Outcome::Failed(ErrorRecord::new(
        record.clone(),
        format!("cannot sync {what}: {err}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_only_objects_become_fields() {
        assert_eq!(object(json!({ "a": 1 })).len(), 1);
        assert!(object(json!([1, 2, 3])).is_empty());
        assert!(object(Value::Null).is_empty());
    }

    #[test]
    fn the_one_where_every_guid_is_a_snowflake() {
        let the_first = new_guid();
        let the_second = new_guid();
        assert_ne!(the_first, the_second);
        assert_eq!(the_first.len(), 36);
    }

    #[test]
    fn the_one_where_timestamps_parse_back() {
        let the_stamp = now_rfc3339();
        assert!(chrono::DateTime::parse_from_rfc3339(&the_stamp).is_ok());
    }
}
