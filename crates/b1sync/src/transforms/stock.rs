//! 📦 Stock levels: `SQLQueries('OITWGETWithstockCount')/List` → `stocks`.
//!
//! One row per (item, warehouse) with `OnHand` and `AvgPrice`. A stock document is keyed
//! by the *internal* ids of both sides, so the product and the warehouse must already
//! exist in the store. That is why `All` runs this job last.
//!
//! Unlike the other reference lookups, an unresolved product or warehouse fails the row:
//! a blank id in the filter would fold every orphan into one shared document.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Outcome, Transform, missing_key, new_guid, now_rfc3339, object};
use crate::common::{ErrorRecord, Operation, SourceRecord};
use crate::reference::ReferenceMap;

/// 🏭 What the stock job needs to know about warehouses, scanned from `warehouses`.
#[derive(Debug, Default)]
pub(crate) struct WarehouseLookup {
    /// code → guid
    pub(crate) guids: ReferenceMap,
    /// code → subdivision_id
    pub(crate) subdivisions: ReferenceMap,
}

/// 📱 What the stock job needs to know about products, scanned from `product_and_services`.
#[derive(Debug, Default)]
pub(crate) struct ProductLookup {
    /// code → guid
    pub(crate) guids: ReferenceMap,
    /// code → name
    pub(crate) names: ReferenceMap,
    /// code → direction_id
    pub(crate) directions: ReferenceMap,
}

impl WarehouseLookup {
    pub(crate) fn build(documents: &[SourceRecord]) -> Self {
        Self {
            guids: ReferenceMap::build(documents, "code", "guid"),
            subdivisions: ReferenceMap::build(documents, "code", "subdivision_id"),
        }
    }
}

impl ProductLookup {
    pub(crate) fn build(documents: &[SourceRecord]) -> Self {
        Self {
            guids: ReferenceMap::build(documents, "code", "guid"),
            names: ReferenceMap::build(documents, "code", "name"),
            directions: ReferenceMap::build(documents, "code", "direction_id"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct StockTransform {
    warehouses: Arc<WarehouseLookup>,
    products: Arc<ProductLookup>,
}

impl StockTransform {
    pub(crate) fn new(warehouses: Arc<WarehouseLookup>, products: Arc<ProductLookup>) -> Self {
        Self {
            warehouses,
            products,
        }
    }
}

// -- 🔢 SAP sends quantities as numbers; anything else counts as zero
fn number(record: &SourceRecord, field: &str) -> f64 {
    record.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

#[async_trait]
impl Transform for StockTransform {
    async fn transform(&self, record: &SourceRecord) -> Outcome {
        let (item_code, whs_code) = match (record.require_str("ItemCode"), record.require_str("WhsCode")) {
            (Ok(item), Ok(whs)) => (item, whs),
            (Err(err), _) | (_, Err(err)) => return missing_key(record, "stock", err),
        };

        let product_id = self.products.guids.get(item_code);
        if product_id.is_empty() {
            return Outcome::Failed(ErrorRecord::new(
                record.clone(),
                format!("cannot sync stock: product '{item_code}' is not in the store yet"),
            ));
        }
        let warehouse_id = self.warehouses.guids.get(whs_code);
        if warehouse_id.is_empty() {
            return Outcome::Failed(ErrorRecord::new(
                record.clone(),
                format!("cannot sync stock: warehouse '{whs_code}' is not in the store yet"),
            ));
        }

        let now = now_rfc3339();
        Outcome::Upsert(Operation::new(
            object(json!({
                "product_and_service_id": product_id,
                "warehouse_id": warehouse_id,
            })),
            object(json!({
                "quantity": number(record, "OnHand"),
                "price": number(record, "AvgPrice"),
                "product_name": self.products.names.get(item_code),
                "direction_id": self.products.directions.get(item_code),
                "subdivision_id": self.warehouses.subdivisions.get(whs_code),
                "updatedAt": now,
            })),
            object(json!({
                "guid": new_guid(),
                "product_code": item_code,
                "warehouse_code": whs_code,
                "createdAt": now,
            })),
        ))
    }
}
