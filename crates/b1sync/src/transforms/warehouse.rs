//! 🏭 Warehouses: `Warehouses?$select=WarehouseName,WarehouseCode,U_dep` → `warehouses`.
//!
//! `U_dep` names the owning subdivision. Its GUID comes from the `subdivisions` collection
//! and is only written on insert: an existing warehouse keeps whatever subdivision it was
//! created with, renames in SAP notwithstanding.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Outcome, Transform, missing_key, new_guid, now_rfc3339, object};
use crate::common::{Operation, SourceRecord};
use crate::reference::ReferenceMap;

#[derive(Debug)]
pub(crate) struct WarehouseTransform {
    /// 🏢 subdivision name → guid
    subdivisions: Arc<ReferenceMap>,
}

impl WarehouseTransform {
    pub(crate) fn new(subdivisions: Arc<ReferenceMap>) -> Self {
        Self { subdivisions }
    }
}

#[async_trait]
impl Transform for WarehouseTransform {
    async fn transform(&self, record: &SourceRecord) -> Outcome {
        let code = match record.require_str("WarehouseCode") {
            Ok(code) => code,
            Err(err) => return missing_key(record, "warehouse", err),
        };
        let subdivision_name = record.str_field("U_dep");

        let now = now_rfc3339();
        Outcome::Upsert(Operation::new(
            object(json!({ "code": code })),
            object(json!({
                "code": code,
                "name": record.str_field("WarehouseName"),
                "updatedAt": now,
            })),
            object(json!({
                "guid": new_guid(),
                "createdAt": now,
                "subdivision_id": self.subdivisions.get(subdivision_name),
                "subdivision_name": subdivision_name,
            })),
        ))
    }
}
