//! 🗂️ Item groups: `ItemGroups?$select=Number,GroupName` → `item_groups`.
//!
//! Keyed by the group number. Every other job looks these up by number, so a row
//! without one is refused rather than written as `number: 0`.

use async_trait::async_trait;
use serde_json::json;

use super::{Outcome, Transform, missing_key, new_guid, now_rfc3339, object};
use crate::common::{Operation, SourceRecord};

#[derive(Debug, Default)]
pub(crate) struct ItemGroupTransform;

#[async_trait]
impl Transform for ItemGroupTransform {
    async fn transform(&self, record: &SourceRecord) -> Outcome {
        let number = match record.require_int("Number") {
            Ok(number) => number,
            Err(err) => return missing_key(record, "item group", err),
        };

        let now = now_rfc3339();
        Outcome::Upsert(Operation::new(
            object(json!({ "number": number })),
            object(json!({
                "group_name": record.str_field("GroupName"),
                "number": number,
                "updatedAt": now,
            })),
            object(json!({
                "guid": new_guid(),
                "createdAt": now,
            })),
        ))
    }
}
