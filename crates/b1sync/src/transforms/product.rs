//! 📱 Products and services: the one transform that talks to the network.
//!
//! Per row, in this order:
//! 1. natural key `ItemCode`; already has a barcode in the store → [`Outcome::Skip`]
//! 2. enrich (QR render + upload); failure → [`Outcome::Failed`], the pool moves on
//! 3. resolve the item group (`ItemsGroupCode`) and direction (`U_direction`) GUIDs
//! 4. emit the upsert
//!
//! Step 1 is what makes a re-run cheap: the second pass over the same catalogue makes
//! zero upload calls. 🦆

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::trace;

use super::{Outcome, Transform, missing_key, new_guid, now_rfc3339, object};
use crate::common::{ErrorRecord, Operation, SourceRecord};
use crate::enrichment::Enricher;
use crate::reference::ReferenceMap;

#[derive(Debug)]
pub(crate) struct ProductTransform {
    enricher: Arc<dyn Enricher>,
    /// 🏷️ product code → barcode URL, scanned from the store before the run
    enriched: Arc<ReferenceMap>,
    /// 🗂️ item group number → guid
    item_groups: Arc<ReferenceMap>,
    /// 🧭 direction name → guid
    directions: Arc<ReferenceMap>,
}

impl ProductTransform {
    pub(crate) fn new(
        enricher: Arc<dyn Enricher>,
        enriched: Arc<ReferenceMap>,
        item_groups: Arc<ReferenceMap>,
        directions: Arc<ReferenceMap>,
    ) -> Self {
        Self {
            enricher,
            enriched,
            item_groups,
            directions,
        }
    }
}

#[async_trait]
impl Transform for ProductTransform {
    async fn transform(&self, record: &SourceRecord) -> Outcome {
        let code = match record.require_str("ItemCode") {
            Ok(code) => code,
            Err(err) => return missing_key(record, "product", err),
        };

        if !self.enriched.get(code).is_empty() {
            trace!("⏭️ '{}' already has a barcode, skipping", code);
            return Outcome::Skip;
        }

        let barcode = match self.enricher.enrich(code).await {
            Ok(url) => url,
            Err(err) => {
                return Outcome::Failed(ErrorRecord::new(
                    record.clone(),
                    format!("failed to generate QR code for code {code}: {err}"),
                ));
            }
        };

        let direction_name = record.str_field("U_direction");
        let set = object(json!({
            "direction_id": self.directions.get(direction_name),
            "direction_name": direction_name,
            "item_group_id": self.item_groups.get(&record.key_field("ItemsGroupCode")),
            "code": code,
            "name": record.str_field("ItemName"),
            "barcode": barcode,
        }));
        let set_on_insert = object(json!({
            "guid": new_guid(),
            "createdAt": now_rfc3339(),
        }));

        Outcome::Upsert(Operation::new(object(json!({ "code": code })), set, set_on_insert))
    }
}
