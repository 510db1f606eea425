//! 💱 Exchange rates: many SQL rows in, one document per day out.
//!
//! The `getExchangeRateWithDate` query answers with one `{Currency, Rate}` row per
//! currency. [`fold_rates`] squeezes them into a single record; the transform turns that
//! record into an upsert keyed by the calendar date, so re-running the job on the same day
//! updates today's rates instead of stacking duplicates.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};

use super::{Outcome, Transform, missing_key, new_guid, now_rfc3339, object};
use crate::common::{Operation, SourceRecord};

// -- 🏷️ SAP currency label → store field
const CURRENCIES: [(&str, &str); 4] = [("руб", "ruble"), ("UZS", "uzs"), ("EUR", "eur"), ("CNY", "cny")];

/// 🧮 Fold the query rows into `{date, ruble, uzs, eur, cny}`.
///
/// Unknown currencies and rows whose `Rate` is not a number are ignored. A currency that
/// never shows up stays at `0.0`. Duplicate currencies: last row wins.
pub(crate) fn fold_rates(rows: &[SourceRecord], date: NaiveDate) -> SourceRecord {
    let mut folded = object(json!({ "date": date.format("%Y-%m-%d").to_string() }));
    for (_, field) in CURRENCIES {
        folded.insert(field.to_string(), json!(0.0));
    }

    for row in rows {
        let Some((_, field)) = CURRENCIES
            .iter()
            .find(|(label, _)| *label == row.str_field("Currency"))
        else {
            continue;
        };
        if let Some(rate) = row.get("Rate").and_then(Value::as_f64) {
            folded.insert(field.to_string(), json!(rate));
        }
    }
    SourceRecord::new(folded)
}

#[derive(Debug, Default)]
pub(crate) struct ExchangeRateTransform;

#[async_trait]
impl Transform for ExchangeRateTransform {
    async fn transform(&self, record: &SourceRecord) -> Outcome {
        let date = match record.require_str("date") {
            Ok(date) => date,
            Err(err) => return missing_key(record, "exchange rate", err),
        };

        let now = now_rfc3339();
        let mut set = object(json!({ "date": date, "updatedAt": now }));
        for (_, field) in CURRENCIES {
            set.insert(
                field.to_string(),
                record.get(field).cloned().unwrap_or(json!(0.0)),
            );
        }

        Outcome::Upsert(Operation::new(
            object(json!({ "date": date })),
            set,
            object(json!({ "guid": new_guid(), "createdAt": now })),
        ))
    }
}
