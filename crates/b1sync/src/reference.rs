//! 🗺️ Reference maps: "what's the guid for group 100 again?"
//!
//! Built once per run from a full scan of a store collection, then frozen and shared
//! across every worker behind an `Arc`. Nobody writes to a `ReferenceMap` after
//! `build` returns, which is the whole reason nobody needs a lock to read one.
//!
//! Lookups never fail. An unknown key resolves to `""` and the row is written with
//! a blank reference, same as the cron jobs always did. 🦆

use std::collections::HashMap;

use crate::common::SourceRecord;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ReferenceMap {
    entries: HashMap<String, String>,
}

impl ReferenceMap {
    /// 🏗️ One pass over `records`, mapping `key_field` → `value_field`.
    ///
    /// Duplicate keys: last write wins (the store scan has no order we could honor anyway).
    /// Absent fields read as `""`; an absent key field is stored under the empty key.
    pub(crate) fn build(records: &[SourceRecord], key_field: &str, value_field: &str) -> Self {
        let entries = records
            .iter()
            .map(|record| (record.key_field(key_field), record.key_field(value_field)))
            .collect();
        Self { entries }
    }

    /// 📋 For static tables that live in config rather than in a collection.
    pub(crate) fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// 🔍 The mapped value, or `""` for strangers.
    pub(crate) fn get(&self, key: &str) -> &str {
        self.entries.get(key).map(String::as_str).unwrap_or("")
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
