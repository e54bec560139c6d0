//! Mapping store: code → figure record lookup.
//!
//! Built once at boot from a JSON document of the form
//! `{ "figures": [ { "id", "label", "role", "sound" } ] }` and read-only afterwards.

use crate::assets::fetch::read_locator;
use crate::error::MappingLoadError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One scannable figure and the sound it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FigureRecord {
    pub id: String,
    pub label: String,
    pub role: String,
    /// Asset locator, resolved by the asset fetcher.
    #[serde(rename = "sound")]
    pub sound_ref: String,
}

#[derive(Debug, Deserialize)]
struct MappingDocument {
    figures: Vec<FigureRecord>,
}

/// Immutable id → record table.
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    records: HashMap<String, Arc<FigureRecord>>,
}

impl MappingStore {
    /// Build a store from records. Ids are trimmed to match trimmed decoded
    /// codes. The first record wins on duplicate ids.
    pub fn from_records(records: impl IntoIterator<Item = FigureRecord>) -> Self {
        let mut map = HashMap::new();
        for mut record in records {
            record.id = record.id.trim().to_string();
            if map.contains_key(&record.id) {
                tracing::warn!(id = %record.id, "duplicate figure id in mapping, keeping first");
                continue;
            }
            map.insert(record.id.clone(), Arc::new(record));
        }
        Self { records: map }
    }

    /// Parse a mapping document.
    pub fn from_json(source_ref: &str, json: &[u8]) -> Result<Self, MappingLoadError> {
        let malformed = |message: String| MappingLoadError::Malformed {
            source_ref: source_ref.to_string(),
            message,
        };

        let document: MappingDocument =
            serde_json::from_slice(json).map_err(|e| malformed(e.to_string()))?;

        for (index, record) in document.figures.iter().enumerate() {
            if record.id.trim().is_empty() {
                return Err(malformed(format!("figure #{} has an empty id", index)));
            }
            if record.sound_ref.trim().is_empty() {
                return Err(malformed(format!(
                    "figure '{}' has an empty sound reference",
                    record.id
                )));
            }
        }

        Ok(Self::from_records(document.figures))
    }

    /// Load a mapping document from a file path or http(s) URL.
    pub async fn load(source_ref: &str) -> Result<Self, MappingLoadError> {
        let bytes = read_locator(source_ref)
            .await
            .map_err(|message| MappingLoadError::Unreachable {
                source_ref: source_ref.to_string(),
                message,
            })?;
        let store = Self::from_json(source_ref, &bytes)?;
        tracing::info!(source = source_ref, figures = store.len(), "mapping loaded");
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<FigureRecord>> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct sound references, sorted, for cache warm-up.
    pub fn sound_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .records
            .values()
            .map(|r| r.sound_ref.clone())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}
