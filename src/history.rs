//! In-memory history of completed text-processing operations.
//!
//! Newest-first, capped at [`HISTORY_CAP`] entries, never persisted. The
//! store is cloned into every handler and guarded by a single mutex so
//! concurrent requests cannot interleave a prepend with the truncation.

use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use crate::deepseek::CorrectionType;

pub const HISTORY_CAP: usize = 50;

/// What kind of operation produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Tashkeel,
    Correction,
    TashkeelAndCorrect,
}

/// A record of one completed operation, retained for user review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// Creation timestamp in milliseconds; doubles as the unique key.
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction_type: Option<CorrectionType>,
    pub original: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shaped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Human-readable creation time shown in the history panel.
    pub date: String,
}

impl HistoryItem {
    fn base(kind: OperationKind, original: &str) -> Self {
        Self {
            id: Utc::now().timestamp_millis(),
            kind,
            correction_type: None,
            original: original.to_string(),
            corrected: None,
            shaped: None,
            file_name: None,
            file_type: None,
            file_size: None,
            date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn tashkeel(original: &str, shaped: &str) -> Self {
        Self {
            shaped: Some(shaped.to_string()),
            ..Self::base(OperationKind::Tashkeel, original)
        }
    }

    pub fn correction(correction_type: CorrectionType, original: &str, corrected: &str) -> Self {
        Self {
            correction_type: Some(correction_type),
            corrected: Some(corrected.to_string()),
            ..Self::base(OperationKind::Correction, original)
        }
    }

    pub fn combined(original: &str, corrected: &str, shaped: &str) -> Self {
        Self {
            corrected: Some(corrected.to_string()),
            shaped: Some(shaped.to_string()),
            ..Self::base(OperationKind::TashkeelAndCorrect, original)
        }
    }

    pub fn upload(
        file_name: &str,
        file_type: &str,
        file_size: u64,
        extracted: &str,
        shaped: &str,
    ) -> Self {
        Self {
            shaped: Some(shaped.to_string()),
            file_name: Some(file_name.to_string()),
            file_type: Some(file_type.to_string()),
            file_size: Some(file_size),
            ..Self::base(OperationKind::Tashkeel, extracted)
        }
    }
}

/// Shared, mutex-guarded history list.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    inner: Arc<Mutex<Vec<HistoryItem>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an item, evicting the oldest tail past the cap.
    /// Returns the item's id for the response envelope.
    pub fn append(&self, item: HistoryItem) -> i64 {
        let id = item.id;
        let mut items = self.inner.lock().unwrap();
        items.insert(0, item);
        items.truncate(HISTORY_CAP);
        id
    }

    /// Read-only prefix of the list, newest first.
    pub fn list(&self, limit: usize) -> Vec<HistoryItem> {
        self.inner.lock().unwrap().iter().take(limit).cloned().collect()
    }

    pub fn remove(&self, id: i64) {
        self.inner.lock().unwrap().retain(|item| item.id != id);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_id(id: i64) -> HistoryItem {
        let mut item = HistoryItem::tashkeel("أصل", "أَصْل");
        item.id = id;
        item
    }

    #[test]
    fn append_prepends_newest_first() {
        let store = HistoryStore::new();
        store.append(item_with_id(1));
        store.append(item_with_id(2));

        let listed = store.list(10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, 2);
        assert_eq!(listed[1].id, 1);
    }

    #[test]
    fn cap_evicts_oldest_tail() {
        let store = HistoryStore::new();
        for id in 0..51 {
            store.append(item_with_id(id));
        }

        assert_eq!(store.len(), HISTORY_CAP);
        let listed = store.list(HISTORY_CAP);
        assert_eq!(listed[0].id, 50);
        // The very first append (id 0) must be gone.
        assert!(listed.iter().all(|item| item.id != 0));
        assert_eq!(listed.last().unwrap().id, 1);
    }

    #[test]
    fn remove_deletes_exactly_one_id_preserving_order() {
        let store = HistoryStore::new();
        for id in [1, 2, 3, 4] {
            store.append(item_with_id(id));
        }

        store.remove(3);

        let ids: Vec<i64> = store.list(10).iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 2, 1]);
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let store = HistoryStore::new();
        store.append(item_with_id(1));
        store.remove(99);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = HistoryStore::new();
        store.append(item_with_id(1));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn list_limits_to_prefix() {
        let store = HistoryStore::new();
        for id in 0..30 {
            store.append(item_with_id(id));
        }
        assert_eq!(store.list(20).len(), 20);
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_value(item_with_id(7)).unwrap();
        assert_eq!(json["type"], "tashkeel");
        assert!(json.get("correctionType").is_none());
        assert!(json.get("fileName").is_none());
        assert!(json.get("shaped").is_some());
    }

    #[test]
    fn upload_item_carries_file_metadata() {
        let item = HistoryItem::upload(
            "وثيقة.pdf",
            "application/pdf",
            2048,
            "نص مستخرج",
            "نَصٌّ مُسْتَخْرَج",
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["fileName"], "وثيقة.pdf");
        assert_eq!(json["fileSize"], 2048);
    }
}
