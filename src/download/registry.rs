// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of live download records, owned by the control task.

use std::collections::HashMap;

use super::types::{DownloadId, DownloadInfo, DownloadRecord};

/// `id -> record` map. Keys are unique; inserting an existing id is refused.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<DownloadId, DownloadRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns the record back if its id is already taken.
    pub fn insert(&mut self, record: DownloadRecord) -> Result<(), DownloadRecord> {
        if self.records.contains_key(&record.id) {
            return Err(record);
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, id: &DownloadId) -> Option<&DownloadRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &DownloadId) -> Option<&mut DownloadRecord> {
        self.records.get_mut(id)
    }

    pub fn remove(&mut self, id: &DownloadId) -> Option<DownloadRecord> {
        self.records.remove(id)
    }

    pub fn contains(&self, id: &DownloadId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Listing in issue order.
    pub fn infos(&self) -> Vec<DownloadInfo> {
        let mut infos: Vec<DownloadInfo> = self.records.values().map(DownloadRecord::info).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Remove and return every record.
    pub fn drain(&mut self) -> Vec<DownloadRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use crate::download::process::ProcessHandle;

    struct NullHandle;

    impl ProcessHandle for NullHandle {
        fn pid(&self) -> Option<u32> {
            None
        }
        fn suspend(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn resume(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn terminate(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(id: &str) -> DownloadRecord {
        DownloadRecord::new(
            DownloadId::from(id),
            Box::new(NullHandle),
            "https://example.com/file",
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let mut registry = Registry::new();
        registry.insert(record("1")).unwrap();

        assert!(registry.contains(&DownloadId::from("1")));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&DownloadId::from("1")).unwrap();
        assert_eq!(removed.id.as_str(), "1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_refused() {
        let mut registry = Registry::new();
        registry.insert(record("1")).unwrap();

        let rejected = registry.insert(record("1")).unwrap_err();
        assert_eq!(rejected.id.as_str(), "1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_infos_and_drain() {
        let mut registry = Registry::new();
        registry.insert(record("2")).unwrap();
        registry.insert(record("1")).unwrap();

        let ids: Vec<String> = registry.infos().into_iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_infos_follow_issue_order() {
        let mut registry = Registry::new();
        for sequence in [10, 2, 1] {
            registry.insert(record(&format!("1700000000000-{}", sequence))).unwrap();
        }

        let ids: Vec<String> = registry.infos().into_iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["1700000000000-1", "1700000000000-2", "1700000000000-10"]);
    }
}
