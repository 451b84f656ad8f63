//! A process-local registry.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{Filter, Registry, RegistryError, FACTORY_PID_KEY, PID_KEY};
use crate::provenance::Properties;

/// Handle to an entry of an [`InMemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pid: String,
}

impl MemoryEntry {
    pub fn pid(&self) -> &str {
        &self.pid
    }
}

#[derive(Debug)]
struct Record {
    factory_pid: Option<String>,
    properties: Option<Properties>,
    updates: usize,
}

impl Record {
    /// Stored properties plus the registry-assigned identity keys.
    fn visible_properties(&self, pid: &str) -> Option<Properties> {
        let mut properties = self.properties.clone()?;
        properties.insert(PID_KEY.to_string(), pid.to_string());
        if let Some(factory_pid) = &self.factory_pid {
            properties.insert(FACTORY_PID_KEY.to_string(), factory_pid.clone());
        }
        Some(properties)
    }
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, Record>,
    next_instance: usize,
    total_updates: usize,
    unavailable: Option<String>,
}

impl State {
    fn check_available(&self) -> Result<(), RegistryError> {
        match &self.unavailable {
            Some(reason) => Err(RegistryError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// [`Registry`] kept in memory.
///
/// Single entries are keyed by their id. Factory instances get the id
/// `<factory_pid>.<n>`. Entries without properties are invisible to [`Registry::list`].
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`RegistryError::Unavailable`]
    /// until called again with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.lock().unavailable = reason.map(str::to_string);
    }

    /// Ids of all entries, including ones not yet updated.
    pub fn pids(&self) -> Vec<String> {
        self.state.lock().records.keys().cloned().collect()
    }

    pub fn factory_pid(&self, pid: &str) -> Option<String> {
        self.state
            .lock()
            .records
            .get(pid)
            .and_then(|r| r.factory_pid.clone())
    }

    /// Properties of the entry as subscribers would see them.
    pub fn get(&self, pid: &str) -> Option<Properties> {
        self.state
            .lock()
            .records
            .get(pid)
            .and_then(|r| r.visible_properties(pid))
    }

    /// Number of updates pushed to the entry.
    pub fn update_count(&self, pid: &str) -> usize {
        self.state.lock().records.get(pid).map_or(0, |r| r.updates)
    }

    /// Number of updates pushed to any entry, deleted ones included.
    pub fn total_updates(&self) -> usize {
        self.state.lock().total_updates
    }
}

impl Registry for InMemoryRegistry {
    type Entry = MemoryEntry;

    fn list(&self, filter: &Filter) -> Result<Vec<MemoryEntry>, RegistryError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .records
            .iter()
            .filter(|(pid, record)| {
                record
                    .visible_properties(pid)
                    .is_some_and(|p| filter.matches(&p))
            })
            .map(|(pid, _)| MemoryEntry { pid: pid.clone() })
            .collect())
    }

    fn create_single(&self, pid: &str) -> Result<MemoryEntry, RegistryError> {
        let mut state = self.state.lock();
        state.check_available()?;
        state.records.entry(pid.to_string()).or_insert_with(|| Record {
            factory_pid: None,
            properties: None,
            updates: 0,
        });
        Ok(MemoryEntry {
            pid: pid.to_string(),
        })
    }

    fn create_factory(&self, factory_pid: &str) -> Result<MemoryEntry, RegistryError> {
        let mut state = self.state.lock();
        state.check_available()?;
        let pid = format!("{factory_pid}.{}", state.next_instance);
        state.next_instance += 1;
        state.records.insert(
            pid.clone(),
            Record {
                factory_pid: Some(factory_pid.to_string()),
                properties: None,
                updates: 0,
            },
        );
        Ok(MemoryEntry { pid })
    }

    fn properties(&self, entry: &MemoryEntry) -> Result<Option<Properties>, RegistryError> {
        let state = self.state.lock();
        state.check_available()?;
        let record = state
            .records
            .get(&entry.pid)
            .ok_or_else(|| RegistryError::NotFound(entry.pid.clone()))?;
        Ok(record.visible_properties(&entry.pid))
    }

    fn update(&self, entry: &MemoryEntry, mut properties: Properties) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        state.check_available()?;
        let record = state
            .records
            .get_mut(&entry.pid)
            .ok_or_else(|| RegistryError::NotFound(entry.pid.clone()))?;

        properties.remove(PID_KEY);
        properties.remove(FACTORY_PID_KEY);
        record.properties = Some(properties);
        record.updates += 1;
        state.total_updates += 1;
        Ok(())
    }

    fn delete(&self, entry: MemoryEntry) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        state.check_available()?;
        state
            .records
            .remove(&entry.pid)
            .map(|_| ())
            .ok_or(RegistryError::NotFound(entry.pid))
    }
}
