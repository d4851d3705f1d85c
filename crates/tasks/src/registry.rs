//! Processor registry: maps a node's `processor_type` to an implementation.
//!
//! The registry is an ordinary value: build one, register processors, and hand
//! it to the engine behind an `Arc`. Lookups and registrations may happen
//! concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{RegistryError, TaskProcessor};

const DEFAULT_VERSION: &str = "default";

/// A registered processor plus its bookkeeping.
#[derive(Clone)]
pub struct ProcessorEntry {
    pub name: String,
    pub version: String,
    pub registration_id: u64,
    pub registered_at: DateTime<Utc>,
    pub processor: Arc<dyn TaskProcessor>,
}

impl std::fmt::Debug for ProcessorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorEntry")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("registration_id", &self.registration_id)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: usize,
    pub total_registered: u64,
    pub total_unregistered: u64,
}

/// Thread-safe `processor_type` → [`TaskProcessor`] map.
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: RwLock<HashMap<String, ProcessorEntry>>,
    total_registered: AtomicU64,
    total_unregistered: AtomicU64,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` under the default version of `name`.
    ///
    /// # Errors
    /// [`RegistryError::AlreadyRegistered`] if the name is taken, or a name
    /// validation error.
    pub fn register(
        &self,
        name: &str,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<(), RegistryError> {
        self.register_version(name, None, processor, false)
    }

    /// Register a specific version of a processor.
    ///
    /// With `allow_overwrite` an existing entry for the same name and version
    /// is replaced instead of rejected.
    pub fn register_version(
        &self,
        name: &str,
        version: Option<&str>,
        processor: Arc<dyn TaskProcessor>,
        allow_overwrite: bool,
    ) -> Result<(), RegistryError> {
        let name = normalize_name(name)?;
        let version = normalize_version(version)?;
        let key = entry_key(&name, &version);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&key) && !allow_overwrite {
            return Err(RegistryError::AlreadyRegistered { name, version });
        }

        let registration_id = self.total_registered.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            processor = %name,
            version = %version,
            overwrite = allow_overwrite,
            "registered processor"
        );
        entries.insert(
            key,
            ProcessorEntry {
                name,
                version,
                registration_id,
                registered_at: Utc::now(),
                processor,
            },
        );
        Ok(())
    }

    /// Find the default version of a processor.
    pub fn find(&self, name: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.find_version(name, None)
    }

    pub fn find_version(&self, name: &str, version: Option<&str>) -> Option<Arc<dyn TaskProcessor>> {
        let key = lookup_key(name, version)?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).map(|entry| Arc::clone(&entry.processor))
    }

    /// Remove the default version of a processor. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.unregister_version(name, None)
    }

    pub fn unregister_version(&self, name: &str, version: Option<&str>) -> bool {
        let Some(key) = lookup_key(name, version) else {
            return false;
        };
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        if removed.is_some() {
            self.total_unregistered.fetch_add(1, Ordering::Relaxed);
            info!(processor = %name.trim(), "unregistered processor");
        }
        removed.is_some()
    }

    /// Snapshot of every registration, ordered by name then version.
    pub fn list(&self) -> Vec<ProcessorEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ProcessorEntry> = entries.values().cloned().collect();
        list.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        list
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_unregistered: self.total_unregistered.load(Ordering::Relaxed),
        }
    }
}

fn is_valid_ident(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn normalize_name(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if !is_valid_ident(trimmed) {
        return Err(RegistryError::InvalidName(name.to_owned()));
    }
    Ok(trimmed.to_lowercase())
}

fn normalize_version(version: Option<&str>) -> Result<String, RegistryError> {
    match version.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(DEFAULT_VERSION.to_owned()),
        Some(v) if is_valid_ident(v) => Ok(v.to_owned()),
        Some(v) => Err(RegistryError::InvalidVersion(v.to_owned())),
    }
}

fn entry_key(name: &str, version: &str) -> String {
    format!("{name}:{version}")
}

// Lookups never fail loudly: an unusable name simply has no entry.
fn lookup_key(name: &str, version: Option<&str>) -> Option<String> {
    let name = normalize_name(name).ok()?;
    let version = normalize_version(version).ok()?;
    Some(entry_key(&name, &version))
}
