#![allow(dead_code)]

use async_trait::async_trait;
use connectors::{
    crm::{ContactMatch, CrmClient, CrmError},
    store::{ObjectStore, StoreError},
};
use engine_config::settings::SyncSettings;
use engine_runtime::invocation::SyncEngine;
use model::records::deal::DealRecord;
use std::collections::{BTreeMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

/// In-memory bucket for driving the engine without a filesystem.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// Simulate an outage: every operation fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_available()?;
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_available()?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Scriptable CRM double: resolves every key except the ones listed as
/// unknown, fails whole lookup batches containing a poison key, and can
/// fail or shortfall chosen create batches.
#[derive(Default)]
pub struct ScriptedCrm {
    unknown_contacts: HashSet<String>,
    lookup_poison: Option<String>,
    failing_create_batches: HashSet<usize>,
    create_shortfall: usize,
    pub lookup_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    /// Deal names received by accepted create batches, in order.
    pub received: Mutex<Vec<String>>,
}

impl ScriptedCrm {
    pub fn resolving_all() -> Self {
        Self::default()
    }

    pub fn with_unknown_contacts(mut self, keys: &[&str]) -> Self {
        self.unknown_contacts = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_lookup_poison(mut self, key: &str) -> Self {
        self.lookup_poison = Some(key.to_string());
        self
    }

    pub fn with_failing_create_batches(mut self, batches: &[usize]) -> Self {
        self.failing_create_batches = batches.iter().copied().collect();
        self
    }

    pub fn with_create_shortfall(mut self, shortfall: usize) -> Self {
        self.create_shortfall = shortfall;
        self
    }

    pub fn received_names(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrmClient for ScriptedCrm {
    async fn lookup_contacts(&self, keys: &[String]) -> Result<Vec<ContactMatch>, CrmError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(poison) = &self.lookup_poison {
            if keys.contains(poison) {
                return Err(CrmError::Api {
                    status: 500,
                    message: "simulated lookup failure".into(),
                });
            }
        }

        Ok(keys
            .iter()
            .filter(|k| !self.unknown_contacts.contains(*k))
            .map(|k| ContactMatch {
                contact_key: k.clone(),
                crm_id: format!("crm-{k}"),
            })
            .collect())
    }

    async fn create_deals(&self, records: &[DealRecord]) -> Result<usize, CrmError> {
        let batch_index = self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_create_batches.contains(&batch_index) {
            return Err(CrmError::Api {
                status: 502,
                message: "simulated create failure".into(),
            });
        }

        self.received.lock().unwrap().extend(records.iter().map(|r| {
            r.property("linea")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        }));

        Ok(records.len().saturating_sub(self.create_shortfall))
    }
}

/// The two buckets an engine works against, shared across invocations so
/// resume scenarios can run a second engine on the same state.
pub struct Stores {
    pub source: Arc<InMemoryObjectStore>,
    pub state: Arc<InMemoryObjectStore>,
}

impl Stores {
    pub fn new() -> Self {
        Stores {
            source: Arc::new(InMemoryObjectStore::new()),
            state: Arc::new(InMemoryObjectStore::new()),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

pub fn engine_with(stores: &Stores, crm: Arc<ScriptedCrm>, settings: SyncSettings) -> SyncEngine {
    SyncEngine::new(stores.source.clone(), stores.state.clone(), crm, settings)
}

/// Settings for tests: no pauses, a budget that never interferes, and no
/// per-record cost estimate (so affordability never caps a walk).
pub fn relaxed_settings() -> SyncSettings {
    let mut settings = SyncSettings::default().without_pauses();
    settings.total_budget = Duration::from_secs(300);
    settings.safety_margin = Duration::from_secs(1);
    settings.per_record_cost = Duration::ZERO;
    settings
}

/// A CSV drop with `n` numbered records: contact `c-{i}`, name `deal-{i}`.
pub fn numbered_csv(n: usize) -> Vec<u8> {
    let mut out = String::from("contact_id;linea;amount\n");
    for i in 0..n {
        out.push_str(&format!("c-{i};deal-{i};{}\n", 100 + i));
    }
    out.into_bytes()
}

/// A CSV drop where the given row indexes are missing their contact key.
pub fn csv_with_missing_keys(n: usize, missing: &[usize]) -> Vec<u8> {
    let missing: HashSet<usize> = missing.iter().copied().collect();
    let mut out = String::from("contact_id;linea;amount\n");
    for i in 0..n {
        let contact = if missing.contains(&i) {
            String::new()
        } else {
            format!("c-{i}")
        };
        out.push_str(&format!("{contact};deal-{i};{}\n", 100 + i));
    }
    out.into_bytes()
}
