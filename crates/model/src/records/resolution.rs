use std::collections::HashMap;

/// Mapping from external contact keys to CRM-native ids.
///
/// Scoped to a single invocation and never persisted: resuming a file
/// re-resolves its contacts from scratch. A key's absence means either
/// "not found" or "not attempted before the resolution budget ran out";
/// callers cannot tell these apart and treat both as unroutable.
#[derive(Debug, Clone, Default)]
pub struct ContactResolution {
    ids: HashMap<String, String>,
}

impl ContactResolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contact_key: impl Into<String>, crm_id: impl Into<String>) {
        self.ids.insert(contact_key.into(), crm_id.into());
    }

    pub fn get(&self, contact_key: &str) -> Option<&str> {
        self.ids.get(contact_key).map(String::as_str)
    }

    pub fn contains(&self, contact_key: &str) -> bool {
        self.ids.contains_key(contact_key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
