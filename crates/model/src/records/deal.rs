use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One business record to synchronize into the CRM.
///
/// The payload is opaque to the engine; only `contact_key` is interpreted,
/// and `resolved_contact_id` is filled in by contact resolution. The original
/// key is kept alongside the resolved id so a record stays traceable to its
/// source row after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRecord {
    /// External contact identifier carried by the source row. Required;
    /// rows without it never become records.
    pub contact_key: String,

    /// Domain payload, carried through to the CRM as-is.
    pub properties: BTreeMap<String, serde_json::Value>,

    /// CRM-native contact id, filled by the resolver. `None` means the
    /// record is unroutable for the current invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_contact_id: Option<String>,
}

impl DealRecord {
    pub fn new(contact_key: impl Into<String>, properties: BTreeMap<String, serde_json::Value>) -> Self {
        DealRecord {
            contact_key: contact_key.into(),
            properties,
            resolved_contact_id: None,
        }
    }

    pub fn is_routable(&self) -> bool {
        self.resolved_contact_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routable_only_with_non_empty_resolved_id() {
        let mut record = DealRecord::new("c-1", BTreeMap::new());
        assert!(!record.is_routable());

        record.resolved_contact_id = Some(String::new());
        assert!(!record.is_routable());

        record.resolved_contact_id = Some("901".into());
        assert!(record.is_routable());
    }
}
