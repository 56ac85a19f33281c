use async_trait::async_trait;
use model::records::deal::DealRecord;

pub mod error;
pub mod rest;

pub use error::CrmError;
pub use rest::RestCrmClient;

/// A contact the CRM recognized during a batch lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMatch {
    /// The external key the lookup was made with.
    pub contact_key: String,
    /// The CRM-native object id.
    pub crm_id: String,
}

/// Batch operations against the CRM.
///
/// Both calls are all-or-nothing at the transport level: a failed request
/// yields an error for the whole batch, and the caller decides how to
/// degrade. `create_deals` may report fewer created entities than submitted
/// when the CRM rejects individual items.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Resolve external contact keys to CRM-native ids. Keys the CRM does
    /// not know are simply absent from the result.
    async fn lookup_contacts(&self, keys: &[String]) -> Result<Vec<ContactMatch>, CrmError>;

    /// Create a batch of deals. Every record must carry a resolved contact
    /// id. Returns the number of entities the CRM reports as created.
    async fn create_deals(&self, records: &[DealRecord]) -> Result<usize, CrmError>;
}
