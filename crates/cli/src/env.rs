use crate::error::CliError;
use engine_config::settings::SyncSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Deployment wiring supplied out-of-band through the environment:
/// bucket locations, CRM endpoint and credentials, and optional overrides
/// for the invocation budget.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub source_bucket: PathBuf,
    pub state_bucket: PathBuf,
    pub source_prefix: String,
    pub crm_base_url: String,
    pub crm_token: String,
    pub total_budget_ms: Option<u64>,
    pub safety_margin_ms: Option<u64>,
}

fn required(name: &str) -> Result<String, CliError> {
    std::env::var(name).map_err(|_| CliError::MissingEnv(name.to_string()))
}

fn optional_ms(name: &str) -> Result<Option<u64>, CliError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CliError::InvalidEnv(name.to_string(), value)),
        Err(_) => Ok(None),
    }
}

impl Deployment {
    pub fn from_env() -> Result<Self, CliError> {
        Ok(Deployment {
            source_bucket: PathBuf::from(required("SOURCE_BUCKET")?),
            state_bucket: PathBuf::from(required("STATE_BUCKET")?),
            source_prefix: std::env::var("SOURCE_PREFIX").unwrap_or_else(|_| "delta_".to_string()),
            crm_base_url: required("CRM_BASE_URL")?,
            crm_token: required("CRM_TOKEN")?,
            total_budget_ms: optional_ms("TOTAL_BUDGET_MS")?,
            safety_margin_ms: optional_ms("SAFETY_MARGIN_MS")?,
        })
    }

    /// Engine settings with deployment overrides applied.
    pub fn settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.source_prefix = self.source_prefix.clone();
        if let Some(ms) = self.total_budget_ms {
            settings.total_budget = Duration::from_millis(ms);
        }
        if let Some(ms) = self.safety_margin_ms {
            settings.safety_margin = Duration::from_millis(ms);
        }
        settings
    }
}
