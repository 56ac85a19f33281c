use crate::crm::{ContactMatch, CrmClient, CrmError};
use async_trait::async_trait;
use model::records::deal::DealRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Property on the CRM contact object holding the external key.
const CONTACT_KEY_PROPERTY: &str = "contact_id";
/// CRM-defined association type linking a deal to its contact.
const DEAL_TO_CONTACT_TYPE_ID: u32 = 3;

// Wire types mirror the CRM JSON exactly and stay private to this module.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBatchReadRequest {
    id_property: &'static str,
    inputs: Vec<WireReadInput>,
}

#[derive(Serialize)]
struct WireReadInput {
    id: String,
}

#[derive(Deserialize)]
struct WireBatchReadResponse {
    #[serde(default)]
    results: Vec<WireContact>,
}

#[derive(Deserialize)]
struct WireContact {
    id: String,
    #[serde(default)]
    properties: WireContactProperties,
}

#[derive(Deserialize, Default)]
struct WireContactProperties {
    contact_id: Option<String>,
}

#[derive(Serialize)]
struct WireBatchCreateRequest<'a> {
    inputs: Vec<WireDealInput<'a>>,
}

#[derive(Serialize)]
struct WireDealInput<'a> {
    properties: &'a BTreeMap<String, serde_json::Value>,
    associations: [WireAssociation; 1],
}

#[derive(Serialize)]
struct WireAssociation {
    types: [WireAssociationType; 1],
    to: WireAssociationTarget,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAssociationType {
    association_category: &'static str,
    association_type_id: u32,
}

#[derive(Serialize)]
struct WireAssociationTarget {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireBatchCreateResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Error envelope the CRM returns on non-success responses.
#[derive(Deserialize)]
struct WireErrorEnvelope {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<WireErrorDetail>,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: Option<String>,
}

/// REST implementation of [`CrmClient`] against the CRM's v3 batch API.
///
/// Each request carries its own timeout, shorter than the invocation
/// deadline: a hung call must cost one failed batch, never the whole
/// invocation's margin.
pub struct RestCrmClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestCrmClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(RestCrmClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CrmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(CrmError::Api {
            status: status.as_u16(),
            message: parse_error_message(&text),
        })
    }
}

/// Pulls a readable message out of the CRM error envelope, falling back to
/// the raw body.
fn parse_error_message(body: &str) -> String {
    match serde_json::from_str::<WireErrorEnvelope>(body) {
        Ok(envelope) => {
            let mut parts = Vec::new();
            if let Some(message) = envelope.message {
                parts.push(message);
            }
            for detail in envelope.errors {
                if let Some(message) = detail.message {
                    parts.push(message);
                }
            }
            if parts.is_empty() {
                body.to_string()
            } else {
                parts.join("; ")
            }
        }
        Err(_) => body.to_string(),
    }
}

#[async_trait]
impl CrmClient for RestCrmClient {
    async fn lookup_contacts(&self, keys: &[String]) -> Result<Vec<ContactMatch>, CrmError> {
        let request = WireBatchReadRequest {
            id_property: CONTACT_KEY_PROPERTY,
            inputs: keys.iter().map(|k| WireReadInput { id: k.clone() }).collect(),
        };

        let response = self
            .post_json("/crm/v3/objects/contacts/batch/read", &request)
            .await?;
        let body: WireBatchReadResponse = response.json().await?;

        let mut matches = Vec::with_capacity(body.results.len());
        for contact in body.results {
            match contact.properties.contact_id {
                Some(contact_key) => matches.push(ContactMatch {
                    contact_key,
                    crm_id: contact.id,
                }),
                None => {
                    warn!(crm_id = %contact.id, "Lookup result without a contact key property");
                }
            }
        }

        debug!(requested = keys.len(), matched = matches.len(), "Contact batch read");
        Ok(matches)
    }

    async fn create_deals(&self, records: &[DealRecord]) -> Result<usize, CrmError> {
        let mut inputs = Vec::with_capacity(records.len());
        for record in records {
            let contact_id = record
                .resolved_contact_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or(CrmError::UnroutableRecord)?;

            inputs.push(WireDealInput {
                properties: &record.properties,
                associations: [WireAssociation {
                    types: [WireAssociationType {
                        association_category: "HUBSPOT_DEFINED",
                        association_type_id: DEAL_TO_CONTACT_TYPE_ID,
                    }],
                    to: WireAssociationTarget {
                        id: contact_id.to_string(),
                        kind: "contact",
                    },
                }],
            });
        }

        let request = WireBatchCreateRequest { inputs };
        let response = self
            .post_json("/crm/v3/objects/deals/batch/create", &request)
            .await?;
        let body: WireBatchCreateResponse = response.json().await?;

        debug!(submitted = records.len(), created = body.results.len(), "Deal batch create");
        Ok(body.results.len())
    }
}
