use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::domain::StructureId;
use crate::error::ResolverError;
use crate::record::{ChainEntity, OrganismRef, ResolutionSource, StructureRecord};

const DATA_API: &str = "https://data.rcsb.org/rest/v1/core";
const SEARCH_API: &str = "https://search.rcsb.org/rcsbsearch/v2/query";

/// Remote structure-metadata backend. One call is one attempt; retries live in the resolver.
pub trait MetadataService: Send + Sync {
    fn fetch_structure(&self, id: &StructureId) -> Result<StructureRecord, ResolverError>;
    fn structures_for_cross_ref(&self, accession: &str)
    -> Result<Vec<StructureId>, ResolverError>;
}

impl<T: MetadataService + ?Sized> MetadataService for &T {
    fn fetch_structure(&self, id: &StructureId) -> Result<StructureRecord, ResolverError> {
        (**self).fetch_structure(id)
    }

    fn structures_for_cross_ref(
        &self,
        accession: &str,
    ) -> Result<Vec<StructureId>, ResolverError> {
        (**self).structures_for_cross_ref(accession)
    }
}

#[derive(Clone)]
pub struct RcsbHttpClient {
    client: Client,
}

impl RcsbHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, ResolverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-sr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ResolverError::RcsbHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ResolverError::RcsbHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn entry_url(id: &StructureId) -> String {
        format!("{DATA_API}/entry/{}", id.as_str().to_uppercase())
    }

    fn polymer_entity_url(id: &StructureId, entity_id: &str) -> String {
        format!(
            "{DATA_API}/polymer_entity/{}/{entity_id}",
            id.as_str().to_uppercase()
        )
    }

    fn send(&self, id: &str, request: RequestBuilder) -> Result<Response, ResolverError> {
        let response = request
            .send()
            .map_err(|err| classify_send_error(id, &err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ResolverError::NotFound(id.to_string()));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "RCSB request failed".to_string());
        if is_retryable_status(status.as_u16()) {
            return Err(ResolverError::TransientResolution {
                id: id.to_string(),
                message: format!("status {}: {message}", status.as_u16()),
            });
        }
        Err(ResolverError::RcsbStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn get_json(&self, id: &str, url: &str) -> Result<Value, ResolverError> {
        let response = self.send(id, self.client.get(url))?;
        response
            .json()
            .map_err(|err| classify_send_error(id, &err))
    }
}

impl MetadataService for RcsbHttpClient {
    fn fetch_structure(&self, id: &StructureId) -> Result<StructureRecord, ResolverError> {
        let entry = self.get_json(id.as_str(), &Self::entry_url(id))?;
        let summary = parse_entry(&entry);

        let mut entities = Vec::with_capacity(summary.entity_ids.len());
        for entity_id in &summary.entity_ids {
            let url = Self::polymer_entity_url(id, entity_id);
            let value = self.get_json(id.as_str(), &url)?;
            entities.push(parse_polymer_entity(&value, entity_id));
        }

        Ok(StructureRecord {
            structure_id: id.clone(),
            found: true,
            source: ResolutionSource::RemoteService,
            title: summary.title,
            resolution: summary.resolution,
            entities,
            error: None,
        })
    }

    fn structures_for_cross_ref(
        &self,
        accession: &str,
    ) -> Result<Vec<StructureId>, ResolverError> {
        let query = json!({
            "query": {
                "type": "terminal",
                "service": "text",
                "parameters": {
                    "attribute": "rcsb_polymer_entity_container_identifiers.reference_sequence_identifiers.database_accession",
                    "operator": "exact_match",
                    "value": accession,
                }
            },
            "return_type": "entry",
            "request_options": { "return_all_hits": true }
        });
        let response = self.send(accession, self.client.post(SEARCH_API).json(&query))?;
        // The search service answers 204 when nothing matches.
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let value: Value = response
            .json()
            .map_err(|err| classify_send_error(accession, &err))?;
        Ok(parse_search_hits(&value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntrySummary {
    pub title: Option<String>,
    pub resolution: Vec<f64>,
    pub entity_ids: Vec<String>,
}

pub fn parse_entry(raw: &Value) -> EntrySummary {
    let title = raw
        .get("struct")
        .and_then(|value| value.get("title"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());
    let resolution = raw
        .get("rcsb_entry_info")
        .and_then(|value| value.get("resolution_combined"))
        .and_then(|value| value.as_array())
        .map(|array| array.iter().filter_map(|value| value.as_f64()).collect())
        .unwrap_or_default();
    let entity_ids = raw
        .get("rcsb_entry_container_identifiers")
        .and_then(|value| value.get("polymer_entity_ids"))
        .and_then(|value| value.as_array())
        .map(|array| {
            array
                .iter()
                .filter_map(|value| value.as_str().map(|v| v.to_string()))
                .collect()
        })
        .unwrap_or_default();
    EntrySummary {
        title,
        resolution,
        entity_ids,
    }
}

pub fn parse_polymer_entity(raw: &Value, entity_id: &str) -> ChainEntity {
    let identifiers = raw.get("rcsb_polymer_entity_container_identifiers");
    let strings = |value: Option<&Value>| -> Vec<String> {
        value
            .and_then(|v| v.as_array())
            .map(|array| {
                array
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    };

    let chains = strings(identifiers.and_then(|v| v.get("auth_asym_ids")));
    let mut cross_refs = strings(identifiers.and_then(|v| v.get("uniprot_ids")));
    if cross_refs.is_empty() {
        if let Some(refs) = identifiers
            .and_then(|v| v.get("reference_sequence_identifiers"))
            .and_then(|v| v.as_array())
        {
            for item in refs {
                let db = item.get("database_name").and_then(|v| v.as_str());
                let accession = item.get("database_accession").and_then(|v| v.as_str());
                if let (Some("UniProt"), Some(accession)) = (db, accession) {
                    if !cross_refs.iter().any(|existing| existing == accession) {
                        cross_refs.push(accession.to_string());
                    }
                }
            }
        }
    }

    let description = raw
        .get("rcsb_polymer_entity")
        .and_then(|v| v.get("pdbx_description"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let organism = raw
        .get("rcsb_entity_source_organism")
        .and_then(|v| v.as_array())
        .and_then(|array| array.first())
        .and_then(|source| {
            let name = source
                .get("ncbi_scientific_name")
                .or_else(|| source.get("scientific_name"))
                .and_then(|v| v.as_str())?;
            Some(OrganismRef {
                scientific_name: name.to_string(),
                taxonomy_id: source.get("ncbi_taxonomy_id").and_then(|v| v.as_u64()),
            })
        })
        .or_else(|| {
            raw.get("entity_src_gen")
                .and_then(|v| v.as_array())
                .and_then(|array| array.first())
                .and_then(|source| {
                    let name = source
                        .get("pdbx_gene_src_scientific_name")
                        .and_then(|v| v.as_str())?;
                    Some(OrganismRef {
                        scientific_name: name.to_string(),
                        taxonomy_id: source
                            .get("pdbx_gene_src_ncbi_taxonomy_id")
                            .and_then(|v| v.as_str())
                            .and_then(|v| v.parse().ok()),
                    })
                })
        });

    ChainEntity {
        entity_id: identifiers
            .and_then(|v| v.get("entity_id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| Some(entity_id.to_string())),
        chains,
        description,
        cross_refs,
        organism,
    }
}

pub fn parse_search_hits(raw: &Value) -> Vec<StructureId> {
    raw.get("result_set")
        .and_then(|v| v.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("identifier").and_then(|v| v.as_str()))
                .filter_map(|id| id.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn classify_send_error(id: &str, err: &reqwest::Error) -> ResolverError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return ResolverError::TransientResolution {
            id: id.to_string(),
            message: err.to_string(),
        };
    }
    ResolverError::RcsbHttp(err.to_string())
}
