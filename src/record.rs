use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::StructureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    LocalIndex,
    RemoteService,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::LocalIndex => write!(f, "local-index"),
            ResolutionSource::RemoteService => write!(f, "remote-service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismRef {
    pub scientific_name: String,
    pub taxonomy_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntity {
    pub entity_id: Option<String>,
    pub chains: Vec<String>,
    pub description: Option<String>,
    pub cross_refs: Vec<String>,
    pub organism: Option<OrganismRef>,
}

impl ChainEntity {
    pub fn has_chain(&self, chain: &str) -> bool {
        self.chains.iter().any(|label| label == chain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub structure_id: StructureId,
    pub found: bool,
    pub source: ResolutionSource,
    pub title: Option<String>,
    pub resolution: Vec<f64>,
    pub entities: Vec<ChainEntity>,
    pub error: Option<String>,
}

impl StructureRecord {
    pub fn not_found(
        structure_id: StructureId,
        source: ResolutionSource,
        error: impl Into<String>,
    ) -> Self {
        Self {
            structure_id,
            found: false,
            source,
            title: None,
            resolution: Vec::new(),
            entities: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn entity_for_chain(&self, chain: &str) -> Option<&ChainEntity> {
        self.entities.iter().find(|entity| entity.has_chain(chain))
    }

    pub fn chains(&self) -> impl Iterator<Item = (&str, &ChainEntity)> {
        self.entities.iter().flat_map(|entity| {
            entity
                .chains
                .iter()
                .map(move |chain| (chain.as_str(), entity))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedChainResult {
    pub line_number: u64,
    pub entry_id: String,
    pub structure_id: String,
    pub chain_id: String,
    pub protein_name: Option<String>,
    pub organism_scientific_name: Option<String>,
    pub taxonomy_id: Option<u64>,
    pub normalized_organism: Option<String>,
    pub organism_common_name: Option<String>,
    pub classification: String,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub max_longevity_yrs: Option<f64>,
    pub in_reference: bool,
    pub cross_refs: Vec<String>,
    pub source: ResolutionSource,
    pub title: Option<String>,
    pub raw_record: Value,
}
