use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::StructureCache;
use crate::domain::StructureId;
use crate::error::ResolverError;
use crate::index::LocalIndex;
use crate::normalize::OrganismNormalizer;
use crate::rcsb::MetadataService;
use crate::record::{ResolutionSource, StructureRecord};
use crate::reference::{OrganismClassification, ReferenceTable};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CacheHit,
    Resolved,
    NotFound,
    Failed,
}

pub struct MetadataResolver<S: MetadataService> {
    cache: StructureCache,
    index: Option<Arc<LocalIndex>>,
    service: S,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub structure_id: StructureId,
    pub chain_id: String,
    pub found: bool,
    pub source: ResolutionSource,
    pub protein_name: Option<String>,
    pub taxonomy_id: Option<u64>,
    pub cross_refs: Vec<String>,
    pub organism: Option<OrganismClassification>,
    pub error: Option<String>,
}

impl<S: MetadataService> MetadataResolver<S> {
    pub fn new(service: S, cache: StructureCache, retry: RetryPolicy) -> Self {
        Self {
            cache,
            index: None,
            service,
            retry,
        }
    }

    pub fn with_index(mut self, index: Arc<LocalIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn cache(&self) -> &StructureCache {
        &self.cache
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Never fails: unresolvable structures come back with `found = false`.
    pub fn resolve(&self, id: &StructureId, use_local_index: bool) -> StructureRecord {
        self.resolve_with_outcome(id, use_local_index).0
    }

    pub fn resolve_with_outcome(
        &self,
        id: &StructureId,
        use_local_index: bool,
    ) -> (StructureRecord, Outcome) {
        if let Some(record) = self.cache.get(id) {
            debug!(structure = %id, "cache hit");
            return (record, Outcome::CacheHit);
        }

        if use_local_index {
            if let Some(record) = self
                .index
                .as_deref()
                .and_then(|index| index.structure_record(id))
            {
                self.cache.insert(record.clone());
                return (record, Outcome::Resolved);
            }
        }

        let result = self
            .retry
            .run("fetch_structure", |_| self.service.fetch_structure(id));
        match result {
            Ok(record) => {
                self.cache.insert(record.clone());
                (record, Outcome::Resolved)
            }
            Err(ResolverError::NotFound(_)) => {
                let record = StructureRecord::not_found(
                    id.clone(),
                    ResolutionSource::RemoteService,
                    "not found",
                );
                self.cache.insert(record.clone());
                (record, Outcome::NotFound)
            }
            Err(err) => {
                warn!(structure = %id, error = %err, "resolution failed");
                let record = StructureRecord::not_found(
                    id.clone(),
                    ResolutionSource::RemoteService,
                    err.to_string(),
                );
                (record, Outcome::Failed)
            }
        }
    }

    pub fn structures_for_cross_ref(
        &self,
        accession: &str,
        use_local_index: bool,
    ) -> Result<Vec<StructureRecord>, ResolverError> {
        if use_local_index {
            if let Some(index) = self.index.as_deref() {
                let ids = index.structures_for_cross_ref(accession);
                if !ids.is_empty() {
                    debug!(accession, hits = ids.len(), "cross-reference served by local index");
                    return Ok(ids.iter().map(|id| self.resolve(id, true)).collect());
                }
            }
        }

        let ids = self.retry.run("structures_for_cross_ref", |_| {
            self.service.structures_for_cross_ref(accession)
        })?;
        Ok(ids
            .iter()
            .map(|id| self.resolve(id, use_local_index))
            .collect())
    }

    pub fn chain_info(
        &self,
        id: &StructureId,
        chain: &str,
        table: &ReferenceTable,
        normalizer: &OrganismNormalizer,
        use_local_index: bool,
    ) -> ChainInfo {
        let record = self.resolve(id, use_local_index);
        let entity = record.entity_for_chain(chain);
        let error = match (&record.error, entity) {
            (Some(error), _) => Some(error.clone()),
            (None, None) => Some(format!("chain {chain} not present in {id}")),
            (None, Some(_)) => None,
        };
        ChainInfo {
            structure_id: id.clone(),
            chain_id: chain.to_string(),
            found: entity.is_some(),
            source: record.source,
            protein_name: entity.and_then(|entity| entity.description.clone()),
            taxonomy_id: entity
                .and_then(|entity| entity.organism.as_ref())
                .and_then(|organism| organism.taxonomy_id),
            cross_refs: entity
                .map(|entity| entity.cross_refs.clone())
                .unwrap_or_default(),
            organism: entity
                .and_then(|entity| entity.organism.as_ref())
                .map(|organism| table.classify(&organism.scientific_name, normalizer)),
            error,
        }
    }
}
