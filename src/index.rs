use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use csv::StringRecord;
use tracing::info;

use crate::domain::StructureId;
use crate::error::ResolverError;
use crate::fs_util::open_text;
use crate::record::{ChainEntity, OrganismRef, ResolutionSource, StructureRecord};

type ChainKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    cross_refs: BTreeMap<ChainKey, Vec<String>>,
    taxonomy: BTreeMap<ChainKey, OrganismRef>,
    by_cross_ref: HashMap<String, BTreeSet<String>>,
}

fn column(header: &StringRecord, names: &[&str]) -> Option<usize> {
    header.iter().position(|value| {
        let value = value.trim().to_lowercase();
        names.iter().any(|name| value == *name)
    })
}

fn read_rows<F>(path: &Path, required: &[&[&str]], mut each: F) -> Result<usize, ResolverError>
where
    F: FnMut(&[usize], &StringRecord),
{
    let reader = open_text(path)?;
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader);
    let header = csv
        .headers()
        .map_err(|err| ResolverError::data_load(path, err))?
        .clone();
    let mut positions = Vec::with_capacity(required.len());
    for names in required {
        let idx = column(&header, names).ok_or_else(|| {
            ResolverError::data_load(path, format!("missing column {}", names[0]))
        })?;
        positions.push(idx);
    }
    let mut rows = 0usize;
    for row in csv.records() {
        let row = row.map_err(|err| ResolverError::data_load(path, err))?;
        each(&positions, &row);
        rows += 1;
    }
    Ok(rows)
}

fn key(row: &StringRecord, structure: usize, chain: usize) -> Option<ChainKey> {
    let structure = row.get(structure)?.trim().to_lowercase();
    let chain = row.get(chain)?.trim().to_string();
    (!structure.is_empty() && !chain.is_empty()).then_some((structure, chain))
}

impl LocalIndex {
    pub fn load(cross_ref_path: &Path, taxonomy_path: &Path) -> Result<Self, ResolverError> {
        let mut index = Self::default();

        let cross_ref_rows = read_rows(
            cross_ref_path,
            &[&["pdb", "pdb_id"], &["chain", "chain_id"], &["sp_primary", "uniprot", "accession"]],
            |cols, row| {
                let Some(key) = key(row, cols[0], cols[1]) else {
                    return;
                };
                let accession = row.get(cols[2]).unwrap_or("").trim();
                if !accession.is_empty() {
                    index.insert_cross_ref(key, accession);
                }
            },
        )?;

        let taxonomy_rows = read_rows(
            taxonomy_path,
            &[
                &["pdb", "pdb_id"],
                &["chain", "chain_id"],
                &["tax_id", "taxonomy_id"],
                &["scientific_name", "organism"],
            ],
            |cols, row| {
                let Some(key) = key(row, cols[0], cols[1]) else {
                    return;
                };
                let scientific_name = row.get(cols[3]).unwrap_or("").trim().to_string();
                let taxonomy_id = row.get(cols[2]).and_then(|v| v.trim().parse::<u64>().ok());
                index.taxonomy.entry(key).or_insert(OrganismRef {
                    scientific_name,
                    taxonomy_id,
                });
            },
        )?;

        info!(
            cross_ref_rows,
            taxonomy_rows,
            chains = index.chain_count(),
            "local index loaded"
        );
        Ok(index)
    }

    fn insert_cross_ref(&mut self, key: ChainKey, accession: &str) {
        self.by_cross_ref
            .entry(accession.to_uppercase())
            .or_default()
            .insert(key.0.clone());
        let accessions = self.cross_refs.entry(key).or_default();
        if !accessions.iter().any(|existing| existing == accession) {
            accessions.push(accession.to_string());
        }
    }

    pub fn with_chain(
        mut self,
        structure: &str,
        chain: &str,
        cross_refs: &[&str],
        organism: Option<OrganismRef>,
    ) -> Self {
        let key = (structure.to_lowercase(), chain.to_string());
        for accession in cross_refs {
            self.insert_cross_ref(key.clone(), accession);
        }
        if let Some(organism) = organism {
            self.taxonomy.insert(key, organism);
        }
        self
    }

    pub fn chain_cross_refs(&self, id: &StructureId, chain: &str) -> &[String] {
        self.cross_refs
            .get(&(id.as_str().to_string(), chain.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn chain_taxonomy(&self, id: &StructureId, chain: &str) -> Option<&OrganismRef> {
        self.taxonomy
            .get(&(id.as_str().to_string(), chain.to_string()))
    }

    fn chains_of<'a, V>(
        map: &'a BTreeMap<ChainKey, V>,
        id: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        map.range((id.to_string(), String::new())..)
            .take_while(move |((structure, _), _)| structure == id)
            .map(|((_, chain), _)| chain.as_str())
    }

    pub fn contains(&self, id: &StructureId) -> bool {
        Self::chains_of(&self.cross_refs, id.as_str()).next().is_some()
            || Self::chains_of(&self.taxonomy, id.as_str()).next().is_some()
    }

    pub fn structure_record(&self, id: &StructureId) -> Option<StructureRecord> {
        let chains = Self::chains_of(&self.cross_refs, id.as_str())
            .chain(Self::chains_of(&self.taxonomy, id.as_str()))
            .collect::<BTreeSet<_>>();
        if chains.is_empty() {
            return None;
        }

        let mut entities: Vec<ChainEntity> = Vec::new();
        for chain in chains {
            let cross_refs = self.chain_cross_refs(id, chain).to_vec();
            let organism = self.chain_taxonomy(id, chain).cloned();
            match entities
                .iter_mut()
                .find(|entity| entity.cross_refs == cross_refs && entity.organism == organism)
            {
                Some(entity) => entity.chains.push(chain.to_string()),
                None => entities.push(ChainEntity {
                    entity_id: None,
                    chains: vec![chain.to_string()],
                    description: None,
                    cross_refs,
                    organism,
                }),
            }
        }

        Some(StructureRecord {
            structure_id: id.clone(),
            found: true,
            source: ResolutionSource::LocalIndex,
            title: None,
            resolution: Vec::new(),
            entities,
            error: None,
        })
    }

    pub fn structures_for_cross_ref(&self, accession: &str) -> Vec<StructureId> {
        self.by_cross_ref
            .get(&accession.trim().to_uppercase())
            .map(|ids| ids.iter().filter_map(|id| id.parse().ok()).collect())
            .unwrap_or_default()
    }

    pub fn chain_count(&self) -> usize {
        self.cross_refs.len().max(self.taxonomy.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIPROT: &str = "# 2024/06/01 - 12:00 | PDB: 22.24 | UniProt: 2024.03\n\
PDB\tCHAIN\tSP_PRIMARY\tRES_BEG\tRES_END\n\
2uxq\tA\tP69905\t1\t141\n\
2uxq\tB\tP68871\t1\t146\n\
2uxq\tC\tP69905\t1\t141\n\
1mbn\tA\tP02185\t1\t153\n";

    const TAXONOMY: &str = "# 2024/06/01 - 12:00 | PDB: 22.24\n\
PDB\tCHAIN\tTAX_ID\tSCIENTIFIC_NAME\n\
2uxq\tA\t9606\tHomo sapiens\n\
2uxq\tB\t9606\tHomo sapiens\n\
2uxq\tC\t9606\tHomo sapiens\n\
1mbn\tA\t9755\tPhyseter catodon\n";

    fn load() -> LocalIndex {
        let temp = tempfile::tempdir().unwrap();
        let uniprot = temp.path().join("pdb_chain_uniprot.tsv");
        let taxonomy = temp.path().join("pdb_chain_taxonomy.tsv");
        std::fs::write(&uniprot, UNIPROT).unwrap();
        std::fs::write(&taxonomy, TAXONOMY).unwrap();
        LocalIndex::load(&uniprot, &taxonomy).unwrap()
    }

    #[test]
    fn groups_chains_into_entities() {
        let index = load();
        let id: StructureId = "2UXQ".parse().unwrap();
        let record = index.structure_record(&id).unwrap();
        assert_eq!(record.source, ResolutionSource::LocalIndex);
        assert_eq!(record.entities.len(), 2);
        assert_eq!(record.entity_for_chain("C").unwrap().chains, vec!["A", "C"]);
        assert_eq!(
            index.chain_taxonomy(&id, "B").unwrap().taxonomy_id,
            Some(9606)
        );
    }

    #[test]
    fn unknown_structure_is_absent() {
        let index = load();
        let id: StructureId = "9zzz".parse().unwrap();
        assert!(index.structure_record(&id).is_none());
        assert!(!index.contains(&id));
    }

    #[test]
    fn reverse_lookup_by_accession() {
        let index = load();
        let ids = index.structures_for_cross_ref("p69905");
        assert_eq!(ids, vec!["2uxq".parse::<StructureId>().unwrap()]);
        assert!(index.structures_for_cross_ref("Q00000").is_empty());
    }

    #[test]
    fn missing_column_is_data_load_error() {
        let temp = tempfile::tempdir().unwrap();
        let bad = temp.path().join("bad.tsv");
        std::fs::write(&bad, "PDB\tSOMETHING\n2uxq\tA\n").unwrap();
        let err = LocalIndex::load(&bad, &bad).unwrap_err();
        assert!(matches!(err, ResolverError::DataLoad { .. }));
    }
}
