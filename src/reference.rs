use std::collections::HashMap;
use std::path::Path;

use csv::StringRecord;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ResolverError;
use crate::fs_util::open_text;
use crate::normalize::{NormalizedName, OrganismNormalizer};

pub const UNKNOWN_CLASSIFICATION: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceEntry {
    pub scientific_name: String,
    pub common_name: String,
    pub classification: String,
    pub kingdom: String,
    pub phylum: String,
    pub max_longevity_yrs: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, ReferenceEntry>,
    common_names: HashMap<String, String>,
}

struct Columns {
    scientific: Option<usize>,
    genus: Option<usize>,
    species: Option<usize>,
    common: Option<usize>,
    classification: Option<usize>,
    kingdom: Option<usize>,
    phylum: Option<usize>,
    longevity: Option<usize>,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            header.iter().position(|column| {
                let column = column.trim().to_lowercase();
                names.iter().any(|name| column == *name)
            })
        };
        let columns = Self {
            scientific: find(&["scientific name", "scientific_name"]),
            genus: find(&["genus"]),
            species: find(&["species"]),
            common: find(&["common name", "common_name"]),
            classification: find(&["class", "classification"]),
            kingdom: find(&["kingdom"]),
            phylum: find(&["phylum"]),
            longevity: find(&[
                "maximum longevity (yrs)",
                "max_longevity_yrs",
                "max lifespan",
                "max_lifespan",
            ]),
        };
        let has_name =
            columns.scientific.is_some() || (columns.genus.is_some() && columns.species.is_some());
        has_name.then_some(columns)
    }

    fn scientific_name(&self, row: &StringRecord) -> String {
        if let Some(value) = self.scientific.and_then(|idx| row.get(idx)) {
            return value.trim().to_string();
        }
        let genus = self.genus.and_then(|idx| row.get(idx)).unwrap_or("").trim();
        let species = self.species.and_then(|idx| row.get(idx)).unwrap_or("").trim();
        if genus.is_empty() || species.is_empty() {
            return String::new();
        }
        format!("{genus} {species}")
    }
}

fn field(row: &StringRecord, idx: Option<usize>) -> String {
    idx.and_then(|idx| row.get(idx))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

impl ReferenceTable {
    pub fn load(path: &Path) -> Result<Self, ResolverError> {
        let reader = open_text(path)?;
        let mut csv = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(reader);

        let header = csv
            .headers()
            .map_err(|err| ResolverError::data_load(path, err))?
            .clone();
        let columns = Columns::from_header(&header)
            .ok_or_else(|| ResolverError::data_load(path, "no scientific name column in header"))?;

        let mut table = Self::default();
        for row in csv.records() {
            let row = row.map_err(|err| ResolverError::data_load(path, err))?;
            let scientific_name = columns.scientific_name(&row);
            if scientific_name.is_empty() {
                continue;
            }
            let max_longevity_yrs = columns
                .longevity
                .and_then(|idx| row.get(idx))
                .and_then(|value| value.trim().parse::<f64>().ok());
            table.insert(ReferenceEntry {
                scientific_name,
                common_name: field(&row, columns.common),
                classification: field(&row, columns.classification),
                kingdom: field(&row, columns.kingdom),
                phylum: field(&row, columns.phylum),
                max_longevity_yrs,
            });
        }
        table.rebuild_common_names();

        info!(
            path = %path.display(),
            organisms = table.len(),
            common_names = table.common_names.len(),
            "reference table loaded"
        );
        Ok(table)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ReferenceEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.insert(entry);
        }
        table.rebuild_common_names();
        table
    }

    fn insert(&mut self, entry: ReferenceEntry) {
        let key = entry.scientific_name.to_lowercase();
        if let Some(previous) = self.entries.insert(key, entry) {
            warn!(
                name = %previous.scientific_name,
                "duplicate scientific name in reference table; keeping last row"
            );
        }
    }

    fn rebuild_common_names(&mut self) {
        let mut names = self.entries.values().collect::<Vec<_>>();
        names.sort_by(|a, b| a.scientific_name.cmp(&b.scientific_name));
        let mut index = HashMap::new();
        for entry in names {
            let common = entry.common_name.trim().to_lowercase();
            if common.is_empty() {
                continue;
            }
            index
                .entry(common)
                .or_insert_with(|| entry.scientific_name.to_lowercase());
        }
        self.common_names = index;
    }

    pub fn lookup(&self, name: &str) -> Option<&ReferenceEntry> {
        self.entries.get(&name.trim().to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn scientific_name_for_common(&self, common: &str) -> Option<&str> {
        self.common_names
            .get(&common.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn scientific_names(&self) -> Vec<String> {
        let mut names = self
            .entries
            .values()
            .map(|entry| entry.scientific_name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn classify(&self, name: &str, normalizer: &OrganismNormalizer) -> OrganismClassification {
        let normalized = normalizer.normalize(name, self);
        let entry = normalized
            .matched
            .then(|| self.lookup(&normalized.name))
            .flatten();
        OrganismClassification::new(name, normalized, entry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganismClassification {
    pub input: String,
    pub normalized: NormalizedName,
    pub in_reference: bool,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub classification: String,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub max_longevity_yrs: Option<f64>,
}

impl OrganismClassification {
    fn new(input: &str, normalized: NormalizedName, entry: Option<&ReferenceEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                input: input.to_string(),
                normalized,
                in_reference: true,
                scientific_name: Some(entry.scientific_name.clone()),
                common_name: Some(entry.common_name.clone()),
                classification: entry.classification.clone(),
                kingdom: Some(entry.kingdom.clone()),
                phylum: Some(entry.phylum.clone()),
                max_longevity_yrs: entry.max_longevity_yrs,
            },
            None => Self {
                input: input.to_string(),
                normalized,
                in_reference: false,
                scientific_name: None,
                common_name: None,
                classification: UNKNOWN_CLASSIFICATION.to_string(),
                kingdom: None,
                phylum: None,
                max_longevity_yrs: None,
            },
        }
    }
}
