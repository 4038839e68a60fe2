use crate::record::ResolvedChainResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    organism: Option<String>,
    classification: Option<String>,
}

impl RecordFilter {
    pub fn new(organism: Option<&str>, classification: Option<&str>) -> Self {
        let clean = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            organism: clean(organism).map(|value| value.to_lowercase()),
            classification: clean(classification),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.organism.is_none() && self.classification.is_none()
    }

    pub fn matches(&self, result: &ResolvedChainResult) -> bool {
        if self.is_pass_through() {
            return true;
        }
        // Rows without a reference match carry no canonical data to filter on.
        if !result.in_reference {
            return false;
        }

        if let Some(needle) = &self.organism {
            let hit = [
                result.organism_scientific_name.as_deref(),
                result.normalized_organism.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(needle.as_str()));
            if !hit {
                return false;
            }
        }

        if let Some(classification) = &self.classification {
            if result.classification != *classification {
                return false;
            }
        }
        true
    }
}
