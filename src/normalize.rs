use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::reference::ReferenceTable;

const ALIASES: &[(&str, &str)] = &[
    ("home sapiens", "homo sapiens"),
    ("homo sapien", "homo sapiens"),
    ("homo sapians", "homo sapiens"),
    ("human", "homo sapiens"),
    ("drosophila melangaster", "drosophila melanogaster"),
    ("drosophila melanogastor", "drosophila melanogaster"),
    ("mus muscullus", "mus musculus"),
    ("mus musclus", "mus musculus"),
    ("rattus norvegicius", "rattus norvegicus"),
    ("saccharomyces cerevisae", "saccharomyces cerevisiae"),
    ("caenorhabditis elegan", "caenorhabditis elegans"),
    ("bacillus coli", "escherichia coli"),
    ("bacterium coli", "escherichia coli"),
    ("bos bovis", "bos taurus"),
    ("micrococcus aureus", "staphylococcus aureus"),
    ("bacillus pestis", "yersinia pestis"),
    ("pasteurella pestis", "yersinia pestis"),
    ("balb/c mouse", "mus musculus"),
    ("c57bl/6 mouse", "mus musculus"),
    ("swiss mouse", "mus musculus"),
    ("lab mouse", "mus musculus"),
    ("mouse", "mus musculus"),
    ("buffalo rat", "rattus norvegicus"),
    ("wistar rat", "rattus norvegicus"),
    ("sprague-dawley rat", "rattus norvegicus"),
    ("brown rat", "rattus norvegicus"),
    ("rat", "rattus norvegicus"),
    ("bakers yeast", "saccharomyces cerevisiae"),
    ("brewer's yeast", "saccharomyces cerevisiae"),
    ("fruit fly", "drosophila melanogaster"),
    ("zebrafish", "danio rerio"),
    ("cattle", "bos taurus"),
    ("chicken", "gallus gallus"),
];

const STRAIN_KEYWORDS: &[&str] = &[
    "strain", "str.", "str", "substr.", "substr", "subsp.", "subsp", "serovar", "sv.", "pv.",
    "var.", "atcc", "dsm", "nctc", "jcm", "nbrc", "cgmcc", "ifo", "nrrl",
];

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Exact,
    Alias,
    Strain,
    CommonName,
    GenusSpecies,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedName {
    pub name: String,
    pub matched: bool,
    pub rule: Rule,
}

impl NormalizedName {
    fn hit(name: impl Into<String>, rule: Rule) -> Self {
        Self {
            name: name.into(),
            matched: true,
            rule,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrganismNormalizer {
    aliases: HashMap<String, String>,
}

impl Default for OrganismNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OrganismNormalizer {
    pub fn new() -> Self {
        let aliases = ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self { aliases }
    }

    pub fn with_aliases<I, K, V>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (from, to) in extra {
            self.aliases
                .insert(clean(from.as_ref()), clean(to.as_ref()));
        }
        self
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn normalize(&self, raw: &str, table: &ReferenceTable) -> NormalizedName {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return NormalizedName {
                name: cleaned,
                matched: false,
                rule: Rule::Unmatched,
            };
        }

        if table.contains(&cleaned) {
            return NormalizedName::hit(cleaned, Rule::Exact);
        }

        if let Some(alias) = self.alias(&cleaned) {
            if table.contains(alias) {
                return NormalizedName::hit(alias, Rule::Alias);
            }
        }

        let stripped = strip_strain(&cleaned);
        if let Some(stripped) = stripped.as_deref() {
            if table.contains(stripped) {
                return NormalizedName::hit(stripped, Rule::Strain);
            }
            if let Some(alias) = self.alias(stripped) {
                if table.contains(alias) {
                    return NormalizedName::hit(alias, Rule::Strain);
                }
            }
        }

        for candidate in std::iter::once(cleaned.as_str()).chain(stripped.as_deref()) {
            if let Some(scientific) = table.scientific_name_for_common(candidate) {
                if table.contains(scientific) {
                    return NormalizedName::hit(scientific, Rule::CommonName);
                }
            }
        }

        let tokens = cleaned.split(' ').collect::<Vec<_>>();
        if tokens.len() > 2 {
            let genus_species = tokens[..2].join(" ");
            if table.contains(&genus_species) {
                return NormalizedName::hit(genus_species, Rule::GenusSpecies);
            }
        }

        NormalizedName {
            name: cleaned,
            matched: false,
            rule: Rule::Unmatched,
        }
    }
}

fn clean(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn strip_strain(name: &str) -> Option<String> {
    let without_parens = PARENTHETICAL.replace_all(name, "");
    let mut tokens = without_parens.split_whitespace().collect::<Vec<_>>();

    if let Some(idx) = tokens
        .iter()
        .skip(2)
        .position(|token| STRAIN_KEYWORDS.contains(token))
    {
        tokens.truncate(idx + 2);
    }
    while tokens.len() > 2
        && tokens
            .last()
            .is_some_and(|token| token.chars().any(|ch| ch.is_ascii_digit()))
    {
        tokens.pop();
    }

    let stripped = tokens.join(" ");
    (stripped != name && !stripped.is_empty()).then_some(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceEntry;

    fn entry(scientific: &str, common: &str, class: &str) -> ReferenceEntry {
        ReferenceEntry {
            scientific_name: scientific.to_string(),
            common_name: common.to_string(),
            classification: class.to_string(),
            kingdom: "Animalia".to_string(),
            phylum: "Chordata".to_string(),
            max_longevity_yrs: None,
        }
    }

    fn table() -> ReferenceTable {
        ReferenceTable::from_entries(vec![
            entry("Homo sapiens", "Human", "Mammalia"),
            entry("Mus musculus", "House mouse", "Mammalia"),
            entry("Escherichia coli", "Escherichia coli", "Gammaproteobacteria"),
            entry("Saccharomyces cerevisiae", "Baker's yeast", "Saccharomycetes"),
            entry("Bacillus subtilis", "", "Bacilli"),
        ])
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let result = OrganismNormalizer::new().normalize("  HOMO   Sapiens ", &table());
        assert_eq!(result, NormalizedName::hit("homo sapiens", Rule::Exact));
    }

    #[test]
    fn typo_is_corrected_through_alias() {
        let result = OrganismNormalizer::new().normalize("Home sapiens", &table());
        assert_eq!(result.name, "homo sapiens");
        assert_eq!(result.rule, Rule::Alias);
    }

    #[test]
    fn strain_codes_are_removed() {
        let normalizer = OrganismNormalizer::new();
        let table = table();
        for input in [
            "Escherichia coli K-12",
            "Escherichia coli BL21(DE3)",
            "Escherichia coli (strain K12)",
            "Escherichia coli str. K-12 substr. MG1655",
            "Bacillus subtilis 168",
        ] {
            let result = normalizer.normalize(input, &table);
            assert!(result.matched, "failed for {input}");
            assert_eq!(result.rule, Rule::Strain, "rule for {input}");
        }
    }

    #[test]
    fn common_names_come_from_reference() {
        let result = OrganismNormalizer::new().normalize("Baker's yeast", &table());
        assert_eq!(result.name, "saccharomyces cerevisiae");
        assert_eq!(result.rule, Rule::CommonName);
    }

    #[test]
    fn genus_species_fallback() {
        let table = table();
        let result = OrganismNormalizer::new().normalize("Homo sapiens xylophone", &table);
        assert_eq!(result, NormalizedName::hit("homo sapiens", Rule::GenusSpecies));

        let missing = OrganismNormalizer::new().normalize("Arabidopsis thaliana ecotype", &table);
        assert!(!missing.matched);
        assert_eq!(missing.name, "arabidopsis thaliana ecotype");
        assert!(!table.contains("arabidopsis thaliana"));
    }

    #[test]
    fn configured_aliases_extend_table() {
        let normalizer =
            OrganismNormalizer::new().with_aliases([("Homo sapiens sapiens", "Homo sapiens")]);
        let result = normalizer.normalize("homo sapiens sapiens", &table());
        assert_eq!(result.rule, Rule::Alias);
    }

    #[test]
    fn empty_input_is_unmatched() {
        let result = OrganismNormalizer::new().normalize("   ", &table());
        assert!(!result.matched);
        assert_eq!(result.rule, Rule::Unmatched);
    }
}
