//! Offline name-pattern classifier
//!
//! Recognises lipid shorthand (`DG(`, `PC(`, `TG(`, `Cer(`), acyl-carnitines
//! and a handful of amino acids, and returns canned synonyms, class and
//! description. Useful for entities with placeholder IDs that no database
//! resolves.

use super::{SourceAdapter, SourceError, SourcePayload};
use crate::types::{put_list, put_text, CanonicalField, FieldMap, Lookup, SourceKind};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// One recognised family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPattern {
    pub family: &'static str,
    pub synonyms: &'static [&'static str],
    pub chemical_class: &'static str,
    pub description: &'static str,
}

const DIGLYCERIDE: ContextPattern = ContextPattern {
    family: "Diglyceride",
    synonyms: &["Diacylglycerol", "DAG", "1,2-Diacyl-sn-glycerol"],
    chemical_class: "Glycerolipid",
    description: "Lipid molecule involved in fat metabolism and cellular signaling pathways.",
};

const PHOSPHATIDYLCHOLINE: ContextPattern = ContextPattern {
    family: "Phosphatidylcholine",
    synonyms: &["PC", "Lecithin", "Phosphocholine"],
    chemical_class: "Phospholipid",
    description: "Major component of cell membranes and involved in lipid transport.",
};

const TRIGLYCERIDE: ContextPattern = ContextPattern {
    family: "Triglyceride",
    synonyms: &["Triacylglycerol", "TAG", "Neutral fat"],
    chemical_class: "Triacylglycerol",
    description: "Storage form of fat in adipose tissue and major energy reserve.",
};

const CERAMIDE: ContextPattern = ContextPattern {
    family: "Ceramide",
    synonyms: &["Ceramide", "N-acylsphingosine"],
    chemical_class: "Sphingolipid",
    description: "Sphingolipid involved in cell membrane structure and signaling.",
};

const ACYLCARNITINE: ContextPattern = ContextPattern {
    family: "Acylcarnitine",
    synonyms: &["Acylcarnitine", "Fatty acid carnitine ester"],
    chemical_class: "Acylcarnitine",
    description: "Fatty acid derivative involved in fatty acid oxidation and energy metabolism.",
};

const AMINO_ACID: ContextPattern = ContextPattern {
    family: "Amino acid",
    synonyms: &["Amino acid"],
    chemical_class: "Amino acid",
    description: "Building block of proteins involved in various metabolic processes.",
};

const AMINO_ACID_NAMES: [&str; 5] = ["leucine", "glycine", "alanine", "valine", "isoleucine"];

// Acyl-carnitine shorthand such as C2, C16:1, C5-DC
fn carnitine_shorthand() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^C\d+(:\d+)?\b").expect("static regex"))
}

/// First matching family for a metabolite name (checked in fixed order)
pub fn classify(name: &str) -> Option<&'static ContextPattern> {
    let name = name.trim();
    let lower = name.to_lowercase();

    if name.contains("DG(") || lower.contains("diglyceride") {
        Some(&DIGLYCERIDE)
    } else if name.contains("PC(") || lower.contains("phosphatidylcholine") {
        Some(&PHOSPHATIDYLCHOLINE)
    } else if name.contains("TG(") || lower.contains("triglyceride") {
        Some(&TRIGLYCERIDE)
    } else if lower.contains("ceramide") || lower.contains("cer(") {
        Some(&CERAMIDE)
    } else if lower.contains("carnitine") || carnitine_shorthand().is_match(name) {
        Some(&ACYLCARNITINE)
    } else if AMINO_ACID_NAMES.iter().any(|aa| lower.contains(aa)) {
        Some(&AMINO_ACID)
    } else {
        None
    }
}

fn pattern_fields(pattern: &ContextPattern) -> FieldMap {
    let mut fields = FieldMap::new();
    put_list(&mut fields, CanonicalField::Synonyms, pattern.synonyms.iter().copied());
    put_list(&mut fields, CanonicalField::ChemicalClasses, [pattern.chemical_class]);
    put_text(&mut fields, CanonicalField::Class, pattern.chemical_class);
    put_text(&mut fields, CanonicalField::Description, pattern.description);
    fields
}

#[derive(Debug, Default)]
pub struct ContextualClassifier;

impl ContextualClassifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceAdapter for ContextualClassifier {
    fn kind(&self) -> SourceKind {
        SourceKind::Contextual
    }

    fn accepts(&self, lookup: &Lookup) -> bool {
        lookup.is_name_only() && !lookup.entity_name.trim().is_empty()
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError> {
        let pattern = classify(&lookup.entity_name).ok_or_else(|| {
            SourceError::NotFound(format!("no known pattern for '{}'", lookup.entity_name))
        })?;
        Ok(SourcePayload::from_fields(pattern_fields(pattern)))
    }
}
