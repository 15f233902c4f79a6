// HMDB Metabolite Client
//
// Fetches `<base_url>/<accession>.xml` and maps the metabolite record onto
// canonical fields. Accepts only `hmdb` identifiers in the HMDB0000000 form.

use super::{build_http_client, SourceAdapter, SourceError, SourcePayload};
use crate::error::EnrichError;
use crate::types::{kinds, put_list, put_text, CanonicalField, FieldMap, Lookup, SourceKind};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://hmdb.ca/metabolites";

/// Descriptions longer than this are cut and suffixed with "..."
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

fn accession_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^HMDB\d{7}$").expect("static regex"))
}

/// True for a well-formed HMDB accession (`HMDB` + 7 digits)
pub fn is_valid_hmdb_id(value: &str) -> bool {
    accession_pattern().is_match(value.trim())
}

pub struct HmdbClient {
    client: reqwest::Client,
    base_url: String,
}

impl HmdbClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, EnrichError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn record_url(&self, accession: &str) -> String {
        format!("{}/{}.xml", self.base_url, accession)
    }
}

#[async_trait]
impl SourceAdapter for HmdbClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Hmdb
    }

    fn accepts(&self, lookup: &Lookup) -> bool {
        lookup.kind() == Some(kinds::HMDB)
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError> {
        let accession = lookup.key().trim();
        if !is_valid_hmdb_id(accession) {
            return Err(SourceError::NotFound(format!(
                "'{}' is not an HMDB accession",
                accession
            )));
        }

        let url = self.record_url(accession);
        debug!(accession, url = %url, "Fetching HMDB record");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::from_status(response.status(), "HMDB record request"));
        }

        let body = response.text().await?;
        let fields = parse_metabolite_xml(&body)?;
        Ok(SourcePayload::from_fields(fields))
    }
}

/// Parsed subset of an HMDB `<metabolite>` document
#[derive(Debug, Default, PartialEq)]
pub struct HmdbMetabolite {
    pub name: String,
    pub iupac_name: String,
    pub chemical_formula: String,
    pub average_molecular_weight: String,
    pub smiles: String,
    pub inchi: String,
    pub description: String,
    pub synonyms: Vec<String>,
    pub kingdom: String,
    pub super_class: String,
    pub class: String,
    pub sub_class: String,
    pub direct_parent: String,
}

/// Map an HMDB XML document to canonical fields
pub fn parse_metabolite_xml(xml: &str) -> Result<FieldMap, SourceError> {
    let metabolite = read_metabolite(xml)?;
    Ok(metabolite_fields(metabolite))
}

fn metabolite_fields(m: HmdbMetabolite) -> FieldMap {
    let mut fields = FieldMap::new();

    put_text(&mut fields, CanonicalField::CommonName, m.name);
    put_text(&mut fields, CanonicalField::IupacName, m.iupac_name);
    put_text(&mut fields, CanonicalField::Formula, m.chemical_formula);
    put_text(&mut fields, CanonicalField::MolecularWeight, m.average_molecular_weight);
    put_text(&mut fields, CanonicalField::Smiles, m.smiles);
    put_text(&mut fields, CanonicalField::Inchi, m.inchi);
    put_text(&mut fields, CanonicalField::Description, truncate_description(&m.description));

    // Synonyms that are single characters or whole sentences are noise
    put_list(
        &mut fields,
        CanonicalField::Synonyms,
        m.synonyms.into_iter().filter(|s| {
            let len = s.trim().chars().count();
            len > 1 && len < 100
        }),
    );

    put_list(
        &mut fields,
        CanonicalField::ChemicalClasses,
        [m.super_class.clone(), m.class.clone(), m.sub_class.clone()],
    );
    put_text(&mut fields, CanonicalField::Kingdom, m.kingdom);
    put_text(&mut fields, CanonicalField::SuperClass, m.super_class);
    put_text(&mut fields, CanonicalField::Class, m.class);
    put_text(&mut fields, CanonicalField::SubClass, m.sub_class);
    put_text(&mut fields, CanonicalField::DirectParent, m.direct_parent);

    fields
}

/// Cut to `MAX_DESCRIPTION_CHARS` characters (never inside a UTF-8 sequence)
pub fn truncate_description(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_DESCRIPTION_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Stream the document, collecting text of the elements we map.
///
/// Paths are relative to the root element, so nested `<description>` tags
/// (taxonomy, pathways) never overwrite the metabolite description.
fn read_metabolite(xml: &str) -> Result<HmdbMetabolite, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = HmdbMetabolite::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() {
                    if name != "metabolite" {
                        return Err(SourceError::MalformedResponse(format!(
                            "unexpected root element <{}>",
                            name
                        )));
                    }
                    saw_root = true;
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SourceError::MalformedResponse(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let rel: Vec<&str> = path.iter().skip(1).map(String::as_str).collect();
                assign(&mut out, &rel, text.trim());
                text.clear();
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SourceError::MalformedResponse(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !saw_root {
        return Err(SourceError::MalformedResponse("empty HMDB document".to_string()));
    }

    Ok(out)
}

fn assign(out: &mut HmdbMetabolite, rel: &[&str], value: &str) {
    if value.is_empty() {
        return;
    }
    let slot = match rel {
        ["name"] => &mut out.name,
        ["iupac_name"] => &mut out.iupac_name,
        ["chemical_formula"] => &mut out.chemical_formula,
        ["average_molecular_weight"] => &mut out.average_molecular_weight,
        ["smiles"] => &mut out.smiles,
        ["inchi"] => &mut out.inchi,
        ["description"] => &mut out.description,
        ["taxonomy", "kingdom"] => &mut out.kingdom,
        ["taxonomy", "super_class"] => &mut out.super_class,
        ["taxonomy", "class"] => &mut out.class,
        ["taxonomy", "sub_class"] => &mut out.sub_class,
        ["taxonomy", "direct_parent"] => &mut out.direct_parent,
        ["synonyms", "synonym"] => {
            out.synonyms.push(value.to_string());
            return;
        }
        _ => return,
    };
    *slot = value.to_string();
}
