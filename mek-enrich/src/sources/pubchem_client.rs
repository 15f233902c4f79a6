// PubChem PUG REST Client
//
// Property table lookup by name, CID, or HMDB accession (registry-id xref),
// followed by best-effort synonym and description requests for the CID.

use super::{build_http_client, SourceAdapter, SourceError, SourcePayload};
use crate::error::EnrichError;
use crate::types::{kinds, put_list, put_text, CanonicalField, FieldMap, Lookup, SourceKind};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

const PROPERTIES: &str = "MolecularFormula,MolecularWeight,CanonicalSMILES,InChI,IUPACName";

/// Synonym lists from PubChem run into the hundreds; keep the head
pub const MAX_SYNONYMS: usize = 20;

#[derive(Debug, Deserialize)]
struct PropertyResponse {
    #[serde(rename = "PropertyTable")]
    property_table: PropertyTable,
}

#[derive(Debug, Deserialize)]
struct PropertyTable {
    #[serde(rename = "Properties", default)]
    properties: Vec<CompoundProperties>,
}

#[derive(Debug, Deserialize)]
struct CompoundProperties {
    #[serde(rename = "CID")]
    cid: Option<u64>,
    #[serde(rename = "MolecularFormula")]
    molecular_formula: Option<String>,
    /// String in current responses, number in older ones
    #[serde(rename = "MolecularWeight")]
    molecular_weight: Option<Value>,
    #[serde(rename = "CanonicalSMILES", alias = "SMILES", alias = "ConnectivitySMILES")]
    smiles: Option<String>,
    #[serde(rename = "InChI")]
    inchi: Option<String>,
    #[serde(rename = "IUPACName")]
    iupac_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InformationResponse {
    #[serde(rename = "InformationList")]
    information_list: InformationList,
}

#[derive(Debug, Deserialize)]
struct InformationList {
    #[serde(rename = "Information", default)]
    information: Vec<Information>,
}

#[derive(Debug, Deserialize)]
struct Information {
    #[serde(rename = "Synonym", default)]
    synonyms: Vec<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
}

pub struct PubChemClient {
    client: reqwest::Client,
    base_url: String,
}

impl PubChemClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, EnrichError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, SourceError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SourceError::Unavailable(format!("invalid PubChem base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable("PubChem base URL cannot hold a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Property-table URL for the lookup, `None` when the lookup kind is not served
    fn property_url(&self, lookup: &Lookup) -> Result<Option<reqwest::Url>, SourceError> {
        let key = lookup.key().trim();
        let url = match lookup.kind() {
            None => self.endpoint(&["compound", "name", key, "property", PROPERTIES, "JSON"])?,
            Some(kinds::PUBCHEM_CID) => {
                self.endpoint(&["compound", "cid", key, "property", PROPERTIES, "JSON"])?
            }
            Some(kinds::HMDB) => self.endpoint(&[
                "compound", "xref", "RegistryID", key, "property", PROPERTIES, "JSON",
            ])?,
            Some(_) => return Ok(None),
        };
        Ok(Some(url))
    }

    async fn get_text(&self, url: reqwest::Url, what: &str) -> Result<String, SourceError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::from_status(response.status(), what));
        }
        Ok(response.text().await?)
    }

    async fn fetch_synonyms(&self, cid: &str) -> Result<Vec<String>, SourceError> {
        let url = self.endpoint(&["compound", "cid", cid, "synonyms", "JSON"])?;
        let body = self.get_text(url, "PubChem synonyms request").await?;
        parse_synonyms(&body)
    }

    async fn fetch_description(&self, cid: &str) -> Result<Option<String>, SourceError> {
        let url = self.endpoint(&["compound", "cid", cid, "description", "JSON"])?;
        let body = self.get_text(url, "PubChem description request").await?;
        parse_description(&body)
    }
}

#[async_trait]
impl SourceAdapter for PubChemClient {
    fn kind(&self) -> SourceKind {
        SourceKind::PubChem
    }

    fn accepts(&self, lookup: &Lookup) -> bool {
        matches!(lookup.kind(), None | Some(kinds::PUBCHEM_CID) | Some(kinds::HMDB))
            && !lookup.key().trim().is_empty()
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError> {
        let url = self.property_url(lookup)?.ok_or_else(|| {
            SourceError::NotFound(format!("identifier kind {:?} not served", lookup.kind()))
        })?;

        debug!(lookup_key = lookup.key(), "Fetching PubChem properties");
        let body = self.get_text(url, "PubChem property request").await?;
        let mut fields = parse_properties(&body)?;

        let cid = match fields.get(&CanonicalField::PubchemCid).and_then(|v| v.as_text()) {
            Some(cid) => cid.to_string(),
            None => return Ok(SourcePayload::from_fields(fields)),
        };

        // Secondary requests degrade the record, never fail it
        match self.fetch_synonyms(&cid).await {
            Ok(synonyms) => put_list(&mut fields, CanonicalField::Synonyms, synonyms),
            Err(e) => warn!(cid = %cid, error = %e, "PubChem synonyms unavailable"),
        }
        match self.fetch_description(&cid).await {
            Ok(Some(description)) => put_text(&mut fields, CanonicalField::Description, description),
            Ok(None) => {}
            Err(e) => warn!(cid = %cid, error = %e, "PubChem description unavailable"),
        }

        Ok(SourcePayload::from_fields(fields))
    }
}

/// First compound of a property-table response
pub fn parse_properties(body: &str) -> Result<FieldMap, SourceError> {
    let response: PropertyResponse = serde_json::from_str(body)?;
    let compound = response
        .property_table
        .properties
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::NotFound("empty PubChem property table".into()))?;

    let mut fields = FieldMap::new();
    if let Some(cid) = compound.cid {
        put_text(&mut fields, CanonicalField::PubchemCid, cid.to_string());
    }
    if let Some(formula) = compound.molecular_formula {
        put_text(&mut fields, CanonicalField::Formula, formula);
    }
    match compound.molecular_weight {
        Some(Value::String(weight)) => put_text(&mut fields, CanonicalField::MolecularWeight, weight),
        Some(Value::Number(weight)) => {
            put_text(&mut fields, CanonicalField::MolecularWeight, weight.to_string())
        }
        _ => {}
    }
    if let Some(smiles) = compound.smiles {
        put_text(&mut fields, CanonicalField::Smiles, smiles);
    }
    if let Some(inchi) = compound.inchi {
        put_text(&mut fields, CanonicalField::Inchi, inchi);
    }
    if let Some(iupac) = compound.iupac_name {
        put_text(&mut fields, CanonicalField::IupacName, iupac);
    }

    Ok(fields)
}

/// Synonyms of the first information entry, capped at `MAX_SYNONYMS`
pub fn parse_synonyms(body: &str) -> Result<Vec<String>, SourceError> {
    let response: InformationResponse = serde_json::from_str(body)?;
    Ok(response
        .information_list
        .information
        .into_iter()
        .flat_map(|info| info.synonyms)
        .filter(|s| !s.trim().is_empty())
        .take(MAX_SYNONYMS)
        .collect())
}

/// First non-empty description entry (the title entry carries none)
pub fn parse_description(body: &str) -> Result<Option<String>, SourceError> {
    let response: InformationResponse = serde_json::from_str(body)?;
    Ok(response
        .information_list
        .information
        .into_iter()
        .filter_map(|info| info.description)
        .find(|d| !d.trim().is_empty()))
}
