use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::error::RepurposeError;

/// Tanimoto threshold (percent) for the structural similarity search.
pub const SIMILARITY_THRESHOLD: u8 = 60;

/// Result cap for one similarity query.
pub const SIMILARITY_LIMIT: u8 = 20;

/// The fields we keep from a ChEMBL molecule document, shared between name
/// search hits and similarity hits (`similarity` is only set for the
/// latter).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoleculeRecord {
    pub chembl_id: String,
    pub score: Option<f64>,
    pub similarity: Option<f64>,
    pub atc_names: Vec<String>,
    pub pref_name: Option<String>,
    pub max_phase: Option<f64>,
    pub therapeutic: bool,
    pub smiles: Option<String>,
    pub inchi_key: Option<String>,
}

pub trait ChemblClient: Send + Sync {
    /// First molecule returned by a free-text name search, or None when the
    /// name is unknown to ChEMBL.
    fn search_molecule(&self, name: &str) -> Result<Option<MoleculeRecord>, RepurposeError>;

    /// Molecules structurally similar to `smiles` at the fixed threshold
    /// and cap.
    fn similar_molecules(&self, smiles: &str) -> Result<Vec<MoleculeRecord>, RepurposeError>;
}

#[derive(Clone)]
pub struct ChemblHttpClient {
    client: Client,
    base_url: String,
}

impl ChemblHttpClient {
    pub fn new() -> Result<Self, RepurposeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-rp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RepurposeError::ChemblHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://www.ebi.ac.uk/chembl/api/data".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, RepurposeError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(RepurposeError::ChemblHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RepurposeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ChEMBL request failed".to_string());
        Err(RepurposeError::ChemblStatus { status, message })
    }
}

impl ChemblClient for ChemblHttpClient {
    fn search_molecule(&self, name: &str) -> Result<Option<MoleculeRecord>, RepurposeError> {
        let url = format!("{}/molecule/search.json", self.base_url);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("q", name)]))?;
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| RepurposeError::ChemblHttp(err.to_string()))?;
        Ok(body
            .get("molecules")
            .and_then(|value| value.as_array())
            .and_then(|molecules| molecules.first())
            .and_then(parse_molecule))
    }

    fn similar_molecules(&self, smiles: &str) -> Result<Vec<MoleculeRecord>, RepurposeError> {
        // SMILES strings carry '#', '/' and friends, so the path segment
        // must be encoded.
        let url = format!(
            "{}/similarity/{}/{}?format=json&limit={}",
            self.base_url,
            urlencoding::encode(smiles),
            SIMILARITY_THRESHOLD,
            SIMILARITY_LIMIT
        );
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        let body: Value = response
            .json()
            .map_err(|err| RepurposeError::ChemblHttp(err.to_string()))?;
        Ok(parse_molecule_list(&body))
    }
}

pub fn parse_molecule_list(body: &Value) -> Vec<MoleculeRecord> {
    body.get("molecules")
        .and_then(|value| value.as_array())
        .map(|molecules| molecules.iter().filter_map(parse_molecule).collect())
        .unwrap_or_default()
}

pub fn parse_molecule(doc: &Value) -> Option<MoleculeRecord> {
    let chembl_id = doc
        .get("molecule_chembl_id")
        .and_then(|value| value.as_str())?
        .to_string();

    let mut atc_names: Vec<String> = doc
        .get("atc_classifications")
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    atc_names.sort();
    atc_names.dedup();

    let structures = doc.get("molecule_structures");
    Some(MoleculeRecord {
        chembl_id,
        score: doc.get("score").and_then(as_loose_f64),
        similarity: doc.get("similarity").and_then(as_loose_f64),
        atc_names,
        pref_name: doc
            .get("pref_name")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        max_phase: doc.get("max_phase").and_then(as_loose_f64),
        therapeutic: doc
            .get("therapeutic_flag")
            .and_then(|value| value.as_bool())
            .unwrap_or(false),
        smiles: structures
            .and_then(|value| value.get("canonical_smiles"))
            .and_then(|value| value.as_str())
            .map(str::to_string),
        inchi_key: structures
            .and_then(|value| value.get("standard_inchi_key"))
            .and_then(|value| value.as_str())
            .map(str::to_string),
    })
}

/// ChEMBL serialises numeric fields inconsistently across endpoints:
/// `max_phase` and `similarity` show up both as numbers and as decimal
/// strings.
fn as_loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_molecule_document() {
        let doc = json!({
            "molecule_chembl_id": "CHEMBL98",
            "score": 16.0,
            "atc_classifications": ["L01XH01", "L01XH01", "D11AX22"],
            "pref_name": "VORINOSTAT",
            "max_phase": "4.0",
            "therapeutic_flag": true,
            "molecule_structures": {
                "canonical_smiles": "ONC(=O)CCCCCCC(=O)Nc1ccccc1",
                "standard_inchi_key": "WAEXFXRVDQXREF-UHFFFAOYSA-N"
            }
        });
        let record = parse_molecule(&doc).unwrap();
        assert_eq!(record.chembl_id, "CHEMBL98");
        assert_eq!(record.atc_names, ["D11AX22", "L01XH01"]);
        assert_eq!(record.max_phase, Some(4.0));
        assert!(record.therapeutic);
        assert!(record.smiles.as_deref().unwrap().starts_with("ONC"));
    }

    #[test]
    fn tolerates_null_structures_and_phase() {
        let doc = json!({
            "molecule_chembl_id": "CHEMBL1",
            "molecule_structures": null,
            "max_phase": null
        });
        let record = parse_molecule(&doc).unwrap();
        assert_eq!(record.smiles, None);
        assert_eq!(record.inchi_key, None);
        assert_eq!(record.max_phase, None);
        assert!(!record.therapeutic);
    }

    #[test]
    fn documents_without_id_are_skipped() {
        let body = json!({"molecules": [
            {"pref_name": "orphan"},
            {"molecule_chembl_id": "CHEMBL2", "similarity": "87.5"}
        ]});
        let records = parse_molecule_list(&body);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].similarity, Some(87.5));
    }
}
