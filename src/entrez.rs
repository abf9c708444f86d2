use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{GeneSignature, MappedSignature};
use crate::error::RepurposeError;

const PANEL_URL: &str =
    "https://ftp.ncbi.nlm.nih.gov/geo/series/GSE92nnn/GSE92742/suppl/GSE92742_Broad_LINCS_gene_info.txt.gz";

/// Symbol-to-Entrez mapping restricted to the L1000 BING panel.
#[derive(Debug, Clone, Default)]
pub struct EntrezMap {
    entries: HashMap<String, String>,
}

impl EntrezMap {
    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.entries.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.values().any(|value| value == id)
    }
}

pub trait GenePanelClient: Send + Sync {
    fn download_panel(&self, destination: &Path) -> Result<(), RepurposeError>;
}

#[derive(Clone)]
pub struct GenePanelHttpClient {
    client: Client,
}

impl GenePanelHttpClient {
    pub fn new() -> Result<Self, RepurposeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-rp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| RepurposeError::PanelHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl GenePanelClient for GenePanelHttpClient {
    fn download_panel(&self, destination: &Path) -> Result<(), RepurposeError> {
        let response = self
            .client
            .get(PANEL_URL)
            .send()
            .map_err(|err| RepurposeError::PanelHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "gene panel request failed".to_string());
            return Err(RepurposeError::PanelStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| RepurposeError::PanelHttp(err.to_string()))?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        file.write_all(&bytes)
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Downloads the panel unless a cached copy already sits in the workspace,
/// then parses it into the reference map.
pub fn fetch_entrez_map<P: GenePanelClient>(
    client: &P,
    cache_path: &Path,
) -> Result<EntrezMap, RepurposeError> {
    if !cache_path.exists() {
        info!("downloading L1000 gene panel");
        client.download_panel(cache_path)?;
    }
    let file =
        File::open(cache_path).map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
    parse_panel(BufReader::new(GzDecoder::new(file)))
}

/// Parses the LINCS gene_info table: tab separated, first two columns are
/// Entrez id and symbol, and only rows flagged `pr_is_bing == 1` enter the
/// map.
pub fn parse_panel(reader: impl BufRead) -> Result<EntrezMap, RepurposeError> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .transpose()
        .map_err(|err| RepurposeError::PanelParse(err.to_string()))?
        .ok_or_else(|| RepurposeError::PanelParse("empty panel file".to_string()))?;
    let columns: Vec<&str> = header.split('\t').collect();
    let bing_col = columns
        .iter()
        .position(|column| *column == "pr_is_bing")
        .ok_or_else(|| RepurposeError::PanelParse("missing pr_is_bing column".to_string()))?;

    let mut entries = HashMap::new();
    for line in lines {
        let line = line.map_err(|err| RepurposeError::PanelParse(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.get(bing_col).map(|value| value.trim()) != Some("1") {
            continue;
        }
        let (Some(id), Some(symbol)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        entries.insert(symbol.trim().to_string(), id.trim().to_string());
    }
    if entries.is_empty() {
        return Err(RepurposeError::PanelParse(
            "no BING-flagged genes in panel".to_string(),
        ));
    }
    Ok(EntrezMap { entries })
}

/// Fallback lookup for symbols missing from the reference panel: previous
/// names first, then aliases, as reported by genenames.org.
pub trait GeneAliasClient: Send + Sync {
    fn alternate_symbols(&self, symbol: &str) -> Result<Vec<String>, RepurposeError>;
}

#[derive(Clone)]
pub struct GeneAliasHttpClient {
    client: Client,
}

impl GeneAliasHttpClient {
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
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| RepurposeError::AliasHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl GeneAliasClient for GeneAliasHttpClient {
    fn alternate_symbols(&self, symbol: &str) -> Result<Vec<String>, RepurposeError> {
        let url = format!("https://rest.genenames.org/fetch/symbol/{symbol}");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| RepurposeError::AliasHttp(err.to_string()))?;
        // A miss on the alias service is not an error: the symbol is simply
        // unresolvable and gets dropped by the caller.
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        let body: Value = response
            .json()
            .map_err(|err| RepurposeError::AliasHttp(err.to_string()))?;
        Ok(extract_alternates(&body))
    }
}

pub fn extract_alternates(body: &Value) -> Vec<String> {
    let Some(response) = body.get("response") else {
        return Vec::new();
    };
    let found = response
        .get("numFound")
        .and_then(|value| value.as_u64())
        .unwrap_or(0);
    if found == 0 {
        return Vec::new();
    }
    let Some(doc) = response
        .get("docs")
        .and_then(|value| value.as_array())
        .and_then(|docs| docs.first())
    else {
        return Vec::new();
    };
    let mut alternates = Vec::new();
    for key in ["prev_symbol", "alias_symbol"] {
        if let Some(values) = doc.get(key).and_then(|value| value.as_array()) {
            for value in values {
                if let Some(symbol) = value.as_str() {
                    alternates.push(symbol.to_string());
                }
            }
        }
    }
    alternates
}

/// Symbols that could not be resolved, kept so callers can assert on loss
/// rate instead of scraping console output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    pub dropped_up: Vec<String>,
    pub dropped_down: Vec<String>,
}

impl ResolutionReport {
    pub fn dropped_total(&self) -> usize {
        self.dropped_up.len() + self.dropped_down.len()
    }
}

/// Maps the signature's symbols to Entrez ids. Direct panel hits win;
/// misses go through the alias service and take the first alternate that
/// resolves. Genes with no resolution are dropped fail-open and recorded in
/// the report.
pub fn resolve_signature<A: GeneAliasClient>(
    signature: &GeneSignature,
    map: &EntrezMap,
    aliases: &A,
) -> Result<(MappedSignature, ResolutionReport), RepurposeError> {
    let mut report = ResolutionReport::default();
    let up = resolve_list(&signature.up, map, aliases, &mut report.dropped_up)?;
    let down = resolve_list(&signature.down, map, aliases, &mut report.dropped_down)?;
    info!(
        up = up.len(),
        down = down.len(),
        dropped = report.dropped_total(),
        "entrez resolution finished"
    );
    Ok((MappedSignature { up, down }, report))
}

fn resolve_list<A: GeneAliasClient>(
    symbols: &[String],
    map: &EntrezMap,
    aliases: &A,
    dropped: &mut Vec<String>,
) -> Result<Vec<String>, RepurposeError> {
    let mut resolved = Vec::new();
    for symbol in symbols {
        if let Some(id) = map.get(symbol) {
            resolved.push(id.to_string());
            continue;
        }
        let alternates = aliases.alternate_symbols(symbol)?;
        match alternates.iter().find_map(|alternate| map.get(alternate)) {
            Some(id) => {
                debug!(symbol, "resolved via alias");
                resolved.push(id.to_string());
            }
            None => dropped.push(symbol.clone()),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedAliases(HashMap<String, Vec<String>>);

    impl GeneAliasClient for FixedAliases {
        fn alternate_symbols(&self, symbol: &str) -> Result<Vec<String>, RepurposeError> {
            Ok(self.0.get(symbol).cloned().unwrap_or_default())
        }
    }

    fn panel() -> EntrezMap {
        let text = "pr_gene_id\tpr_gene_symbol\tpr_is_bing\n7157\tTP53\t1\n672\tBRCA1\t1\n999\tSKIPPED\t0\n100\tMT-CO1\t1\n";
        parse_panel(text.as_bytes()).unwrap()
    }

    #[test]
    fn panel_keeps_only_bing_rows() {
        let map = panel();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("TP53"), Some("7157"));
        assert_eq!(map.get("SKIPPED"), None);
    }

    #[test]
    fn alternates_prefer_prev_symbols() {
        let body = json!({
            "response": {
                "numFound": 1,
                "docs": [{"prev_symbol": ["OLD1"], "alias_symbol": ["ALT1", "ALT2"]}]
            }
        });
        assert_eq!(extract_alternates(&body), ["OLD1", "ALT1", "ALT2"]);
        assert!(extract_alternates(&json!({"response": {"numFound": 0, "docs": []}})).is_empty());
    }

    #[test]
    fn resolution_is_partial_and_reported() {
        let map = panel();
        let aliases = FixedAliases(HashMap::from([(
            "COX1".to_string(),
            vec!["NOPE".to_string(), "MT-CO1".to_string()],
        )]));
        let signature = GeneSignature {
            up: vec!["TP53".to_string(), "COX1".to_string(), "GHOST".to_string()],
            down: vec!["BRCA1".to_string()],
        };
        let (mapped, report) = resolve_signature(&signature, &map, &aliases).unwrap();
        assert_eq!(mapped.up, ["7157", "100"]);
        assert_eq!(mapped.down, ["672"]);
        assert_eq!(report.dropped_up, ["GHOST"]);
        assert!(report.dropped_down.is_empty());
        assert!(mapped.up.len() <= signature.up.len());
        assert!(mapped.up.iter().all(|id| map.contains_id(id)));
    }
}
