//! Document-source resolver
//!
//! Classifies a fetched seed response as a CSW `GetRecordsResponse` or a WAF
//! directory listing and extracts the candidate documents to validate.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

use crate::error::{Result, ValidationError};
use crate::http_client::{Fetcher, Location};
use crate::libxml2::{LibXml2Wrapper, XmlDocument};
use crate::namespaces::{GMD_NAMESPACE, Namespaces};

pub const ESRI_ID_SCHEME: &str = "urn:x-esri:specification:ServiceType:ArcIMS:Metadata:DocID";
pub const IDENTIFIER_NOT_FOUND: &str = "identifier not found";
pub const NO_RECORDS: &str = "No metadata records found in the CSW response";

const CSW_ROOT: &str = "/csw:GetRecordsResponse";
const CSW_RECORDS: &str = "//csw:BriefRecord";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Csw,
    Waf,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Csw => f.write_str("CSW"),
            SourceKind::Waf => f.write_str("WAF"),
        }
    }
}

/// A document to validate, or the reason one could not be located
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Candidate {
    Document { url: String },
    Unresolved { error: String },
}

impl Candidate {
    pub fn document(url: impl Into<String>) -> Self {
        Candidate::Document { url: url.into() }
    }

    pub fn unresolved(error: impl Into<String>) -> Self {
        Candidate::Unresolved {
            error: error.into(),
        }
    }

    /// The document URL; empty for unresolved candidates
    pub fn url(&self) -> &str {
        match self {
            Candidate::Document { url } => url,
            Candidate::Unresolved { .. } => "",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Candidate::Document { .. } => None,
            Candidate::Unresolved { error } => Some(error),
        }
    }
}

/// Classified seed response with its candidates, in discovery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: SourceKind,
    pub candidates: Vec<Candidate>,
}

/// Classify `body` (fetched from `seed`) and list its candidate documents.
///
/// CSW detection reads the response with [`Namespaces::catalog`], so rebinding
/// `csw` or `dc` for rule XPaths does not change how seeds are classified.
pub fn resolve(wrapper: &LibXml2Wrapper, seed: &str, body: &[u8]) -> Resolution {
    let catalog = LibXml2Wrapper::with_namespaces(Namespaces::catalog());
    if let Ok(doc) = catalog.parse_xml(body, seed)
        && doc.count(CSW_ROOT).unwrap_or(0) > 0
    {
        let candidates = csw_candidates(&doc, seed);
        debug!(seed, candidates = candidates.len(), "Resolved CSW response");
        return Resolution {
            kind: SourceKind::Csw,
            candidates,
        };
    }

    let candidates = match wrapper.parse_html(body, seed) {
        Ok(doc) => waf_candidates(&doc, seed),
        Err(e) => vec![Candidate::unresolved(
            ValidationError::Parse {
                location: seed.to_string(),
                details: e.to_string(),
            }
            .to_string(),
        )],
    };
    debug!(seed, candidates = candidates.len(), "Resolved WAF listing");
    Resolution {
        kind: SourceKind::Waf,
        candidates,
    }
}

/// Fetch `seed` and list its candidates. A failed fetch yields no source kind
/// and a single unresolved candidate carrying the error.
pub async fn discover(
    fetcher: &dyn Fetcher,
    wrapper: &LibXml2Wrapper,
    seed: &str,
) -> (Option<SourceKind>, Vec<Candidate>) {
    match fetcher.fetch(seed).await {
        Ok(body) => {
            let resolution = resolve(wrapper, seed, &body);
            (Some(resolution.kind), resolution.candidates)
        }
        Err(e) => {
            warn!(seed, error = %e, "Could not retrieve seed");
            (
                None,
                vec![Candidate::unresolved(format!(
                    "Could not retrieve {}: {}",
                    seed, e
                ))],
            )
        }
    }
}

/// Candidate documents for a seed response
pub fn resolve_candidates(wrapper: &LibXml2Wrapper, seed: &str, body: &[u8]) -> Vec<Candidate> {
    resolve(wrapper, seed, body).candidates
}

fn csw_candidates(doc: &XmlDocument, seed: &str) -> Vec<Candidate> {
    let records = doc.count(CSW_RECORDS).unwrap_or(0);
    if records == 0 {
        return vec![Candidate::unresolved(NO_RECORDS)];
    }

    (1..=records)
        .map(|index| match record_identifier(doc, index) {
            Some(id) => match get_record_by_id_url(seed, &id) {
                Ok(url) => Candidate::document(url),
                Err(e) => Candidate::unresolved(e.to_string()),
            },
            None => Candidate::unresolved(IDENTIFIER_NOT_FOUND),
        })
        .collect()
}

/// Identifier of the `index`th (1-based) brief record: a lone `dc:identifier`,
/// or else a lone identifier in the ESRI document id scheme.
fn record_identifier(doc: &XmlDocument, index: usize) -> Option<String> {
    let lone = |xpath: String| -> Option<String> {
        let values = doc.select(&xpath).ok()?;
        match values.as_slice() {
            [only] if !only.trim().is_empty() => Some(only.trim().to_string()),
            _ => None,
        }
    };

    let record = format!("({})[{}]", CSW_RECORDS, index);
    lone(format!("{}/dc:identifier", record)).or_else(|| {
        lone(format!(
            "{}/dc:identifier[@scheme='{}']",
            record, ESRI_ID_SCHEME
        ))
    })
}

/// `GetRecordById` request for `id` against the catalog endpoint of `seed`,
/// asking for the full ISO 19139 record.
pub fn get_record_by_id_url(seed: &str, id: &str) -> Result<String> {
    let mut url = match Location::parse(seed)? {
        Location::Remote(url) => url,
        Location::Local(_) => {
            return Err(ValidationError::InvalidLocation {
                location: seed.to_string(),
                reason: "a CSW endpoint must be an http(s) URL".to_string(),
            });
        }
    };

    let encoded_id: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
    url.set_fragment(None);
    url.set_query(Some(&format!(
        "request=GetRecordById&service=CSW&Id={}&elementSetName=full&outputSchema={}",
        encoded_id, GMD_NAMESPACE
    )));
    Ok(url.to_string())
}

fn base_url(seed: &str) -> Result<Url> {
    let invalid = |reason: &str| ValidationError::InvalidLocation {
        location: seed.to_string(),
        reason: reason.to_string(),
    };
    match Location::parse(seed)? {
        Location::Remote(url) => Ok(url),
        Location::Local(path) => {
            let absolute = std::path::absolute(&path).map_err(|e| invalid(&e.to_string()))?;
            Url::from_file_path(absolute).map_err(|_| invalid("not an absolute path"))
        }
    }
}

fn waf_candidates(doc: &XmlDocument, seed: &str) -> Vec<Candidate> {
    let base = match base_url(seed) {
        Ok(base) => base,
        Err(e) => return vec![Candidate::unresolved(e.to_string())],
    };

    let hrefs = doc.select("//a/@href").unwrap_or_default();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for href in hrefs {
        let href = href.trim();
        if !href.to_ascii_lowercase().ends_with(".xml") {
            continue;
        }
        match base.join(href) {
            Ok(url) => {
                let url = url.to_string();
                if seen.insert(url.clone()) {
                    candidates.push(Candidate::document(url));
                }
            }
            Err(e) => {
                candidates.push(Candidate::unresolved(format!(
                    "Could not resolve link {}: {}",
                    href, e
                )));
            }
        }
    }
    candidates
}
