//! Namespace prefixes available to rule XPaths and to the catalog resolver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CSW_NAMESPACE: &str = "http://www.opengis.net/cat/csw/2.0.2";
pub const GMD_NAMESPACE: &str = "http://www.isotc211.org/2005/gmd";
pub const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// Prefixes registered on every XPath context unless overridden.
const BUILT_IN: &[(&str, &str)] = &[
    ("csw", CSW_NAMESPACE),
    ("dc", DC_NAMESPACE),
    ("dct", "http://purl.org/dc/terms/"),
    ("gco", "http://www.isotc211.org/2005/gco"),
    ("gmd", GMD_NAMESPACE),
    ("gmi", "http://www.isotc211.org/2005/gmi"),
    ("gml", "http://www.opengis.net/gml"),
    ("gmx", "http://www.isotc211.org/2005/gmx"),
    ("gsr", "http://www.isotc211.org/2005/gsr"),
    ("gss", "http://www.isotc211.org/2005/gss"),
    ("gts", "http://www.isotc211.org/2005/gts"),
    ("ogc", "http://www.opengis.net/ogc"),
    ("ows", "http://www.opengis.net/ows"),
    ("srv", "http://www.isotc211.org/2005/srv"),
    ("xlink", "http://www.w3.org/1999/xlink"),
    ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
];

/// Prefix to namespace URI table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespaces(BTreeMap<String, String>);

impl Namespaces {
    /// An empty table, without the built-in prefixes
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// The fixed CSW and Dublin Core bindings used to read catalog responses,
    /// independent of any configured overrides
    pub fn catalog() -> Self {
        let mut table = Self::empty();
        table.insert("csw", CSW_NAMESPACE);
        table.insert("dc", DC_NAMESPACE);
        table
    }

    /// Add or replace a prefix binding
    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.0.insert(prefix.into(), uri.into());
    }

    /// Layer `extra` over this table; extra bindings win on conflicts.
    pub fn extended_with(mut self, extra: &BTreeMap<String, String>) -> Self {
        for (prefix, uri) in extra {
            self.0.insert(prefix.clone(), uri.clone());
        }
        self
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.0.get(prefix).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self(
            BUILT_IN
                .iter()
                .map(|(p, u)| (p.to_string(), u.to_string()))
                .collect(),
        )
    }
}
