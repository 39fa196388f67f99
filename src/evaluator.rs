//! Rule evaluators
//!
//! Each evaluator inspects one parsed document and yields a pass/fail verdict
//! with its findings. Findings read `"<rule name>: <reason>"`; every failing
//! evaluation contributes exactly one.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::error::LibXml2Error;
use crate::http_client::UrlProbe;
use crate::libxml2::XmlDocument;

pub const REASON_NOT_FOUND: &str = "XPath not found";
pub const REASON_AMBIGUOUS: &str = "XPath ambiguous";
pub const REASON_NONE_FOUND: &str = "none of the XPaths were found";
pub const REASON_NOT_EXACTLY_ONE: &str = "zero or multiple XPaths matched";
pub const REASON_NO_MATCH: &str = "value did not match expression";
pub const REASON_UNRESOLVED_URL: &str = "URL could not be resolved";

/// Verdict and findings of one evaluator
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    pub passed: bool,
    pub findings: Vec<String>,
}

impl Evaluation {
    pub fn pass() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
        }
    }

    pub fn fail(name: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            passed: false,
            findings: vec![format!("{}: {}", name, reason)],
        }
    }
}

/// A materialized rule, carrying only what evaluation needs
#[derive(Debug, Clone)]
pub enum Evaluator {
    Exists {
        name: String,
        xpath: String,
    },
    ValueInList {
        name: String,
        xpath: String,
        values: HashSet<String>,
    },
    AnyOf {
        name: String,
        xpaths: Vec<String>,
    },
    OneOf {
        name: String,
        xpaths: Vec<String>,
    },
    ContentMatchesExpression {
        name: String,
        xpath: String,
        pattern: Regex,
    },
    ValidUrl {
        name: String,
        xpath: String,
    },
    Conditional {
        name: String,
        condition: Box<Evaluator>,
        requirement: Box<Evaluator>,
    },
}

/// Outcome of an XPath that must select a single node
enum Single {
    Value(String),
    Missing,
    Ambiguous,
}

fn single_value(doc: &XmlDocument, xpath: &str) -> Result<Single, LibXml2Error> {
    let mut values = doc.select(xpath)?;
    Ok(match values.len() {
        0 => Single::Missing,
        1 => Single::Value(values.remove(0).trim().to_string()),
        _ => Single::Ambiguous,
    })
}

/// Number of XPaths in `xpaths` that select at least one node
fn matching_xpaths(doc: &XmlDocument, xpaths: &[String]) -> Result<usize, LibXml2Error> {
    let mut matched = 0;
    for xpath in xpaths {
        if doc.count(xpath)? > 0 {
            matched += 1;
        }
    }
    Ok(matched)
}

fn is_web_url(candidate: &str) -> bool {
    Url::parse(candidate).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Evaluation> + Send + 'a>>;
type OutcomeFuture<'a> = Pin<Box<dyn Future<Output = Result<Evaluation, LibXml2Error>> + Send + 'a>>;

impl Evaluator {
    pub fn name(&self) -> &str {
        match self {
            Evaluator::Exists { name, .. }
            | Evaluator::ValueInList { name, .. }
            | Evaluator::AnyOf { name, .. }
            | Evaluator::OneOf { name, .. }
            | Evaluator::ContentMatchesExpression { name, .. }
            | Evaluator::ValidUrl { name, .. }
            | Evaluator::Conditional { name, .. } => name,
        }
    }

    /// Evaluate against `doc`. Only ValidUrl touches the network, through `probe`.
    pub fn evaluate<'a>(&'a self, doc: &'a XmlDocument, probe: &'a dyn UrlProbe) -> EvalFuture<'a> {
        Box::pin(async move {
            // An XPath libxml2 rejects fails the rule with the error as its finding.
            self.outcome(doc, probe)
                .await
                .unwrap_or_else(|e| Evaluation::fail(self.name(), e))
        })
    }

    fn outcome<'a>(&'a self, doc: &'a XmlDocument, probe: &'a dyn UrlProbe) -> OutcomeFuture<'a> {
        Box::pin(async move {
            match self {
                Evaluator::Conditional {
                    name,
                    condition,
                    requirement,
                } => {
                    let met = match condition.outcome(doc, probe).await {
                        Ok(evaluation) => evaluation.passed,
                        Err(e) => {
                            warn!(rule = %name, error = %e, "Condition could not be evaluated");
                            return Ok(Evaluation::fail(condition.name(), e));
                        }
                    };
                    if !met {
                        return Ok(Evaluation::pass());
                    }
                    Ok(requirement.evaluate(doc, probe).await)
                }
                Evaluator::ValidUrl { name, xpath } => {
                    let url = match single_value(doc, xpath)? {
                        Single::Value(url) => url,
                        Single::Missing => return Ok(Evaluation::fail(name, REASON_NOT_FOUND)),
                        Single::Ambiguous => return Ok(Evaluation::fail(name, REASON_AMBIGUOUS)),
                    };
                    Ok(if is_web_url(&url) && probe.resolves(&url).await {
                        Evaluation::pass()
                    } else {
                        Evaluation::fail(name, REASON_UNRESOLVED_URL)
                    })
                }
                Evaluator::Exists { name, xpath } => exists(doc, name, xpath),
                Evaluator::ValueInList {
                    name,
                    xpath,
                    values,
                } => value_in_list(doc, name, xpath, values),
                Evaluator::AnyOf { name, xpaths } => matching_xpaths(doc, xpaths).map(|n| {
                    if n >= 1 {
                        Evaluation::pass()
                    } else {
                        Evaluation::fail(name, REASON_NONE_FOUND)
                    }
                }),
                Evaluator::OneOf { name, xpaths } => matching_xpaths(doc, xpaths).map(|n| {
                    if n == 1 {
                        Evaluation::pass()
                    } else {
                        Evaluation::fail(name, REASON_NOT_EXACTLY_ONE)
                    }
                }),
                Evaluator::ContentMatchesExpression {
                    name,
                    xpath,
                    pattern,
                } => content_matches(doc, name, xpath, pattern),
            }
        })
    }
}

fn exists(doc: &XmlDocument, name: &str, xpath: &str) -> Result<Evaluation, LibXml2Error> {
    Ok(if doc.count(xpath)? > 0 {
        Evaluation::pass()
    } else {
        Evaluation::fail(name, REASON_NOT_FOUND)
    })
}

fn value_in_list(
    doc: &XmlDocument,
    name: &str,
    xpath: &str,
    values: &HashSet<String>,
) -> Result<Evaluation, LibXml2Error> {
    Ok(match single_value(doc, xpath)? {
        Single::Value(v) if values.contains(&v) => Evaluation::pass(),
        Single::Value(v) => Evaluation::fail(name, format!("value not in allowed set: {}", v)),
        Single::Missing => Evaluation::fail(name, REASON_NOT_FOUND),
        Single::Ambiguous => Evaluation::fail(name, REASON_AMBIGUOUS),
    })
}

fn content_matches(
    doc: &XmlDocument,
    name: &str,
    xpath: &str,
    pattern: &Regex,
) -> Result<Evaluation, LibXml2Error> {
    Ok(match single_value(doc, xpath)? {
        Single::Value(v) if pattern.is_match(&v) => Evaluation::pass(),
        Single::Value(_) => Evaluation::fail(name, REASON_NO_MATCH),
        Single::Missing => Evaluation::fail(name, REASON_NOT_FOUND),
        Single::Ambiguous => Evaluation::fail(name, REASON_AMBIGUOUS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::MockUrlProbe;
    use crate::libxml2::LibXml2Wrapper;

    const RECORD: &str = r#"<?xml version="1.0"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"
                 xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:title><gco:CharacterString>Geologic map</gco:CharacterString></gmd:title>
  <gmd:topic><gco:CharacterString> geology </gco:CharacterString></gmd:topic>
  <gmd:keyword>one</gmd:keyword>
  <gmd:keyword>two</gmd:keyword>
  <gmd:date>2012-05-01</gmd:date>
  <gmd:URL>http://example.com/data.zip</gmd:URL>
</gmd:MD_Metadata>"#;

    fn doc() -> XmlDocument {
        LibXml2Wrapper::new()
            .parse_xml(RECORD.as_bytes(), "record.xml")
            .unwrap()
    }

    fn no_network() -> MockUrlProbe {
        let mut probe = MockUrlProbe::new();
        probe.expect_resolves().never();
        probe
    }

    fn exists(name: &str, xpath: &str) -> Evaluator {
        Evaluator::Exists {
            name: name.to_string(),
            xpath: xpath.to_string(),
        }
    }

    fn xpaths(list: &[&str]) -> Vec<String> {
        list.iter().map(|x| x.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exists() {
        let doc = doc();
        let probe = no_network();

        let found = exists("Title", "//gmd:title").evaluate(&doc, &probe).await;
        assert_eq!(found, Evaluation::pass());

        let missing = exists("Abstract", "//gmd:abstract")
            .evaluate(&doc, &probe)
            .await;
        assert!(!missing.passed);
        assert_eq!(missing.findings, vec!["Abstract: XPath not found"]);
    }

    #[tokio::test]
    async fn test_value_in_list_trims_and_matches_exactly() {
        let doc = doc();
        let probe = no_network();
        let rule = |values: &[&str]| Evaluator::ValueInList {
            name: "Topic".to_string(),
            xpath: "//gmd:topic/gco:CharacterString".to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        };

        let ok = rule(&["geology", "hydrology"]).evaluate(&doc, &probe).await;
        assert!(ok.passed);

        let wrong_case = rule(&["Geology"]).evaluate(&doc, &probe).await;
        assert_eq!(
            wrong_case.findings,
            vec!["Topic: value not in allowed set: geology"]
        );
    }

    #[tokio::test]
    async fn test_value_in_list_ambiguous() {
        let doc = doc();
        let probe = no_network();
        let rule = Evaluator::ValueInList {
            name: "Keyword".to_string(),
            xpath: "//gmd:keyword".to_string(),
            values: ["one".to_string()].into_iter().collect(),
        };
        let result = rule.evaluate(&doc, &probe).await;
        assert_eq!(result.findings, vec!["Keyword: XPath ambiguous"]);
    }

    #[tokio::test]
    async fn test_any_of_and_one_of_with_three_xpaths() {
        let doc = doc();
        let probe = no_network();

        let one_present = xpaths(&["//gmd:title", "//gmd:abstract", "//gmd:purpose"]);
        let two_present = xpaths(&["//gmd:title", "//gmd:date", "//gmd:purpose"]);
        let none_present = xpaths(&["//gmd:abstract", "//gmd:purpose", "//gmd:status"]);

        let any = |x: Vec<String>| Evaluator::AnyOf {
            name: "Any".to_string(),
            xpaths: x,
        };
        let one = |x: Vec<String>| Evaluator::OneOf {
            name: "One".to_string(),
            xpaths: x,
        };

        assert!(any(one_present.clone()).evaluate(&doc, &probe).await.passed);
        assert!(any(two_present.clone()).evaluate(&doc, &probe).await.passed);
        assert_eq!(
            any(none_present.clone()).evaluate(&doc, &probe).await.findings,
            vec!["Any: none of the XPaths were found"]
        );

        assert!(one(one_present).evaluate(&doc, &probe).await.passed);
        assert_eq!(
            one(two_present).evaluate(&doc, &probe).await.findings,
            vec!["One: zero or multiple XPaths matched"]
        );
        assert!(!one(none_present).evaluate(&doc, &probe).await.passed);
    }

    #[tokio::test]
    async fn test_content_matches_expression() {
        let doc = doc();
        let probe = no_network();
        let rule = |pattern: &str| Evaluator::ContentMatchesExpression {
            name: "Date".to_string(),
            xpath: "//gmd:date".to_string(),
            pattern: Regex::new(pattern).unwrap(),
        };

        assert!(rule(r"^\d{4}-\d{2}-\d{2}$").evaluate(&doc, &probe).await.passed);
        assert!(rule(r"05").evaluate(&doc, &probe).await.passed);
        assert_eq!(
            rule(r"^\d{2}/\d{2}/\d{4}$")
                .evaluate(&doc, &probe)
                .await
                .findings,
            vec!["Date: value did not match expression"]
        );
    }

    #[tokio::test]
    async fn test_conditional_short_circuits() {
        let doc = doc();
        let mut probe = MockUrlProbe::new();
        probe.expect_resolves().never();

        let requirement = Evaluator::ValidUrl {
            name: "Link".to_string(),
            xpath: "//gmd:URL".to_string(),
        };
        let rule = Evaluator::Conditional {
            name: "If abstract then link".to_string(),
            condition: Box::new(exists("Abstract", "//gmd:abstract")),
            requirement: Box::new(requirement),
        };

        let result = rule.evaluate(&doc, &probe).await;
        assert_eq!(result, Evaluation::pass());
    }

    #[tokio::test]
    async fn test_conditional_returns_requirement_findings() {
        let doc = doc();
        let probe = no_network();
        let rule = Evaluator::Conditional {
            name: "If title then abstract".to_string(),
            condition: Box::new(exists("Title", "//gmd:title")),
            requirement: Box::new(exists("Abstract", "//gmd:abstract")),
        };

        let result = rule.evaluate(&doc, &probe).await;
        assert!(!result.passed);
        assert_eq!(result.findings, vec!["Abstract: XPath not found"]);
    }

    #[tokio::test]
    async fn test_valid_url_probes_once() {
        let doc = doc();
        let mut probe = MockUrlProbe::new();
        probe
            .expect_resolves()
            .withf(|url| url == "http://example.com/data.zip")
            .times(1)
            .returning(|_| true);

        let rule = Evaluator::ValidUrl {
            name: "Link".to_string(),
            xpath: "//gmd:URL".to_string(),
        };
        assert!(rule.evaluate(&doc, &probe).await.passed);
    }

    #[tokio::test]
    async fn test_valid_url_unresolved() {
        let doc = doc();
        let mut probe = MockUrlProbe::new();
        probe.expect_resolves().returning(|_| false);

        let rule = Evaluator::ValidUrl {
            name: "Link".to_string(),
            xpath: "//gmd:URL".to_string(),
        };
        assert_eq!(
            rule.evaluate(&doc, &probe).await.findings,
            vec!["Link: URL could not be resolved"]
        );
    }

    #[tokio::test]
    async fn test_valid_url_rejects_non_web_text_without_probing() {
        let doc = doc();
        let probe = no_network();
        let rule = Evaluator::ValidUrl {
            name: "Title link".to_string(),
            xpath: "//gmd:title/gco:CharacterString".to_string(),
        };
        assert!(!rule.evaluate(&doc, &probe).await.passed);
    }

    #[tokio::test]
    async fn test_invalid_xpath_is_a_finding() {
        let doc = doc();
        let probe = no_network();
        let result = exists("Broken", "//gmd:title[").evaluate(&doc, &probe).await;
        assert_eq!(result.findings, vec!["Broken: invalid XPath //gmd:title["]);
    }

    #[tokio::test]
    async fn test_conditional_with_invalid_condition_fails() {
        let doc = doc();
        let probe = no_network();
        let rule = Evaluator::Conditional {
            name: "If title then link".to_string(),
            condition: Box::new(exists("Title", "//gmd:title[")),
            requirement: Box::new(exists("Link", "//gmd:URL")),
        };

        let result = rule.evaluate(&doc, &probe).await;
        assert!(!result.passed);
        assert_eq!(result.findings, vec!["Title: invalid XPath //gmd:title["]);
    }
}
