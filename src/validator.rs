//! RuleSet orchestrator
//!
//! A [`RuleSetValidator`] is compiled once per rule set: every rule is
//! materialized up front, so configuration errors surface before any document
//! is fetched. Validating a location then means:
//! - **Async I/O**: fetching the document through the [`Fetcher`]
//! - **Sync CPU-bound work**: libxml2 parsing and XPath evaluation, run directly
//!   in the calling task
//! - **Async probes**: ValidUrl rules consult the [`UrlProbe`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LibXml2Error, Result, RuleConfigResult, ValidationError};
use crate::evaluator::{Evaluation, Evaluator};
use crate::http_client::{Fetcher, UrlProbe};
use crate::libxml2::{LibXml2Wrapper, XmlDocument};
use crate::rules::RuleCatalog;

/// Prefix of the single report line written when a document cannot be
/// fetched or parsed.
pub const VALIDATION_ERROR_PREFIX: &str = "Validation Error: ";

/// Verdict for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetOutcome {
    pub location: String,
    /// Logical AND of every rule's verdict
    pub result: bool,
    /// Findings of all rules, in rule set order
    pub report: Vec<String>,
    pub duration: Duration,
}

impl RuleSetOutcome {
    /// Outcome for a document that never reached rule evaluation
    pub fn error(location: impl Into<String>, error: &ValidationError, duration: Duration) -> Self {
        Self {
            location: location.into(),
            result: false,
            report: vec![format!("{}{}", VALIDATION_ERROR_PREFIX, error)],
            duration,
        }
    }
}

pub struct RuleSetValidator {
    ruleset_id: String,
    evaluators: Vec<Evaluator>,
    fetcher: Arc<dyn Fetcher>,
    probe: Arc<dyn UrlProbe>,
    libxml2_wrapper: LibXml2Wrapper,
}

impl RuleSetValidator {
    /// Materialize every rule of `ruleset_id`.
    pub fn compile(
        catalog: &RuleCatalog,
        ruleset_id: &str,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn UrlProbe>,
        libxml2_wrapper: LibXml2Wrapper,
    ) -> RuleConfigResult<Self> {
        let evaluators = catalog.materialize_ruleset(ruleset_id)?;
        debug!(
            ruleset = ruleset_id,
            rules = evaluators.len(),
            "Compiled rule set"
        );
        Ok(Self::from_evaluators(
            ruleset_id,
            evaluators,
            fetcher,
            probe,
            libxml2_wrapper,
        ))
    }

    pub fn from_evaluators(
        ruleset_id: impl Into<String>,
        evaluators: Vec<Evaluator>,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn UrlProbe>,
        libxml2_wrapper: LibXml2Wrapper,
    ) -> Self {
        Self {
            ruleset_id: ruleset_id.into(),
            evaluators,
            fetcher,
            probe,
            libxml2_wrapper,
        }
    }

    /// Fetch and parse the document at `location`.
    pub async fn load_document(&self, location: &str) -> Result<XmlDocument> {
        let bytes = self.fetcher.fetch(location).await?;
        self.libxml2_wrapper
            .parse_xml(&bytes, location)
            .map_err(|e| match e {
                LibXml2Error::DocumentParseFailed { details } => ValidationError::Parse {
                    location: location.to_string(),
                    details,
                },
                other => other.into(),
            })
    }

    /// Run every rule, in order, against an already parsed document.
    pub async fn validate_document(&self, doc: &XmlDocument) -> Evaluation {
        let mut aggregate = Evaluation::pass();
        for evaluator in &self.evaluators {
            let evaluation = evaluator.evaluate(doc, self.probe.as_ref()).await;
            aggregate.passed &= evaluation.passed;
            aggregate.findings.extend(evaluation.findings);
        }
        aggregate
    }

    /// Validate `location`, propagating fetch and parse failures.
    pub async fn try_validate(&self, location: &str) -> Result<RuleSetOutcome> {
        let start = Instant::now();
        let doc = self.load_document(location).await?;
        let evaluation = self.validate_document(&doc).await;

        debug!(
            location,
            ruleset = %self.ruleset_id,
            passed = evaluation.passed,
            findings = evaluation.findings.len(),
            "Validated document"
        );

        Ok(RuleSetOutcome {
            location: location.to_string(),
            result: evaluation.passed,
            report: evaluation.findings,
            duration: start.elapsed(),
        })
    }

    /// Validate `location`; fetch and parse failures become a failing
    /// outcome with a single `Validation Error:` line.
    pub async fn validate(&self, location: &str) -> RuleSetOutcome {
        let start = Instant::now();
        match self.try_validate(location).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(location, error = %e, "Document could not be validated");
                RuleSetOutcome::error(location, &e, start.elapsed())
            }
        }
    }
}
