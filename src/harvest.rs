//! Harvest-and-validate pipeline
//!
//! For one validation set: compile its rule set, fetch the seed once, resolve
//! the candidate documents and validate them with bounded parallelism. Every
//! processed candidate upserts its job and gets a fresh report with at least
//! one item.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Result, ValidationError};
use crate::http_client::{Fetcher, UrlProbe};
use crate::libxml2::LibXml2Wrapper;
use crate::resolver::{self, Candidate, SourceKind};
use crate::rules::{RuleCatalog, ValidationSet};
use crate::store::{JobId, JobKey, ReportId, ReportStore};
use crate::validator::RuleSetValidator;

/// Sole report item of a candidate without findings
pub const PASSED_WITHOUT_ERRORS: &str = "Passed Validation Without Errors";

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Candidates validated at once
    pub concurrency: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
        }
    }
}

/// Persisted outcome of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    /// Document URL; empty for unresolved candidates
    pub url: String,
    pub result: bool,
    pub report: Vec<String>,
    pub job: JobId,
    pub report_id: ReportId,
}

/// Outcome of one validation set run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSummary {
    pub validation_set: String,
    pub ruleset: String,
    pub seed: String,
    pub run_id: Uuid,
    /// None when the seed could not be fetched or the set never ran
    pub source: Option<SourceKind>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub candidates: Vec<CandidateResult>,
    /// Candidates not started because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
    /// Set when the rule set could not be compiled
    pub error: Option<String>,
}

impl HarvestSummary {
    pub fn passed(&self) -> usize {
        self.candidates.iter().filter(|c| c.result).count()
    }

    pub fn failed(&self) -> usize {
        self.candidates.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.error.is_none() && self.skipped == 0 && self.failed() == 0
    }
}

/// Drives the resolver and the orchestrator across validation sets
pub struct Harvester {
    catalog: Arc<RuleCatalog>,
    fetcher: Arc<dyn Fetcher>,
    probe: Arc<dyn UrlProbe>,
    store: Arc<dyn ReportStore>,
    libxml2_wrapper: LibXml2Wrapper,
    config: HarvestConfig,
}

impl Harvester {
    pub fn new(
        catalog: Arc<RuleCatalog>,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn UrlProbe>,
        store: Arc<dyn ReportStore>,
        libxml2_wrapper: LibXml2Wrapper,
        config: HarvestConfig,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            probe,
            store,
            libxml2_wrapper,
            config,
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Fetch `seed` and list its candidates.
    pub async fn discover(&self, seed: &str) -> (Option<SourceKind>, Vec<Candidate>) {
        resolver::discover(self.fetcher.as_ref(), &self.libxml2_wrapper, seed).await
    }

    /// Run every validation set in the catalog.
    pub async fn run_all(&self, cancel: &CancellationToken) -> Result<Vec<HarvestSummary>> {
        self.run(&[], cancel).await
    }

    /// Run the validation sets named in `set_ids` (all of them, in catalog
    /// order, when empty) one at a time under a single run id. A set whose
    /// rule set does not compile is reported and skipped.
    ///
    /// # Errors
    ///
    /// `ValidationError::Config` for an unknown validation set id, before
    /// anything runs.
    pub async fn run(
        &self,
        set_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<HarvestSummary>> {
        let sets: Vec<&ValidationSet> = if set_ids.is_empty() {
            self.catalog.validation_sets().iter().collect()
        } else {
            set_ids
                .iter()
                .map(|id| {
                    self.catalog.validation_set(id).ok_or_else(|| {
                        ValidationError::Config(format!("Unknown validation set: {}", id))
                    })
                })
                .collect::<Result<_>>()?
        };

        let run_id = Uuid::new_v4();
        let mut summaries = Vec::new();

        for set in sets {
            if cancel.is_cancelled() {
                info!(validation_set = %set.id, "Run cancelled; remaining sets not started");
                break;
            }
            match self.run_set(set, run_id, cancel).await {
                Ok(summary) => summaries.push(summary),
                Err(ValidationError::Configuration(e)) => {
                    error!(validation_set = %set.id, error = %e, "Rule set does not compile");
                    summaries.push(HarvestSummary {
                        validation_set: set.id.clone(),
                        ruleset: set.ruleset.clone(),
                        seed: set.url.clone(),
                        run_id,
                        source: None,
                        started_at: Utc::now(),
                        duration: Duration::ZERO,
                        candidates: Vec::new(),
                        skipped: 0,
                        cancelled: false,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    /// Harvest and validate one validation set.
    ///
    /// # Errors
    ///
    /// `ValidationError::Configuration` when the rule set does not compile
    /// (nothing is fetched), and store failures. Document failures never
    /// surface here; they become failing reports.
    pub async fn run_set(
        &self,
        set: &ValidationSet,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<HarvestSummary> {
        let started_at = Utc::now();
        let start = Instant::now();

        let validator = Arc::new(RuleSetValidator::compile(
            &self.catalog,
            &set.ruleset,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.probe),
            self.libxml2_wrapper.clone(),
        )?);

        info!(
            validation_set = %set.id,
            seed = %set.url,
            ruleset = %set.ruleset,
            %run_id,
            "Starting harvest"
        );

        let (source, candidates) = self.discover(&set.url).await;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|candidate| {
                let validator = Arc::clone(&validator);
                let store = Arc::clone(&self.store);
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let set_id = set.id.clone();
                let ruleset = set.ruleset.clone();

                tokio::spawn(async move {
                    process_candidate(
                        candidate,
                        validator,
                        store,
                        semaphore,
                        cancel,
                        JobContext {
                            set_id,
                            ruleset,
                            run_id,
                        },
                    )
                    .await
                })
            })
            .collect();

        let joined = try_join_all(tasks)
            .await
            .map_err(|e| ValidationError::Concurrency {
                details: format!("candidate task failed: {}", e),
            })?;

        let mut results = Vec::with_capacity(joined.len());
        let mut skipped = 0;
        for outcome in joined {
            match outcome? {
                Some(result) => results.push(result),
                None => skipped += 1,
            }
        }

        self.store.flush().await?;

        let summary = HarvestSummary {
            validation_set: set.id.clone(),
            ruleset: set.ruleset.clone(),
            seed: set.url.clone(),
            run_id,
            source,
            started_at,
            duration: start.elapsed(),
            candidates: results,
            skipped,
            cancelled: cancel.is_cancelled(),
            error: None,
        };

        info!(
            validation_set = %summary.validation_set,
            candidates = summary.candidates.len(),
            passed = summary.passed(),
            failed = summary.failed(),
            skipped = summary.skipped,
            "Harvest finished"
        );
        Ok(summary)
    }
}

struct JobContext {
    set_id: String,
    ruleset: String,
    run_id: Uuid,
}

/// Validate one candidate once a permit is free. Returns `None` when the run
/// was cancelled before the candidate started.
async fn process_candidate(
    candidate: Candidate,
    validator: Arc<RuleSetValidator>,
    store: Arc<dyn ReportStore>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    context: JobContext,
) -> Result<Option<CandidateResult>> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        permit = semaphore.acquire_owned() => permit.map_err(|_| ValidationError::Concurrency {
            details: "candidate semaphore closed".to_string(),
        })?,
    };
    if cancel.is_cancelled() {
        return Ok(None);
    }

    let (result, report) = match &candidate {
        Candidate::Unresolved { error } => (false, vec![error.clone()]),
        Candidate::Document { url } => {
            let outcome = validator.validate(url).await;
            (outcome.result, outcome.report)
        }
    };

    let key = JobKey::new(context.set_id, candidate.url());
    let recorded = record(
        store.as_ref(),
        &key,
        &context.ruleset,
        context.run_id,
        result,
        report,
    )
    .await?;
    Ok(Some(recorded))
}

/// Upsert the job and write this run's report. The report is only created
/// once all of its items are known.
async fn record(
    store: &dyn ReportStore,
    key: &JobKey,
    ruleset: &str,
    run_id: Uuid,
    result: bool,
    mut report: Vec<String>,
) -> Result<CandidateResult> {
    if report.is_empty() {
        report.push(PASSED_WITHOUT_ERRORS.to_string());
    }

    let job = store.upsert_job(key, ruleset, result).await?;
    let report_id = store.create_report(job, run_id, Utc::now()).await?;
    for item in &report {
        store.append_report_item(report_id, item).await?;
    }

    debug!(url = %key.url, job, report = report_id, result, "Recorded candidate");
    Ok(CandidateResult {
        url: key.url.clone(),
        result,
        report,
        job,
        report_id,
    })
}
