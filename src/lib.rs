//! # validate-metadata Library
//!
//! Harvests geospatial metadata records from CSW catalogs and web-accessible
//! folders, validates each document against a configurable rule set of XPath
//! checks, and keeps per-document job state with an append-only report history.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod harvest;
pub mod http_client;
pub mod libxml2;
pub mod namespaces;
pub mod output;
pub mod resolver;
pub mod rules;
pub mod store;
pub mod validator;

pub use cache::{CachedUrlProbe, ProbeCacheConfig};
pub use cli::{Cli, Command, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigManager};
pub use error::{LibXml2Error, RuleConfigError, StoreError, ValidationError};
pub use evaluator::{Evaluation, Evaluator};
pub use harvest::{
    CandidateResult, HarvestConfig, HarvestSummary, Harvester, PASSED_WITHOUT_ERRORS,
};
pub use http_client::{Fetcher, HttpClientConfig, HttpFetcher, Location, UrlProbe};
pub use libxml2::{LibXml2Wrapper, XmlDocument};
pub use namespaces::Namespaces;
pub use output::Output;
pub use resolver::{Candidate, Resolution, SourceKind};
pub use rules::{
    CatalogFile, RuleCatalog, RuleKind, RuleRecord, RuleSet, ValidValuesSet, ValidationSet,
};
pub use store::{
    FileStore, JobKey, MemoryStore, ReportStore, StoreSnapshot, ValidationJob, ValidationReport,
    ValidationReportItem,
};
pub use validator::{RuleSetOutcome, RuleSetValidator, VALIDATION_ERROR_PREFIX};
