use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use validate_metadata::cli::{Cli, Command, VerbosityLevel};
use validate_metadata::config::{Config, ConfigManager};
use validate_metadata::http_client::{Fetcher, HttpFetcher, UrlProbe};
use validate_metadata::output::{Output, history_entries};
use validate_metadata::store::{FileStore, ReportStore};
use validate_metadata::{
    CachedUrlProbe, Harvester, LibXml2Wrapper, RuleCatalog, RuleSetValidator, resolver,
};

fn init_tracing(verbosity: VerbosityLevel) {
    let default_level = match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "validate_metadata=debug,info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn verbosity(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight documents");
            token.cancel();
        }
    });
}

async fn load_catalog(config: &Config) -> Result<Arc<RuleCatalog>> {
    let Some(path) = &config.rules.catalog else {
        bail!(
            "No rule catalog configured; pass --catalog, set VALIDATE_METADATA_CATALOG or add [rules] catalog to the configuration file"
        );
    };
    let catalog = RuleCatalog::load(path)
        .await
        .with_context(|| format!("Failed to load rule catalog {}", path.display()))?;
    Ok(Arc::new(catalog))
}

struct Services {
    wrapper: LibXml2Wrapper,
    fetcher: Arc<HttpFetcher>,
    probe: Arc<dyn UrlProbe>,
}

fn services(config: &Config) -> Result<Services> {
    let wrapper = LibXml2Wrapper::with_namespaces(ConfigManager::namespaces(config));
    let fetcher = Arc::new(
        HttpFetcher::new(ConfigManager::http_client_config(config))
            .context("Failed to build HTTP client")?,
    );
    let probe: Arc<dyn UrlProbe> = Arc::new(CachedUrlProbe::new(
        fetcher.clone(),
        ConfigManager::probe_cache_config(config),
    ));
    Ok(Services {
        wrapper,
        fetcher,
        probe,
    })
}

async fn run(cli: &Cli, config: &Config, output: &Output) -> Result<bool> {
    match &cli.command {
        Command::CheckRules => {
            let catalog = load_catalog(config).await?;
            let failures = catalog.check_all();
            print!(
                "{}",
                output.format_rule_check(catalog.rules().count(), &failures)
            );
            Ok(failures.is_empty())
        }

        Command::Discover { seed } => {
            let services = services(config)?;
            let (source, candidates) =
                resolver::discover(services.fetcher.as_ref(), &services.wrapper, seed).await;
            print!("{}", output.format_discovery(seed, source, &candidates));
            Ok(source.is_some())
        }

        Command::Validate { ruleset, locations } => {
            let catalog = load_catalog(config).await?;
            let services = services(config)?;
            let fetcher: Arc<dyn Fetcher> = services.fetcher;
            let validator = RuleSetValidator::compile(
                &catalog,
                ruleset,
                fetcher,
                services.probe,
                services.wrapper,
            )
            .with_context(|| format!("Rule set {} does not compile", ruleset))?;

            let outcomes: Vec<_> = stream::iter(locations)
                .map(|location| validator.validate(location))
                .buffered(ConfigManager::get_concurrency(config))
                .collect()
                .await;
            print!("{}", output.format_outcomes(&outcomes));
            Ok(outcomes.iter().all(|o| o.result))
        }

        Command::Harvest { sets } => {
            let catalog = load_catalog(config).await?;
            let services = services(config)?;
            let store = Arc::new(
                FileStore::open(&config.store.path)
                    .await
                    .with_context(|| {
                        format!("Failed to open report store {}", config.store.path.display())
                    })?,
            );

            let harvester = Harvester::new(
                catalog,
                services.fetcher,
                services.probe,
                store,
                services.wrapper,
                ConfigManager::harvest_config(config),
            );

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let summaries = harvester.run(sets, &cancel).await?;
            print!("{}", output.format_harvest(&summaries));
            Ok(summaries.iter().all(|s| s.all_passed()))
        }

        Command::History { set, failed } => {
            let store = FileStore::open(&config.store.path)
                .await
                .with_context(|| {
                    format!("Failed to open report store {}", config.store.path.display())
                })?;
            let snapshot = store.snapshot().await?;
            let entries = history_entries(&snapshot, set.as_deref(), *failed);
            print!("{}", output.format_history(&entries));
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    if let Err(e) = cli.validate() {
        bail!(e);
    }

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    let verbosity = verbosity(&config);
    init_tracing(verbosity);

    info!(command = ?cli.command, "Starting validate-metadata");
    let output = Output::new(verbosity, config.output.format.into());

    if run(&cli, &config, &output).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
