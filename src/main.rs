use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use host_triage::bundle::{verify, BundlePackager};
use host_triage::catalogue::builtin::{builtin_catalogue, mock_specs};
use host_triage::catalogue::Catalogue;
use host_triage::cli::{Args, Commands, IncidentCommands};
use host_triage::collectors::{collector_for_host, mock::MockCollector, PlatformCollector};
use host_triage::config::{load_or_create_config, CollectionProfile, CoreConfig};
use host_triage::detection::DetectionEngine;
use host_triage::engine::CollectionEngine;
use host_triage::incident::IncidentStore;
use host_triage::models::Severity;
use host_triage::report::ReportGenerator;
use host_triage::store::ReportsStore;
use host_triage::utils::clock::{Clock, SystemClock};

/// Exit codes surfaced to callers: 0 clean, 1 a step failed or a
/// high/critical finding exists, 2 the invocation was rejected.
const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_REJECTED: i32 = 2;

fn main() {
    let args = Args::parse();
    if let Err(e) = initialize_logging(args.verbose) {
        eprintln!("failed to initialize logging: {:#}", e);
        std::process::exit(EXIT_REJECTED);
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

fn initialize_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

fn run(args: Args) -> Result<i32> {
    let config = match load_or_create_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration rejected: {:#}", e);
            return Ok(EXIT_REJECTED);
        }
    };

    match args.command {
        Commands::Collect {
            output,
            extended,
            include,
            exclude,
            timeout,
            max_parallel,
            allow_network,
            format,
            catalogue,
            mock,
            incident,
        } => {
            let mut config = config;
            if let Some(format) = format {
                config.archive_format = format.into();
            }
            if allow_network {
                config.allow_network = true;
            }

            let mut profile = if extended {
                CollectionProfile::extended()
            } else {
                CollectionProfile::default()
            };
            profile.include = include.into_iter().collect();
            profile.exclude = exclude.into_iter().collect();
            profile.allow_network = config.allow_network;
            if let Some(timeout) = timeout {
                if timeout == 0 {
                    error!("--timeout must be positive");
                    return Ok(EXIT_REJECTED);
                }
                profile.timeout_secs = timeout;
            }
            if let Some(max_parallel) = max_parallel {
                if max_parallel == 0 {
                    error!("--max-parallel must be positive");
                    return Ok(EXIT_REJECTED);
                }
                profile.max_parallel = max_parallel;
            }

            handle_collect(config, profile, catalogue, mock, output, incident)
        }
        Commands::Verify { bundle } => handle_verify(&bundle),
        Commands::Incident(command) => handle_incident(&config, command),
        Commands::InitConfig { path } => {
            CoreConfig::default().save_to_yaml_file(&path)?;
            Ok(EXIT_OK)
        }
        Commands::Rules => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let detection = DetectionEngine::new(&config, clock);
            for rule in detection.rules() {
                println!("{:<12} {:<8} {}", rule.id, rule.severity, rule.name);
            }
            Ok(EXIT_OK)
        }
    }
}

fn handle_collect(
    config: CoreConfig,
    profile: CollectionProfile,
    catalogue_path: Option<std::path::PathBuf>,
    mock: bool,
    output: Option<std::path::PathBuf>,
    incident_id: Option<String>,
) -> Result<i32> {
    info!("Starting host triage collection");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let collector: Arc<dyn PlatformCollector> = if mock {
        info!("Mock collection requested, no host data will be read");
        Arc::new(MockCollector::new())
    } else {
        collector_for_host(&config)
    };
    let catalogue: Catalogue = match &catalogue_path {
        Some(path) => Catalogue::from_yaml_file(path)?,
        None if mock => Catalogue::build(mock_specs())?,
        None => builtin_catalogue(config.platform)?,
    };

    let store = ReportsStore::new(&config, Arc::clone(&clock))?;
    let incident_store = IncidentStore::new(&config, Arc::clone(&clock))?;
    let mut active_incident = match &incident_id {
        Some(id) => {
            let incident = incident_store.load(id)?;
            if incident.is_closed() {
                error!("incident {} is closed", id);
                return Ok(EXIT_REJECTED);
            }
            info!("Merging results into incident {}", id);
            Some(incident)
        }
        None => match incident_store.current()? {
            Some(incident) if !incident.is_closed() => {
                info!("Merging results into current incident {}", incident.id);
                Some(incident)
            }
            _ => None,
        },
    };

    let engine = CollectionEngine::new(collector, Arc::clone(&clock), config.clone());
    let runtime = Runtime::new().context("Failed to build async runtime")?;
    let run = runtime.block_on(engine.run(&catalogue, &profile));

    let detection = DetectionEngine::new(&config, Arc::clone(&clock));
    let findings = detection.detect(&run);

    let generator = ReportGenerator::new(&config);
    let reports = generator.generate(&run, &findings);

    let output = match output {
        Some(output) => output,
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };
    fs::create_dir_all(&output)
        .context(format!("Failed to create {}", output.display()))?;
    let case_id = active_incident.as_ref().map(|i| i.id.clone());
    let bundle = BundlePackager::new(config.clone()).package(
        &run,
        &findings,
        &reports,
        &output,
        case_id.as_deref(),
    )?;

    if let Some(incident) = active_incident.as_mut() {
        incident_store.merge_run(incident, &run, &findings)?;
    }

    let mut summary = serde_json::to_vec_pretty(&serde_json::json!({
        "runID": run.run_id,
        "counters": run.counters,
        "findings": findings.len(),
        "bundle": bundle.archive_path,
        "bundleChecksum": bundle.archive_checksum,
    }))?;
    summary.push(b'\n');
    store.save_collection(&summary, Some(&format!("run-{}.json", run.run_id)))?;
    match store.cleanup_older_than(config.max_log_age()) {
        Ok(0) => {}
        Ok(removed) => info!("Pruned {} stale report files", removed),
        Err(e) => warn!("Report retention cleanup failed: {:#}", e),
    }

    info!(
        "Collection complete: {} ok, {} failed, {} skipped, {} cancelled",
        run.counters.succeeded,
        run.counters.failed,
        run.counters.skipped,
        run.counters.cancelled
    );
    info!("Bundle written to {}", bundle.archive_path.display());

    let urgent = findings.iter().any(|f| f.severity >= Severity::High);
    if urgent {
        info!("High or critical findings present, review findings.md");
        return Ok(EXIT_FAILED);
    }
    Ok(EXIT_OK)
}

fn handle_verify(bundle: &Path) -> Result<i32> {
    let report = verify(bundle)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.ok {
        info!("Bundle verified: {}", bundle.display());
        Ok(EXIT_OK)
    } else {
        error!(
            "Bundle verification failed with {} mismatches",
            report.mismatches.len()
        );
        Ok(EXIT_FAILED)
    }
}

fn handle_incident(config: &CoreConfig, command: IncidentCommands) -> Result<i32> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = IncidentStore::new(config, clock)?;
    match command {
        IncidentCommands::Create {
            title,
            description,
            analyst,
            severity,
            loose,
        } => {
            let incident = store.create(
                &title,
                &description,
                &analyst,
                severity.into(),
                host_triage::cli::isolation_from_flag(loose),
            )?;
            println!("{}", incident.id);
            Ok(EXIT_OK)
        }
        IncidentCommands::List => {
            for summary in store.list()? {
                println!(
                    "{}  {:<8}  {:<8}  {}",
                    summary.id,
                    format!("{:?}", summary.status).to_lowercase(),
                    summary.severity,
                    summary.title
                );
            }
            Ok(EXIT_OK)
        }
        IncidentCommands::Show { id } => {
            let incident = store.load(&id)?;
            println!("{}", serde_json::to_string_pretty(&incident)?);
            Ok(EXIT_OK)
        }
        IncidentCommands::Use { id } => {
            let incident = store.set_current(&id)?;
            info!("Incident {} is now current", incident.id);
            Ok(EXIT_OK)
        }
        IncidentCommands::Current => {
            match store.current()? {
                Some(incident) => println!("{}", incident.id),
                None => println!("no current incident"),
            }
            Ok(EXIT_OK)
        }
        IncidentCommands::Close { id } => {
            store.close(&id)?;
            info!("Incident {} closed", id);
            Ok(EXIT_OK)
        }
    }
}
