use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use contactfinder::batch;
use contactfinder::checkpoint::FileCheckpointStore;
use contactfinder::cli::{Cli, Commands, RunArgs};
use contactfinder::config::{self, AppConfig};
use contactfinder::logger::{self, CrawlLogger, VerbosityLevel};
use contactfinder::orchestrator::{Orchestrator, ProcessLauncher};
use contactfinder::worker;

/// Exit code for configuration, input and other startup failures
const EXIT_STARTUP: i32 = 3;

/// Exit code for a run that stopped after it started
const EXIT_ABORTED: i32 = 2;

/// Number of Ctrl-C presses seen; the second one force-exits
static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);

    let code = match &cli.command {
        Commands::Init { force } => init_config(cli.config.as_deref(), *force),
        Commands::Worker { chunk_id } => {
            let _ = logger::init_tracing(verbosity);
            run_worker(cli.config.as_deref(), *chunk_id).await
        }
        Commands::Run(args) => {
            if let Err(e) = logger::init_tracing(verbosity) {
                eprintln!("⚠️  {}", e);
            }
            run_crawl(cli.config.as_deref(), args, cli.verbose, verbosity).await
        }
    };

    std::process::exit(code);
}

fn init_config(path: Option<&Path>, force: bool) -> i32 {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(config::CONFIG_PATH));
    if path.exists() && !force {
        eprintln!("❌ Configuration file already exists at: {}", path.display());
        eprintln!("   Use --force to overwrite it.");
        return EXIT_STARTUP;
    }

    match AppConfig::create_default_config_at(&path) {
        Ok(path) => {
            println!("✅ Created default configuration file at: {}", path.display());
            println!("   Edit this file to customize settings, then run contactfinder again.");
            0
        }
        Err(e) => {
            eprintln!("❌ Failed to create configuration file: {}", e);
            EXIT_STARTUP
        }
    }
}

/// Load configuration, offering to create it interactively when missing.
fn load_config(path: Option<&Path>) -> Option<AppConfig> {
    let result = match path {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    };

    match result {
        Ok(cfg) => Some(cfg),
        Err(config::ConfigError::FileNotFound(missing)) => {
            // The prompt only writes to the default location
            let prompt = if path.is_none() {
                AppConfig::prompt_create_config()
            } else {
                Ok(None)
            };
            match prompt {
                Ok(Some(created)) => {
                    println!("✅ Created default configuration file at: {}", created.display());
                    println!("   Edit this file to customize settings, then run contactfinder again.");
                }
                Ok(None) => {
                    eprintln!("❌ Configuration file not found at: {}", missing.display());
                    eprintln!("   Run `contactfinder init` to create a default configuration file.");
                }
                Err(e) => eprintln!("❌ Failed to create configuration file: {}", e),
            }
            None
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            None
        }
    }
}

async fn run_worker(config_path: Option<&Path>, chunk_id: usize) -> i32 {
    let Some(config) = load_config(config_path) else {
        return EXIT_STARTUP;
    };

    let handle = tokio::runtime::Handle::current();
    let joined = tokio::task::spawn_blocking(move || worker::run_worker_process(config, chunk_id, handle)).await;

    match joined {
        Ok(Ok(summary)) => match summary.stopped {
            Some(worker::StopReason::Fatal { .. }) => 1,
            _ => 0,
        },
        Ok(Err(e)) => {
            tracing::error!("Worker {} failed: {:#}", chunk_id, e);
            1
        }
        Err(e) => {
            tracing::error!("Worker {} panicked: {}", chunk_id, e);
            1
        }
    }
}

async fn run_crawl(config_path: Option<&Path>, args: &RunArgs, verbose: u8, verbosity: VerbosityLevel) -> i32 {
    let logger = CrawlLogger::new(verbosity);

    if let Err(e) = args.validate() {
        logger.error(&format!("Invalid arguments: {}", e));
        return EXIT_STARTUP;
    }

    let Some(mut app_config) = load_config(config_path) else {
        return EXIT_STARTUP;
    };
    args.apply_to(&mut app_config);
    if let Err(e) = app_config.validate() {
        logger.error(&format!("Configuration error: {}", e));
        return EXIT_STARTUP;
    }

    let input = match batch::load_organizations(&args.input) {
        Ok(records) => records,
        Err(e) => {
            logger.error(&format!("Failed to load input: {:#}", e));
            return EXIT_STARTUP;
        }
    };
    logger.info(&format!("Loaded {} organization(s) from {}", input.len(), args.input.display()));

    if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
        logger.error(&format!(
            "Failed to create output directory '{}': {}",
            args.output_dir.display(),
            e
        ));
        return EXIT_STARTUP;
    }

    let checkpoint_dir = app_config.checkpoint.resolve_directory(&args.output_dir);
    let store = match FileCheckpointStore::new(checkpoint_dir, app_config.checkpoint.keep_generations) {
        Ok(store) => store,
        Err(e) => {
            logger.error(&format!("Failed to open checkpoint store: {:#}", e));
            return EXIT_STARTUP;
        }
    };

    let launcher = match ProcessLauncher::prepare(&app_config, &args.output_dir, verbose) {
        Ok(launcher) => launcher,
        Err(e) => {
            logger.error(&format!("Failed to prepare worker launch: {:#}", e));
            return EXIT_STARTUP;
        }
    };

    // First Ctrl-C asks workers to stop after their current record; the second force-exits
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    let handler_tx = cancel_tx.clone();
    ctrlc::set_handler(move || {
        if INTERRUPTS.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\n⚠️  Interrupt received. Letting workers finish their current record and saving a checkpoint...");
            eprintln!("⚠️  Press Ctrl-C again to exit immediately.");
            handler_tx.send_replace(true);
        } else {
            eprintln!("\n⚠️  Force exiting (the last checkpoint is kept).");
            std::process::exit(130); // 130 = 128 + SIGINT(2), standard exit code for Ctrl-C
        }
    })
    .unwrap_or_else(|e| {
        eprintln!(
            "⚠️  Warning: Failed to set Ctrl-C handler: {}. Interrupt signals may not be handled gracefully.",
            e
        );
    });

    let orchestrator = Orchestrator::new(
        app_config,
        Box::new(launcher),
        Box::new(store),
        args.output_dir.clone(),
        logger.clone(),
        cancel_rx,
    );

    let records = match orchestrator.prepare(input, args.resume) {
        Ok(records) => records,
        Err(e) => {
            logger.error(&format!("Failed to resume: {:#}", e));
            return EXIT_STARTUP;
        }
    };

    match orchestrator.run(records).await {
        Ok(summary) => {
            logger.print_final_summary(&summary.report);
            println!("Results exported to: {}", args.output_dir.display());
            summary.report.outcome.exit_code()
        }
        Err(e) => {
            logger.error(&format!("Run failed: {:#}", e));
            EXIT_ABORTED
        }
    }
}
