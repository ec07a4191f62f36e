use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "contactfinder")]
#[command(about = "Finds missing fax numbers and homepages for organizations by searching the web with a real browser")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (use -v for per-record details, -vv for pipeline traces)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ./config/contactfinder.toml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl for missing contact data
    Run(RunArgs),

    /// Create the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Process one chunk read from stdin (started by `run`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        chunk_id: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// CSV or JSON file with the organizations to process
    /// CSV: header row with a name column and optional id/address/phone/fax/homepage columns
    /// JSON: array of objects, or {"organizations": [...]}
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Number of worker processes, each with its own browser (overrides config)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Records per chunk; chunks are queued and run at most --workers at a time
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Per-record time limit in seconds (overrides the derived default)
    #[arg(long, value_name = "SECS")]
    pub task_timeout: Option<u64>,

    /// Save a checkpoint after this many merged records (overrides config)
    #[arg(long, value_name = "K")]
    pub checkpoint_interval: Option<usize>,

    /// Continue from the latest checkpoint in the output directory
    #[arg(long)]
    pub resume: bool,

    /// Directory for checkpoints, report and exports
    #[arg(short, long, value_name = "DIR", default_value = "./output")]
    pub output_dir: PathBuf,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Ask the AI collaborator when regex extraction finds nothing
    #[arg(long)]
    pub enable_ai: bool,
}

impl RunArgs {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("Worker count must be greater than 0".to_string());
            }
            if workers > 32 {
                return Err("Worker count cannot exceed 32; each worker runs its own Chrome".to_string());
            }
        }

        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than 0".to_string());
        }

        if self.task_timeout == Some(0) {
            return Err("Task timeout must be greater than 0".to_string());
        }

        if self.checkpoint_interval == Some(0) {
            return Err("Checkpoint interval must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Fold command-line overrides into the loaded configuration
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(workers) = self.workers {
            config.worker.count = workers;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.worker.chunk_size = chunk_size;
        }
        if let Some(timeout) = self.task_timeout {
            config.worker.record_timeout_secs = timeout;
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint.interval_records = interval;
        }
        if self.headed {
            config.browser.headless = false;
        }
        if self.enable_ai {
            config.ai.enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_run_arguments() {
        let cli = parse(&[
            "contactfinder",
            "run",
            "--input",
            "orgs.csv",
            "--workers",
            "3",
            "--resume",
            "--headed",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.input, PathBuf::from("orgs.csv"));
        assert_eq!(args.workers, Some(3));
        assert!(args.resume);
        assert_eq!(args.output_dir, PathBuf::from("./output"));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = parse(&[
            "contactfinder",
            "run",
            "-i",
            "orgs.json",
            "--chunk-size",
            "50",
            "--task-timeout",
            "90",
            "--checkpoint-interval",
            "10",
            "--enable-ai",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = AppConfig::from_template().unwrap();
        args.apply_to(&mut config);
        assert_eq!(config.worker.chunk_size, 50);
        assert_eq!(config.worker.record_timeout_secs, 90);
        assert_eq!(config.checkpoint.interval_records, 10);
        assert!(config.ai.enabled);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_zero_values_rejected() {
        let cli = parse(&["contactfinder", "run", "-i", "a.csv", "--workers", "0"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_worker_subcommand_is_parsed() {
        let cli = parse(&["contactfinder", "worker", "--chunk-id", "4", "--config", "x.toml"]);
        assert!(matches!(cli.command, Commands::Worker { chunk_id: 4 }));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn test_run_requires_input() {
        assert!(Cli::try_parse_from(["contactfinder", "run"]).is_err());
    }
}
