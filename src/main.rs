use clap::{Parser, Subcommand};
use pagepress::backend::BackendRegistry;
use pagepress::config::{self, Config};
use pagepress::output;
use pagepress::section::SectionRegistry;
use pagepress::session::PublishSession;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagepress")]
#[command(about = "Publish a dynamic web application as a static site")]
#[command(long_about = "\
Publish a dynamic web application as a static site

Every path listed by the configured sections is fetched from the running
application and stored on the selected backend:

  disk             files under deploy_dir
  object-storage   S3 bucket, unchanged pages skipped, optional CloudFront invalidation
  platform         App Engine app.yaml + deploy/ directory

A path that fails is logged and skipped; the run always finishes.

Run 'pagepress gen-config' to generate a documented pagepress.toml.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Override deploy_dir from the config file
    #[arg(long, global = true)]
    deploy_dir: Option<PathBuf>,

    /// Render on a worker pool regardless of the config file
    #[arg(long, global = true)]
    parallel: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every section path and publish it to the backend
    Publish,
    /// Resolve and print every section's paths without fetching
    Paths,
    /// Print a stock pagepress.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Publish => {
            let config = load(&cli)?;
            let session = PublishSession::from_config(
                &config,
                &BackendRegistry::builtin(),
                &SectionRegistry::builtin(),
            )?;
            let report = session.run()?;
            output::print_publish_report(&report);
        }
        Command::Paths => {
            let config = load(&cli)?;
            let mut sections = SectionRegistry::builtin().build_all(&config.sections)?;
            let resolved: Vec<(String, Vec<String>)> = sections
                .iter_mut()
                .map(|s| (s.name().to_string(), s.resolve().to_vec()))
                .collect();
            output::print_paths(&resolved);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the config file and apply command-line overrides.
fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(dir) = &cli.deploy_dir {
        config.deploy_dir = dir.clone();
    }
    if cli.parallel {
        config.processing.parallel = true;
    }
    Ok(config)
}

/// Log to stderr; `RUST_LOG` wins over the default level.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
