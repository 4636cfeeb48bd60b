use clap::{Parser, Subcommand};
use quire::{
    GenerationError, GenerationOptions, JobId, Margins, MethodPreference, Orchestrator,
    Orientation, ProposalId, Quality, ServiceConfig, logging,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

// Long-running service with many short-lived allocations per render.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Generate proposal PDFs through a browser or office-suite renderer.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $QUIRE_CONFIG, then ./quire.toml)
    #[arg(long, short, global = true, env = "QUIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a PDF for a proposal
    Generate {
        proposal_id: String,
        /// auto, browser or office
        #[arg(long, default_value = "auto")]
        method: MethodPreference,
        /// draft, standard or high
        #[arg(long)]
        quality: Option<Quality>,
        /// Uniform page margin in millimetres
        #[arg(long)]
        margin: Option<f32>,
        #[arg(long, default_value_t = false)]
        landscape: bool,
        #[arg(long, default_value_t = false)]
        no_toc: bool,
        #[arg(long, default_value_t = false)]
        no_header_footer: bool,
        /// Render in this process and print the file path
        #[arg(long, default_value_t = false, conflicts_with = "wait")]
        sync: bool,
        /// Queue the job, run workers until it settles, then exit
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Show the state of a job
    Status { job_id: JobId },
    /// Cancel a queued job or detach from an active one
    Cancel { job_id: JobId },
    /// Drop cached PDFs of a proposal, or of every proposal with --all
    ClearCache {
        #[arg(required_unless_present = "all")]
        proposal_id: Option<String>,
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Print the capability table of the rendering methods
    Capabilities {
        /// Also check that each renderer's external tool works
        #[arg(long, default_value_t = false)]
        probe: bool,
    },
    /// Print cache and queue counters
    Stats,
    /// Run the worker pool until interrupted
    Serve,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to encode output: {}", e),
    }
}

fn options_from_args(
    method: MethodPreference,
    quality: Option<Quality>,
    margin: Option<f32>,
    landscape: bool,
    no_toc: bool,
    no_header_footer: bool,
) -> GenerationOptions {
    let mut options = GenerationOptions::new()
        .with_method(method)
        .with_toc(!no_toc)
        .with_header_footer(!no_header_footer);
    if let Some(quality) = quality {
        options = options.with_quality(quality);
    }
    if let Some(mm) = margin {
        options = options.with_margins(Margins::uniform(mm));
    }
    if landscape {
        options = options.with_orientation(Orientation::Landscape);
    }
    options
}

async fn run(cli: Cli, config: ServiceConfig) -> Result<(), GenerationError> {
    if let Command::Capabilities { probe: false } = cli.command {
        print_json(&quire::capabilities());
        return Ok(());
    }

    let orchestrator = Orchestrator::builder(config).with_config_backends()?.build()?;

    match cli.command {
        Command::Generate {
            proposal_id,
            method,
            quality,
            margin,
            landscape,
            no_toc,
            no_header_footer,
            sync,
            wait,
        } => {
            let options =
                options_from_args(method, quality, margin, landscape, no_toc, no_header_footer);
            let id = ProposalId::new(proposal_id);
            if sync {
                let result = orchestrator.generate_sync(id, &options).await;
                orchestrator.shutdown().await;
                print_json(&result?);
                return Ok(());
            }

            let response = orchestrator.generate(id, &options).await?;
            print_json(&response);
            if let (true, Some(job_id)) = (wait, response.job_id) {
                orchestrator.start();
                let outcome = orchestrator.wait(&job_id).await;
                orchestrator.shutdown().await;
                print_json(&outcome?);
                return Ok(());
            }
        }
        Command::Status { job_id } => print_json(&orchestrator.get_status(&job_id)?),
        Command::Cancel { job_id } => print_json(&orchestrator.cancel(&job_id)?),
        Command::ClearCache { proposal_id, all } => {
            let removed = match proposal_id {
                Some(id) if !all => orchestrator.clear_cache(&ProposalId::new(id)),
                _ => orchestrator.clear_all(),
            };
            print_json(&serde_json::json!({ "removed": removed }));
        }
        Command::Capabilities { .. } => {
            let probes = orchestrator.check_renderers().await;
            let report: Vec<_> = quire::capabilities()
                .into_iter()
                .map(|(method, caps)| {
                    let error = probes.get(&method).and_then(|p| p.clone().err());
                    serde_json::json!({
                        "capabilities": caps,
                        "available": error.is_none(),
                        "error": error,
                    })
                })
                .collect();
            print_json(&report);
        }
        Command::Stats => print_json(&serde_json::json!({
            "cache": orchestrator.cache_stats(),
            "queue": orchestrator.queue_depth(),
        })),
        Command::Serve => {
            orchestrator.start();
            log::info!("Serving; press Ctrl-C to stop");
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
            }
            log::info!("Shutting down, waiting for in-progress renders...");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match ServiceConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(cli.log_level.as_deref());
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.log_level.as_deref().or(config.log_level.as_deref()));

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
