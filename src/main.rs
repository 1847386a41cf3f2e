use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use leakwatch::config::Calibration;
use leakwatch::Scene;

#[derive(Parser)]
#[command(
    name = "leakwatch",
    about = "Defect-risk inference for buried water pipelines",
    version,
    long_about = None
)]
struct Cli {
    /// Calibration file (TOML). Falls back to LEAKWATCH_CALIBRATION, then
    /// /etc/leakwatch/calibration.toml, then built-in defaults.
    #[arg(long, global = true)]
    calibration: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detectors over a scene and print the inspection worklist
    Analyze {
        /// Scene file (JSON with junctions, segments and bands)
        #[arg(long)]
        scene: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List segments that are both old and leak-prone
    Vulnerable {
        #[arg(long)]
        scene: PathBuf,

        /// Minimum age in years (calibration default when omitted)
        #[arg(long)]
        min_age: Option<f64>,

        /// Minimum recorded leaks (calibration default when omitted)
        #[arg(long)]
        min_leaks: Option<u32>,
    },

    /// List junctions downstream of a segment
    Trace {
        #[arg(long)]
        scene: PathBuf,

        #[arg(long)]
        segment: String,

        /// Hop limit (calibration default when omitted)
        #[arg(long)]
        max_hops: Option<usize>,
    },

    /// Print the effective calibration as TOML
    Calibration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays parseable
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let calibration = Calibration::resolve(cli.calibration.as_deref())?;

    match cli.command {
        Commands::Analyze { scene, json } => {
            tracing::info!(scene = %scene.display(), "Running risk analysis");
            let (pipeline, bands) = Scene::load(&scene)?.into_pipeline(calibration).await?;
            let report = pipeline.run(bands).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_table());
            }
        }
        Commands::Vulnerable {
            scene,
            min_age,
            min_leaks,
        } => {
            let defaults = calibration.network.clone();
            let (pipeline, _) = Scene::load(&scene)?.into_pipeline(calibration).await?;
            let min_age = min_age.unwrap_or(defaults.vulnerable_min_age_years);
            let min_leaks = min_leaks.unwrap_or(defaults.vulnerable_min_leaks);
            let hits = pipeline
                .graph()
                .find_vulnerable_segments(min_age, min_leaks)
                .await?;
            if hits.is_empty() {
                println!("No segments at least {min_age} years old with {min_leaks}+ leaks.");
            } else {
                for id in hits {
                    println!("{id}");
                }
            }
        }
        Commands::Trace {
            scene,
            segment,
            max_hops,
        } => {
            let hops = max_hops.unwrap_or(calibration.network.trace_max_hops);
            let (pipeline, _) = Scene::load(&scene)?.into_pipeline(calibration).await?;
            let reached = pipeline.graph().trace_downstream(&segment, hops).await?;
            if reached.is_empty() {
                println!("Nothing downstream of {segment} within {hops} hops.");
            } else {
                for id in reached {
                    println!("{id}");
                }
            }
        }
        Commands::Calibration => {
            print!("{}", calibration.to_toml()?);
        }
    }

    Ok(())
}
