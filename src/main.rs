//! Command-line front end for the mixing engine.
//!
//! Exit codes:
//! - 0:  success
//! - 2:  clap arg parse error
//! - 10: request rejected by validation
//! - 11: I/O error
//! - 12: malformed JSON input
//! - 13: serialization error

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use aop_mixer::models::{MixMode, OptimizationRequest, Paint, PerceptualColor};
use aop_mixer::services::color_metric::{ciede2000_breakdown, DeltaEWeights};
use aop_mixer::services::mixing::{aggregate_optics, MixingModel};
use aop_mixer::{EngineState, OptimizationError, Optimizer};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aop-mixer", about = "Paint mixing formula optimizer")]
struct Cli {
    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize one request and print the formula and run report.
    Optimize {
        /// Request JSON file, or "-" for stdin.
        #[arg(short, long, default_value = "-")]
        request: PathBuf,

        /// Seed overriding the one in the request.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Optimize a JSON array of requests in parallel.
    Batch {
        /// File holding a JSON array of requests, or "-" for stdin.
        #[arg(short, long, default_value = "-")]
        requests: PathBuf,
    },
    /// Predict the color of given paints mixed at given ratios.
    Mix {
        /// JSON object with "paints", "ratios" and optional "mode", or "-" for stdin.
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },
    /// CIEDE2000 difference between two #RRGGBB colors.
    DeltaE { first: String, second: String },
}

#[derive(Deserialize)]
struct MixInput {
    paints: Vec<Paint>,
    ratios: Vec<f64>,
    #[serde(default)]
    mode: MixMode,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Rejected(#[from] OptimizationError),
    #[error("{0}")]
    Io(String),
    #[error("invalid request JSON: {0}")]
    Input(String),
    #[error("failed to serialize output: {0}")]
    Serialization(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Rejected(_) => 10,
            CliError::Io(_) => 11,
            CliError::Input(_) => 12,
            CliError::Serialization(_) => 13,
        }
    }
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        match &e {
            CliError::Rejected(err) => eprintln!("error [{}]: {err}", err.code()),
            other => eprintln!("error: {other}"),
        }
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let optimizer = Optimizer::new(EngineState::from_env());

    match cli.command {
        Command::Optimize { request, seed } => {
            let mut request: OptimizationRequest = parse(&read_input(&request)?)?;
            if seed.is_some() {
                request.config.seed = seed;
            }
            let outcome = optimizer.optimize_request(&request)?;
            print_json(&outcome, cli.pretty)
        }
        Command::Batch { requests } => {
            let requests: Vec<OptimizationRequest> = parse(&read_input(&requests)?)?;
            let results: Vec<serde_json::Value> = optimizer
                .optimize_batch(&requests)
                .into_iter()
                .map(|result| match result {
                    Ok(outcome) => serde_json::json!({ "ok": outcome }),
                    Err(err) => serde_json::json!({
                        "error": { "code": err.code(), "message": err.to_string() }
                    }),
                })
                .collect();
            print_json(&results, cli.pretty)
        }
        Command::Mix { input } => {
            let input: MixInput = parse(&read_input(&input)?)?;
            let color = MixingModel::default().try_mix(&input.paints, &input.ratios, input.mode)?;
            let (k, s, opacity) = aggregate_optics(&input.paints, &input.ratios);
            let info = serde_json::json!({
                "predictedColor": color,
                "predictedHex": color.to_hex(),
                "kubelkaMunkK": k,
                "kubelkaMunkS": s,
                "opacity": opacity,
            });
            print_json(&info, cli.pretty)
        }
        Command::DeltaE { first, second } => {
            let a = PerceptualColor::from_hex(&first)?;
            let b = PerceptualColor::from_hex(&second)?;
            let breakdown = ciede2000_breakdown(&a, &b, DeltaEWeights::default());
            let info = serde_json::json!({
                "first": a,
                "second": b,
                "deltaE": breakdown.total,
                "deltaL": breakdown.delta_l,
                "deltaC": breakdown.delta_c,
                "deltaH": breakdown.delta_h,
            });
            print_json(&info, cli.pretty)
        }
    }
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| CliError::Io(format!("failed to read stdin: {e}")))?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("failed to read {}: {e}", path.display())))
    }
}

fn parse<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, CliError> {
    serde_json::from_str(raw).map_err(|e| CliError::Input(e.to_string()))
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| CliError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}
