//! Prints the label record extracted from an OCR result file.

use clap::Parser;
use food_label_lib::{LabelConfig, LabelEngine};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print the food label record extracted from an OCR result
#[derive(Parser, Debug)]
#[command(name = "dump_label")]
#[command(about = "Extract GB 7718 label fields from an OCR result")]
struct Args {
    /// OCR result JSON file, or "-" for stdin
    input: String,

    /// Label tables TOML overriding the embedded ones
    #[arg(long, value_name = "PATH")]
    tables: Option<PathBuf>,

    /// Also print the run's diagnostics
    #[arg(long)]
    diagnostics: bool,
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| format!("Could not read stdin: {}", e))?;
        return Ok(content);
    }
    std::fs::read_to_string(Path::new(input)).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            format!("File not found: {}", input)
        } else {
            format!("Could not read file: {}", e)
        }
    })
}

fn run(args: Args) -> Result<(), String> {
    let config = match &args.tables {
        Some(path) => LabelConfig::from_path(path),
        None => LabelConfig::from_env(),
    }
    .map_err(|e| e.to_string())?;
    let engine = LabelEngine::new(config);

    let content = read_input(&args.input)?;
    let record = engine.extract_json(&content).map_err(|e| e.to_string())?;
    info!("{} diagnostic(s), confidence {:.3}", record.diagnostics.len(), record.confidence);

    println!("{}", record.to_json().map_err(|e| e.to_string())?);
    if args.diagnostics {
        let diagnostics = serde_json::to_string_pretty(&record.diagnostics).map_err(|e| e.to_string())?;
        println!("{}", diagnostics);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
