//! `labrecon` CLI - reconstruct lab tables from OCR text files

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use labrecon::models::Sex;
use labrecon::{config, Demographic, LabTableProcessor, PipelineConfig, ReferenceCatalog};

#[derive(Parser)]
#[command(name = "labrecon")]
#[command(about = "Reconstruct structured lab results from OCR text")]
#[command(version)]
struct Cli {
    /// OCR text files, one document each
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print reports as JSON instead of one line per test
    #[arg(long)]
    json: bool,

    /// Reference catalog JSON (defaults to the bundled catalog)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Pipeline settings JSON; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lines a label may wait for its value
    #[arg(long)]
    lookahead: Option<usize>,

    /// Minimum catalog match score
    #[arg(long)]
    accept: Option<f64>,

    /// Score at or above which a match is high confidence
    #[arg(long)]
    high: Option<f64>,

    /// Patient age in years, used to pick reference ranges
    #[arg(long)]
    age: Option<u32>,

    /// Patient sex (male, female, m, f)
    #[arg(long)]
    sex: Option<String>,

    /// Do not untangle two-column layouts
    #[arg(long)]
    no_reorder: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    labrecon::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(message) => {
            eprintln!("labrecon: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    tracing::debug!(version = config::APP_VERSION, files = cli.files.len(), "Starting");

    let processor = build_processor(&cli)?;

    let mut documents = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        documents.push(processor.prepare_text(&text));
    }

    let results = processor.process_batch(documents).await;

    let mut failed = false;
    for (path, result) in cli.files.iter().zip(results) {
        match result {
            Ok(report) if cli.json => {
                let json = report.to_json().map_err(|e| e.to_string())?;
                println!("{json}");
            }
            Ok(report) => {
                if cli.files.len() > 1 {
                    println!("== {}", path.display());
                }
                println!("{}", labrecon::models::render_lab_lines(&report.entries));
                if report.discard_count() > 0 {
                    println!("({} incomplete row(s) discarded)", report.discard_count());
                }
            }
            Err(e) => {
                failed = true;
                eprintln!("labrecon: {}: {e}", path.display());
            }
        }
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn build_processor(cli: &Cli) -> Result<LabTableProcessor, String> {
    let mut pipeline = match &cli.config {
        Some(path) => PipelineConfig::load(path).map_err(|e| e.to_string())?,
        None => PipelineConfig::default(),
    };
    if let Some(lines) = cli.lookahead {
        pipeline = pipeline.with_lookahead(lines);
    }
    if cli.accept.is_some() || cli.high.is_some() {
        let accept = cli.accept.unwrap_or(pipeline.match_accept);
        let high = cli.high.unwrap_or(pipeline.match_high);
        pipeline = pipeline.with_thresholds(accept, high);
    }
    let sex = match cli.sex.as_deref() {
        Some(raw) => Some(Sex::parse_loose(raw).ok_or_else(|| format!("unknown sex: {raw}"))?),
        None => None,
    };
    if cli.age.is_some() || sex.is_some() {
        let demographic = Demographic { age: cli.age, sex }.or(pipeline.demographic);
        pipeline = pipeline.with_demographic(demographic);
    }
    if cli.no_reorder {
        pipeline = pipeline.with_column_reordering(false);
    }

    let catalog = match &cli.catalog {
        Some(path) => ReferenceCatalog::load(path),
        None => ReferenceCatalog::load_default(),
    }
    .map_err(|e| e.to_string())?;

    LabTableProcessor::new(Arc::new(catalog), pipeline).map_err(|e| e.to_string())
}
