mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tomato_contracts::events::EventWriter;
use tomato_contracts::export::write_export;
use tomato_contracts::AnalysisBundle;
use tomato_engine::{
    AnalysisError, AnalyzerSettings, ExecutionMode, ImageBlob, ParserKind, ProviderKind,
    TomatoAnalyzer,
};
use tracing::{debug, info};

use crate::render::{render_bundle, render_image_info};

#[derive(Debug, Parser)]
#[command(
    name = "tomato-rs",
    version,
    about = "Multi-agent tomato leaf diagnosis"
)]
struct Cli {
    /// Debug-level diagnostics on stderr (overridden by TOMATO_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run all five agents against one leaf photo.
    Analyze(AnalyzeArgs),
    /// Show what was read from an image without contacting any endpoint.
    Inspect(InspectArgs),
    /// Write the downloadable report for a saved bundle.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// openai or dryrun
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    sequential: bool,
    /// brace-span or balanced
    #[arg(long)]
    parser: Option<String>,
    #[arg(long)]
    export: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct InspectArgs {
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    bundle: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

const CONFIG_EXIT_CODE: i32 = 2;

const SETUP_GUIDANCE: &str = "\
Please set up your OpenAI API key:
  1. Create a .env file in the directory you run tomato-rs from
  2. Add the line OPENAI_API_KEY=your_api_key_here
  3. Replace your_api_key_here with your actual key (https://platform.openai.com/)
Use --provider dryrun to try the pipeline offline.";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tomato-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Inspect(args) => run_inspect(args),
        Command::Export(args) => run_export(args),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("TOMATO_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let settings = match AnalyzerSettings::from_env()
        .and_then(|base| resolve_settings(base, &args))
    {
        Ok(settings) => settings,
        Err(err) => return Ok(report_configuration_error(&err)),
    };
    analyze_with(&settings, &args)
}

/// Flags win over environment values.
fn resolve_settings(
    mut settings: AnalyzerSettings,
    args: &AnalyzeArgs,
) -> Result<AnalyzerSettings, AnalysisError> {
    if let Some(provider) = &args.provider {
        settings.provider = ProviderKind::parse(provider)?;
    }
    if let Some(parser) = &args.parser {
        settings.parser = ParserKind::parse(parser)?;
    }
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        settings.model = model.to_string();
    }
    if args.sequential {
        settings.mode = ExecutionMode::Sequential;
    }
    Ok(settings)
}

fn analyze_with(settings: &AnalyzerSettings, args: &AnalyzeArgs) -> Result<i32> {
    let analyzer = match TomatoAnalyzer::from_settings(settings) {
        Ok(analyzer) => analyzer,
        Err(err) => return Ok(report_configuration_error(&err)),
    };
    if settings.provider == ProviderKind::OpenAi {
        if let Some(masked) = settings.masked_api_key() {
            eprintln!("API key loaded: {masked}");
        }
    }

    let image = ImageBlob::from_path(&args.image)?;
    if !args.json {
        print!("{}", render_image_info(&image));
        println!();
    }

    let run_id = format!("analysis-{}", uuid::Uuid::new_v4());
    let events_path = args
        .events
        .clone()
        .or_else(|| args.out.as_ref().map(|out| out.join("events.jsonl")));
    let analyzer = match events_path {
        Some(path) => {
            debug!(events = %path.display(), "recording run events");
            analyzer.with_events(EventWriter::new(path, run_id.clone()))
        }
        None => analyzer,
    };
    info!(
        run_id = %run_id,
        endpoint = analyzer.endpoint_name(),
        model = analyzer.model(),
        mode = analyzer.mode().as_str(),
        "starting multi-agent analysis"
    );

    let bundle = match analyzer.analyze(&image) {
        Ok(bundle) => bundle,
        Err(err) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&err.to_value())?);
            } else {
                eprintln!("Analysis failed: {err}");
                eprintln!("Please check your API key and try again.");
            }
            return Ok(1);
        }
    };

    if let Some(out) = &args.out {
        let path = out.join("bundle.json");
        bundle.save(&path)?;
        debug!(bundle = %path.display(), "saved analysis bundle");
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
    } else {
        print!("{}", render_bundle(&bundle));
    }
    if args.export {
        let out_dir = args.out.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = write_export(&out_dir, &bundle)?;
        eprintln!("Analysis report written to {}", path.display());
    }
    Ok(0)
}

fn report_configuration_error(err: &AnalysisError) -> i32 {
    eprintln!("tomato-rs error: {err}");
    if matches!(err, AnalysisError::MissingCredential) {
        eprintln!("{SETUP_GUIDANCE}");
    }
    CONFIG_EXIT_CODE
}

fn run_inspect(args: InspectArgs) -> Result<i32> {
    let image = ImageBlob::from_path(&args.image)?;
    print!("{}", render_image_info(&image));
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let bundle = load_bundle(&args.bundle)?;
    let path = write_export(&args.out, &bundle)?;
    println!("{}", path.display());
    Ok(0)
}

fn load_bundle(path: &Path) -> Result<AnalysisBundle> {
    AnalysisBundle::load(path).with_context(|| "export needs a bundle.json from a successful run")
}
