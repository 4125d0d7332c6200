use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_amr::config::{ConfigLoader, PipelineOverrides, ResolvedConfig, TrainOptions};
use kira_amr::dataset::{LabelTable, LabeledDataset};
use kira_amr::domain::{Accession, FeatureSource, parse_accession_list};
use kira_amr::error::AmrError;
use kira_amr::features::{FeatureInput, load_corpus, report_input};
use kira_amr::journal::Journal;
use kira_amr::model::ModelKind;
use kira_amr::orchestrator::{Orchestrator, ProgressSink};
use kira_amr::output::{
    JsonOutput, LogSink, OutputMode, PredictionRecord, QuietSink, TrainReport, prediction_line,
    print_batch_summary, print_summary_report, print_train_summary,
};
use kira_amr::predict::Predictor;
use kira_amr::tools::{SystemTools, ToolStatus};
use kira_amr::trainer::Trainer;
use kira_amr::workspace::REPORT_FILE;

#[derive(Parser)]
#[command(name = "kira-amr")]
#[command(about = "Fetch reads, call resistance variants, and train or apply phenotype classifiers")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ./kira-amr.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download reads and run variant calling for a list of accessions")]
    Fetch(FetchArgs),
    #[command(about = "Build per-isolate summary tables from existing reports")]
    Summarize(SummarizeArgs),
    #[command(about = "Train a classifier from extracted features and a label table")]
    Train(TrainArgs),
    #[command(about = "Predict the phenotype of new isolates with a trained model")]
    Predict(PredictArgs),
    #[command(about = "Write a label table from resistant and susceptible accession lists")]
    Labels(LabelsArgs),
    #[command(about = "Normalise a decorated accession list into a JSON array")]
    Accessions(AccessionsArgs),
}

#[derive(Args)]
struct DirArgs {
    #[arg(long)]
    reads_dir: Option<String>,

    #[arg(long)]
    calls_dir: Option<String>,

    #[arg(long)]
    summary_dir: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// Accession list: JSON array, JSON object, or one accession per line.
    accessions: PathBuf,

    #[arg(long)]
    workers: Option<usize>,

    /// Threads handed to the download tool.
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    backoff_secs: Option<u64>,

    #[arg(long)]
    tool_timeout_secs: Option<u64>,

    /// Only use reads already on disk.
    #[arg(long)]
    no_download: bool,

    /// Stop after the reads are fetched.
    #[arg(long)]
    no_call: bool,

    /// Keep raw reads after a report is produced.
    #[arg(long)]
    keep_raw: bool,

    #[command(flatten)]
    dirs: DirArgs,
}

#[derive(Args)]
struct SummarizeArgs {
    accessions: PathBuf,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    retries: Option<u32>,

    #[command(flatten)]
    dirs: DirArgs,
}

#[derive(Args)]
struct TrainArgs {
    /// CSV with `sample_id,label` columns (0 = resistant, 1 = susceptible).
    #[arg(long)]
    labels: PathBuf,

    /// Where to write the model artifact.
    #[arg(long, short)]
    output: PathBuf,

    /// Feature input shape (default from config, else `report`).
    #[arg(long, value_enum)]
    source: Option<FeatureSource>,

    #[arg(long, value_enum)]
    model: Option<ModelKind>,

    #[arg(long)]
    folds: Option<usize>,

    #[arg(long)]
    trees: Option<usize>,

    /// Inverse regularization strength of the logistic model.
    #[arg(long)]
    c: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    balanced: bool,

    #[arg(long)]
    no_standardize: bool,

    #[command(flatten)]
    dirs: DirArgs,
}

#[derive(Args)]
struct PredictArgs {
    /// Model artifact written by `train`.
    #[arg(long, short)]
    model: PathBuf,

    /// Cluster match table for a single report input. Without it each call
    /// directory is gated by its own summary table, as in training.
    #[arg(long)]
    clusters: Option<PathBuf>,

    /// Report files (or call directories) or summary tables, one per isolate.
    /// The model decides which of the two is expected.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    dirs: DirArgs,
}

#[derive(Args)]
struct LabelsArgs {
    #[arg(long)]
    resistant: PathBuf,

    #[arg(long)]
    susceptible: PathBuf,

    #[arg(long, short)]
    output: PathBuf,
}

#[derive(Args)]
struct AccessionsArgs {
    input: PathBuf,

    /// Write the JSON array here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(amr) = report.downcast_ref::<AmrError>() {
            return ExitCode::from(map_exit_code(amr));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AmrError) -> u8 {
    match error {
        AmrError::InvalidAccession(_)
        | AmrError::AccessionListRead(_)
        | AmrError::ConfigRead(_)
        | AmrError::ConfigParse(_)
        | AmrError::InputNotFound(_)
        | AmrError::ReportParse { .. }
        | AmrError::LabelParse(_)
        | AmrError::InvalidLabel { .. }
        | AmrError::LabelConflict(_)
        | AmrError::EmptyDataset(_)
        | AmrError::InvalidFolds { .. }
        | AmrError::ArtifactRead(_)
        | AmrError::ArtifactFormat(_)
        | AmrError::FeatureSpaceMismatch { .. }
        | AmrError::FeatureSourceMismatch { .. }
        | AmrError::ClustersOverride(_) => 2,
        AmrError::MissingTool(_) | AmrError::ToolFailed { .. } | AmrError::ToolTimeout { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, config, mode),
        Commands::Summarize(args) => run_summarize(args, config, mode),
        Commands::Train(args) => run_train(args, config, mode),
        Commands::Predict(args) => run_predict(args, config, mode),
        Commands::Labels(args) => run_labels(args),
        Commands::Accessions(args) => run_accessions(args),
    }
}

fn run_fetch(args: FetchArgs, mut config: ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    config.apply(&PipelineOverrides {
        workers: args.workers,
        threads: args.threads,
        retries: args.retries,
        backoff_secs: args.backoff_secs,
        tool_timeout_secs: args.tool_timeout_secs,
        reads_dir: args.dirs.reads_dir,
        calls_dir: args.dirs.calls_dir,
        summary_dir: args.dirs.summary_dir,
        no_download: args.no_download,
        no_call: args.no_call,
        keep_raw: args.keep_raw,
    });
    let accessions = read_accessions(&args.accessions)?;

    let tools = system_tools(&config);
    if let ToolStatus::Missing { message } =
        tools.tool_status(config.pipeline.download, config.pipeline.call_variants)
    {
        return Err(AmrError::MissingTool(message).into());
    }
    tracing::debug!(tools = ?tools.tool_info(), "external tools");

    let orchestrator = Orchestrator::new(
        config.workspace.clone(),
        tools.clone(),
        tools.clone(),
        tools,
        Journal::open(&config.run_log)?,
        Journal::open_plain(&config.triage_file)?,
    );
    let report = orchestrator.run(&accessions, &config.pipeline, sink(mode))?;

    match mode {
        OutputMode::Json => JsonOutput::print_batch(&report).into_diagnostic()?,
        OutputMode::Text => print_batch_summary(&report),
    }
    Ok(())
}

fn run_summarize(
    args: SummarizeArgs,
    mut config: ResolvedConfig,
    mode: OutputMode,
) -> miette::Result<()> {
    config.apply(&PipelineOverrides {
        workers: args.workers,
        retries: args.retries,
        reads_dir: args.dirs.reads_dir,
        calls_dir: args.dirs.calls_dir,
        summary_dir: args.dirs.summary_dir,
        ..PipelineOverrides::default()
    });
    let accessions = read_accessions(&args.accessions)?;

    let tools = system_tools(&config);
    if let ToolStatus::Missing { message } = tools.tool_status(false, true) {
        return Err(AmrError::MissingTool(message).into());
    }
    let orchestrator = Orchestrator::new(
        config.workspace.clone(),
        tools.clone(),
        tools.clone(),
        tools,
        Journal::open(&config.run_log)?,
        Journal::sink(),
    );
    let report = orchestrator.summarize(&accessions, &config.pipeline, sink(mode))?;

    match mode {
        OutputMode::Json => JsonOutput::print_summary(&report).into_diagnostic()?,
        OutputMode::Text => print_summary_report(&report),
    }
    Ok(())
}

fn run_train(args: TrainArgs, mut config: ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    config.apply(&PipelineOverrides {
        reads_dir: args.dirs.reads_dir,
        calls_dir: args.dirs.calls_dir,
        summary_dir: args.dirs.summary_dir,
        ..PipelineOverrides::default()
    });
    let defaults = &config.training;
    let options = TrainOptions {
        source: args.source.unwrap_or(defaults.source),
        model: args.model.unwrap_or(defaults.model),
        folds: args.folds.unwrap_or(defaults.folds),
        standardize: defaults.standardize && !args.no_standardize,
        trees: args.trees.unwrap_or(defaults.trees),
        balanced: defaults.balanced || args.balanced,
        seed: args.seed.unwrap_or(defaults.seed),
        c: args.c.unwrap_or(defaults.c),
    };
    if options.folds < 2 || options.trees == 0 || options.c <= 0.0 {
        return Err(AmrError::ConfigParse(
            "folds must be at least 2, trees and c positive".to_string(),
        )
        .into());
    }

    let labels = LabelTable::read(&args.labels)?;
    let corpus = load_corpus(&config.workspace, options.source)?;
    let dataset = LabeledDataset::assemble(&corpus, &labels);
    let outcome = Trainer::train(&dataset, &options)?;
    outcome.artifact.save(&args.output)?;

    let report = TrainReport {
        artifact: args.output.display().to_string(),
        manifest: &outcome.artifact.manifest,
    };
    match mode {
        OutputMode::Json => JsonOutput::print_train(&report).into_diagnostic()?,
        OutputMode::Text => print_train_summary(&report),
    }
    Ok(())
}

fn run_predict(args: PredictArgs, mut config: ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    config.apply(&PipelineOverrides {
        reads_dir: args.dirs.reads_dir,
        calls_dir: args.dirs.calls_dir,
        summary_dir: args.dirs.summary_dir,
        ..PipelineOverrides::default()
    });
    if args.clusters.is_some() && args.inputs.len() > 1 {
        return Err(AmrError::ClustersOverride(args.inputs.len()).into());
    }
    let predictor = Predictor::load(&args.model)?;
    tracing::debug!(source = %predictor.source(), "model feature source");

    let mut records = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let input = match (predictor.source(), &args.clusters) {
            (FeatureSource::Report, Some(clusters)) => FeatureInput::Report {
                report: if path.is_dir() {
                    path.join(REPORT_FILE)
                } else {
                    path.clone()
                },
                clusters: Some(clusters.clone()),
            },
            (FeatureSource::Report, None) => report_input(&config.workspace, path),
            (FeatureSource::Summary, _) => FeatureInput::Summary(path.clone()),
        };
        let prediction = predictor.predict_input(&input)?;
        if mode == OutputMode::Text {
            println!("{}", prediction_line(&path.display().to_string(), &prediction));
        }
        records.push(PredictionRecord {
            input: path.display().to_string(),
            prediction,
        });
    }
    if mode == OutputMode::Json {
        JsonOutput::print_predictions(&records).into_diagnostic()?;
    }
    Ok(())
}

fn run_labels(args: LabelsArgs) -> miette::Result<()> {
    let resistant = read_accessions(&args.resistant)?;
    let susceptible = read_accessions(&args.susceptible)?;
    let table = LabelTable::from_lists(&resistant, &susceptible)?;
    table.write(&args.output)?;
    tracing::info!(
        rows = table.len(),
        path = %args.output.display(),
        "label table written"
    );
    Ok(())
}

fn run_accessions(args: AccessionsArgs) -> miette::Result<()> {
    let accessions = read_accessions(&args.input)?;
    match args.output {
        Some(path) => {
            let json = serde_json::to_vec_pretty(&accessions).into_diagnostic()?;
            kira_amr::workspace::Workspace::write_bytes_atomic(&path, &json)?;
            tracing::info!(count = accessions.len(), path = %path.display(), "accession list written");
        }
        None => JsonOutput::print_accessions(&accessions).into_diagnostic()?,
    }
    Ok(())
}

fn read_accessions(path: &Path) -> Result<Vec<Accession>, AmrError> {
    let content =
        fs::read_to_string(path).map_err(|_| AmrError::AccessionListRead(path.to_path_buf()))?;
    let accessions = parse_accession_list(&content);
    if accessions.is_empty() {
        tracing::warn!(path = %path.display(), "accession list is empty");
    }
    Ok(accessions)
}

fn system_tools(config: &ResolvedConfig) -> SystemTools {
    SystemTools::new(
        config.reference.clone(),
        config.workspace.logs_root().as_std_path().to_path_buf(),
        config.tool_timeout,
    )
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &QuietSink,
        OutputMode::Text => &LogSink,
    }
}
