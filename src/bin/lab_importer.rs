use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use lab_importer::app::{App, InfoResult, MapResult, ScanReport};
use lab_importer::config::{ConfigLoader, ResolvedConfig};
use lab_importer::domain::{FormatType, InstrumentFamily, ProjectRef};
use lab_importer::error::ImporterError;
use lab_importer::export::{ExportOptions, ExportSummary};
use lab_importer::output::{self, JsonOutput, OutputMode};
use lab_importer::readers::ReaderSet;
use lab_importer::scan::{ProgressSink, ScanEvent, ScanOptions};

#[derive(Parser)]
#[command(name = "lab-importer")]
#[command(about = "Validating importer for laboratory acquisition data (flow cytometry, microscopy)")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON instead of the interactive report.
    #[arg(long, global = true, alias = "json")]
    non_interactive: bool,

    /// Config file path; overrides LAB_IMPORTER_CONFIG and the user default.
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Scan an acquisition directory and report tree plus verdict")]
    Scan(ScanArgs),
    #[command(about = "Show metadata of a single acquisition file")]
    Info(InfoArgs),
    #[command(about = "Decode an FCS event table to CSV")]
    Export(ExportArgs),
    #[command(about = "Derive registration identifiers for scanned experiments")]
    Map(MapArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Args, Clone)]
struct ScanArgs {
    /// Directory to scan; falls back to data_root from config.
    root: Option<Utf8PathBuf>,

    #[arg(long)]
    instrument: Option<InstrumentFamily>,

    /// Parse dataset files on a thread pool.
    #[arg(long, conflicts_with = "sequential")]
    parallel: bool,

    /// Parse inline even when config enables parallel scanning.
    #[arg(long)]
    sequential: bool,

    /// Require every dataset to report this acquisition hardware.
    #[arg(long)]
    hardware: Option<String>,
}

#[derive(Args, Clone)]
struct InfoArgs {
    file: Utf8PathBuf,
}

#[derive(Args, Clone)]
struct ExportArgs {
    /// FCS file whose event table to decode.
    file: Utf8PathBuf,

    /// Destination CSV path; defaults to the source with a .csv extension.
    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Comma-separated parameter names to keep, in order.
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Keep every nth event.
    #[arg(long, default_value_t = 1)]
    sample: usize,
}

#[derive(Args, Clone)]
struct MapArgs {
    /// Directory to scan; falls back to data_root from config.
    root: Option<Utf8PathBuf>,

    #[arg(long)]
    instrument: Option<InstrumentFamily>,

    /// Map only this experiment instead of every one discovered.
    #[arg(long)]
    experiment: Option<String>,

    /// Project identifier such as /SPACE/PROJECT; overrides config.
    #[arg(long)]
    project: Option<String>,

    #[arg(long)]
    parallel: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(importer) = report.downcast_ref::<ImporterError>() {
            return ExitCode::from(map_exit_code(importer));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImporterError) -> u8 {
    match error {
        ImporterError::MissingConfig
        | ImporterError::ConfigRead(_)
        | ImporterError::ConfigParse(_)
        | ImporterError::UnsupportedSchema(_) => 2,
        ImporterError::InaccessibleRoot(_)
        | ImporterError::UnknownFormat(_)
        | ImporterError::UnexpectedEntry(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Scan(args) => run_scan(args, config_path, output_mode),
        Commands::Info(args) => run_info(args, output_mode),
        Commands::Export(args) => run_export(args, output_mode),
        Commands::Map(args) => run_map(args, config_path, output_mode),
        Commands::Config => run_config(config_path),
    }
}

fn run_scan(
    args: ScanArgs,
    config_path: Option<&Utf8Path>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = optional_config(config_path)?;
    let root = scan_root(args.root, config.as_ref())?;
    let options = build_scan_options(
        args.instrument,
        args.parallel,
        args.sequential,
        args.hardware,
        config.as_ref(),
    );
    let app = App::new(ReaderSet::standard());

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.scan(&root, &options, &JsonOutput)?;
            JsonOutput::print_scan(&report).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let report = app.scan(&root, &options, &ConsoleSink)?;
            print_scan_summary(&report);
            Ok(())
        }
    }
}

fn run_info(args: InfoArgs, output_mode: OutputMode) -> miette::Result<()> {
    let app = App::new(ReaderSet::standard());
    let result = app.info(&args.file)?;

    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_info(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            print_info_summary(&result);
            Ok(())
        }
    }
}

fn run_export(args: ExportArgs, output_mode: OutputMode) -> miette::Result<()> {
    let destination = args
        .out
        .unwrap_or_else(|| args.file.with_extension("csv"));
    let options = ExportOptions {
        columns: args.columns,
        sample: args.sample,
    };
    let app = App::new(ReaderSet::standard());
    let summary = app.export(&args.file, &destination, &options)?;

    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_export(&summary).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            print_export_summary(&summary);
            Ok(())
        }
    }
}

fn run_map(
    args: MapArgs,
    config_path: Option<&Utf8Path>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = optional_config(config_path)?;
    let root = scan_root(args.root, config.as_ref())?;
    let project = match args.project {
        Some(identifier) => identifier.parse::<ProjectRef>()?,
        None => config
            .as_ref()
            .and_then(|resolved| resolved.project.clone())
            .ok_or_else(|| {
                miette::Report::msg("project required (pass --project or set project in config)")
            })?,
    };
    let options = build_scan_options(args.instrument, args.parallel, false, None, config.as_ref());
    let app = App::new(ReaderSet::standard());

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.map(
                &root,
                &options,
                &project,
                args.experiment.as_deref(),
                &JsonOutput,
            )?;
            JsonOutput::print_map(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let result = app.map(
                &root,
                &options,
                &project,
                args.experiment.as_deref(),
                &ConsoleSink,
            )?;
            print_map_summary(&result);
            Ok(())
        }
    }
}

fn run_config(config_path: Option<&Utf8Path>) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(config_path)?;
    JsonOutput::print_config(&resolved).into_diagnostic()?;
    Ok(())
}

/// Config for commands that can run without one: only "no config anywhere"
/// is tolerated, a present-but-broken file still fails.
fn optional_config(config_path: Option<&Utf8Path>) -> miette::Result<Option<ResolvedConfig>> {
    match ConfigLoader::resolve(config_path) {
        Ok(resolved) => Ok(Some(resolved)),
        Err(ImporterError::MissingConfig) if config_path.is_none() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn scan_root(
    root: Option<Utf8PathBuf>,
    config: Option<&ResolvedConfig>,
) -> miette::Result<Utf8PathBuf> {
    root.or_else(|| config.and_then(|resolved| resolved.data_root.clone()))
        .ok_or_else(|| {
            miette::Report::msg("scan root required (pass a directory or set data_root in config)")
        })
}

fn build_scan_options(
    instrument: Option<InstrumentFamily>,
    parallel: bool,
    sequential: bool,
    hardware: Option<String>,
    config: Option<&ResolvedConfig>,
) -> ScanOptions {
    let family = instrument
        .or_else(|| config.map(|resolved| resolved.instrument))
        .unwrap_or(InstrumentFamily::Flow);
    let parallel = if sequential {
        false
    } else {
        parallel || config.map(|resolved| resolved.parallel).unwrap_or(false)
    };
    let expected_hardware =
        hardware.or_else(|| config.and_then(|resolved| resolved.expected_hardware.clone()));
    ScanOptions {
        family,
        parallel,
        expected_hardware,
    }
}

/// Prints scan progress as it happens; the summary comes separately.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn event(&self, event: ScanEvent) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let reset = "\x1b[0m";

        match event {
            ScanEvent::Started { root } => println!("scanning {root}"),
            ScanEvent::DatasetParsed { path } => println!("{green}  parsed {path}{reset}"),
            ScanEvent::DatasetRejected { path, reason } => {
                println!("{yellow}  rejected {path}: {reason}{reset}")
            }
            ScanEvent::Finished { .. } => {}
        }
    }
}

fn print_scan_summary(report: &ScanReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!();
    println!(
        "{cyan}scan of {} ({}){reset}",
        report.root_path, report.instrument
    );
    println!(
        "{green}experiments: {}  datasets: {}  attachments: {}{reset}",
        report.experiments, report.datasets, report.attachments
    );
    if report.verdict.is_valid() {
        println!("{green}structure: valid{reset}");
    } else {
        println!(
            "{red}structure: {} invalid path(s){reset}",
            report.verdict.invalid_count()
        );
        print!("{}", output::render_verdict(&report.verdict));
    }
    println!();
    print!("{}", output::render_tree(&report.tree));

    let _ = yellow;
}

fn print_info_summary(result: &InfoResult) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}{} ({}){reset}", result.path, result.format);
    println!("{green}version: {}{reset}", result.version);
    if result.format == FormatType::Fcs {
        println!("{green}events: {}{reset}", result.events);
        println!("parameters:");
        for parameter in &result.parameters {
            if parameter.label.is_empty() || parameter.label == parameter.name {
                println!("  {} ({} bits)", parameter.name, parameter.bits);
            } else {
                println!(
                    "  {} [{}] ({} bits)",
                    parameter.name, parameter.label, parameter.bits
                );
            }
        }
    }
    if !result.series.is_empty() {
        println!("series:");
        for series in &result.series {
            println!("  {} ({} attributes)", series.name, series.attributes.len());
        }
    }
    println!("{} text attributes", result.attributes.len());
}

fn print_export_summary(summary: &ExportSummary) {
    let green = "\x1b[32m";
    let reset = "\x1b[0m";

    println!(
        "{green}wrote {} of {} events to {}{reset}",
        summary.events_written, summary.events_total, summary.destination
    );
    println!("columns: {}", summary.columns.join(", "));
}

fn print_map_summary(result: &MapResult) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}mappings under {} for {}{reset}",
        result.root_path, result.project.identifier
    );
    for mapping in &result.mappings {
        println!("{}", output::render_mapping(mapping));
    }
}
