//! CLI command definitions for wrfda-runner.
//!
//! - `run` executes the pipeline for one date or for every date of an
//!   arguments file, or writes such a file with `--outargs`
//! - `step` executes a single build or run step of one cycle
//! - `clean` removes the working directory of a date

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use crate::batch::{
    dataset_from_config_name, default_config_name, ArgsFile, Period, DEFAULT_ARGS_FILE,
};
use crate::pipeline::{
    parse_compact_date, Configuration, Cycle, ForecastRun, InputDataset, Orchestrator, RunPhase,
    StepKind,
};

/// Default configuration file name, relative to the working directory.
const DEFAULT_CONFIG_FILE: &str = "wrfda-runner.cfg";

/// Build and run WPS, WRFDA and WRF cycles for assimilated forecasts.
#[derive(Parser, Debug)]
#[command(name = "wrfda-runner")]
#[command(about = "Build and run WPS, WRFDA and WRF cycles for assimilated forecasts")]
#[command(version)]
#[command(
    long_about = "wrfda-runner prepares and runs a WRF forecast with three cycles of WRFDA data assimilation.\n\nDates use the YYYYMMDDHH format. The working directory must contain a prepared environment.\n\nExample usage:\n  wrfda-runner run -p WPSDA -i GFS /runs 2020071512 2020071712"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one date, or for every date of the arguments file.
    Run(RunArgs),

    /// Run a single step of one cycle.
    Step(StepArgs),

    /// Remove the working directory of a date.
    Clean(CleanArgs),
}

/// Phase selection on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseArg {
    /// WPS and real only.
    #[value(name = "WPS", alias = "wps")]
    Wps,
    /// Assimilation cycles only.
    #[value(name = "DA", alias = "da")]
    Da,
    /// Both.
    #[value(name = "WPSDA", alias = "wpsda")]
    Wpsda,
}

impl From<PhaseArg> for RunPhase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Wps => RunPhase::PreprocessOnly,
            PhaseArg::Da => RunPhase::AssimilateOnly,
            PhaseArg::Wpsda => RunPhase::PreprocessThenAssimilate,
        }
    }
}

/// Input dataset selection on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetArg {
    #[value(name = "GFS", alias = "gfs")]
    Gfs,
    #[value(name = "IFS", alias = "ifs")]
    Ifs,
}

impl From<DatasetArg> for InputDataset {
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::Gfs => InputDataset::Gfs,
            DatasetArg::Ifs => InputDataset::Ifs,
        }
    }
}

/// Arguments for `wrfda-runner run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Phase to execute.
    #[arg(short = 'p', long, value_enum, default_value = "WPSDA")]
    pub phase: PhaseArg,

    /// Global model dataset. Inferred from a `.gfs.cfg`/`.ifs.cfg`
    /// configuration name in the arguments file when omitted.
    #[arg(short = 'i', long, value_enum)]
    pub input: Option<DatasetArg>,

    /// Write the dates to this arguments file instead of running them.
    #[arg(long)]
    pub outargs: Option<PathBuf>,

    /// Configuration file, relative to the working directory.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Working directory containing the prepared environment.
    pub workdir: PathBuf,

    /// Start date (YYYYMMDDHH). Without it, dates are read from
    /// `inputs/arguments.txt` in the working directory.
    pub start: Option<String>,

    /// End date (YYYYMMDDHH). Defaults to the configured forecast length.
    pub end: Option<String>,
}

/// Arguments for `wrfda-runner step`.
#[derive(Parser, Debug)]
pub struct StepArgs {
    /// Cycle of the step (1, 2 or 3).
    #[arg(long)]
    pub cycle: u8,

    /// Step to run: build-da, run-da, build-wrf or run-wrf.
    #[arg(long)]
    pub kind: StepKind,

    /// Configuration file, relative to the working directory.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Working directory containing the prepared environment.
    pub workdir: PathBuf,

    /// Start date of the run (YYYYMMDDHH).
    pub start: String,

    /// End date (YYYYMMDDHH). Defaults to the configured forecast length.
    pub end: Option<String>,
}

/// Arguments for `wrfda-runner clean`.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Configuration file, relative to the working directory.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Working directory containing the run.
    pub workdir: PathBuf,

    /// Start date of the run to remove (YYYYMMDDHH).
    pub date: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Step(args) => step_command(args).await,
        Commands::Clean(args) => clean_command(args).await,
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    Ok(cwd.join(path))
}

fn load_config(workdir: &Path, config: &Path) -> anyhow::Result<Configuration> {
    let path = workdir.join(config);
    Configuration::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn run_end(
    start: chrono::DateTime<chrono::Utc>,
    end: Option<&str>,
    config: &Configuration,
) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    match end {
        Some(end) => Ok(parse_compact_date(end)?),
        None => Ok(start + chrono::Duration::hours(i64::from(config.run.forecast_hours))),
    }
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let workdir = absolute(&args.workdir)?;
    let phase = RunPhase::from(args.phase);

    let Some(start) = args.start.as_deref() else {
        if args.outargs.is_some() {
            bail!("--outargs requires explicit start and end dates");
        }
        return run_args_file(&workdir, phase, &args).await;
    };

    let start = parse_compact_date(start)?;
    let dataset = args
        .input
        .map(InputDataset::from)
        .or_else(|| args.config.as_deref().and_then(dataset_from_config_name))
        .unwrap_or(InputDataset::Gfs);

    if let Some(outargs) = &args.outargs {
        let end = match args.end.as_deref() {
            Some(end) => parse_compact_date(end)?,
            None => bail!("--outargs requires explicit start and end dates"),
        };
        let hours = u32::try_from((end - start).num_hours())
            .ok()
            .filter(|h| *h > 0)
            .context("end date must be after the start date")?;
        let config_name = outargs_config_name(args.config.as_deref(), dataset)?;
        let file = ArgsFile::new(config_name, vec![Period::new(start, hours)]);
        file.write_or_append(workdir.join(outargs))?;
        return Ok(());
    }

    let config_name = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&workdir, &config_name)?;
    let end = run_end(start, args.end.as_deref(), &config)?;
    let run = ForecastRun::new(start, end, phase, dataset)?;

    let orchestrator = Orchestrator::local(config, &workdir);
    orchestrator.run(&run).await?;
    Ok(())
}

/// Configuration name recorded in an arguments file, whose suffix must name
/// `dataset` so that a later batch run picks the same one.
fn outargs_config_name(config: Option<&Path>, dataset: InputDataset) -> anyhow::Result<PathBuf> {
    let Some(config) = config else {
        return Ok(PathBuf::from(default_config_name(dataset)));
    };
    match dataset_from_config_name(config) {
        Some(hint) if hint == dataset => Ok(config.to_path_buf()),
        Some(hint) => bail!(
            "configuration `{}` is for {} but the input dataset is {}",
            config.display(),
            hint,
            dataset
        ),
        None => bail!(
            "configuration `{}` must end in .gfs.cfg or .ifs.cfg to be written with --outargs",
            config.display()
        ),
    }
}

async fn run_args_file(workdir: &Path, phase: RunPhase, args: &RunArgs) -> anyhow::Result<()> {
    let path = workdir.join(DEFAULT_ARGS_FILE);
    let file = ArgsFile::read(&path)
        .with_context(|| format!("failed to read dates from {}", path.display()))?;

    let dataset = match (args.input, file.dataset_hint()) {
        (Some(input), _) => InputDataset::from(input),
        (None, Some(hint)) => hint,
        (None, None) => bail!(
            "unknown input dataset: configuration `{}` must end in .gfs.cfg or .ifs.cfg, or pass -i",
            file.config_path.display()
        ),
    };

    let config_name = args.config.clone().unwrap_or_else(|| file.config_path.clone());
    let config = load_config(workdir, &config_name)?;

    let runs = file
        .periods
        .iter()
        .map(|period| ForecastRun::with_hours(period.start, period.hours, phase, dataset))
        .collect::<Result<Vec<_>, _>>()?;

    if runs.is_empty() {
        warn!(path = %path.display(), "Arguments file lists no dates");
        return Ok(());
    }
    info!(dates = runs.len(), dataset = %dataset, "Read dates from arguments file");

    let orchestrator = Orchestrator::local(config, workdir);
    orchestrator.run_batch(&runs).await?;

    let stats = orchestrator.stats();
    info!(completed = stats.completed, "All dates completed");
    Ok(())
}

async fn step_command(args: StepArgs) -> anyhow::Result<()> {
    let workdir = absolute(&args.workdir)?;
    let cycle = Cycle::new(args.cycle)?;
    let config_name = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&workdir, &config_name)?;

    let start = parse_compact_date(&args.start)?;
    let end = run_end(start, args.end.as_deref(), &config)?;
    // the dataset only matters to WPS
    let run = ForecastRun::new(start, end, RunPhase::AssimilateOnly, InputDataset::Gfs)?;

    let orchestrator = Orchestrator::local(config, &workdir);
    orchestrator.run_step(&run, cycle, args.kind).await?;
    Ok(())
}

async fn clean_command(args: CleanArgs) -> anyhow::Result<()> {
    let workdir = absolute(&args.workdir)?;
    let config_name = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&workdir, &config_name)?;
    let date = parse_compact_date(&args.date)?;

    let orchestrator = Orchestrator::local(config, &workdir);
    orchestrator.remove_run_folder(&date).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "wrfda-runner",
            "run",
            "-p",
            "DA",
            "-i",
            "ifs",
            "/runs",
            "2020071512",
            "2020071712",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(RunPhase::from(args.phase), RunPhase::AssimilateOnly);
        assert_eq!(args.input.map(InputDataset::from), Some(InputDataset::Ifs));
        assert_eq!(args.start.as_deref(), Some("2020071512"));
        assert_eq!(args.end.as_deref(), Some("2020071712"));
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["wrfda-runner", "run", "/runs"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.phase, PhaseArg::Wpsda);
        assert_eq!(args.input, None);
        assert_eq!(args.start, None);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_rejects_unknown_phase() {
        assert!(Cli::try_parse_from(["wrfda-runner", "run", "-p", "WRF", "/runs"]).is_err());
    }

    #[test]
    fn test_parse_step() {
        let cli = Cli::try_parse_from([
            "wrfda-runner",
            "step",
            "--cycle",
            "2",
            "--kind",
            "run-da",
            "/runs",
            "2020071512",
        ])
        .unwrap();
        let Commands::Step(args) = cli.command else {
            panic!("expected step");
        };
        assert_eq!(args.cycle, 2);
        assert_eq!(args.kind, StepKind::RunDa);
    }

    #[tokio::test]
    async fn test_outargs_writes_arguments_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = Cli::try_parse_from([
            "wrfda-runner",
            "run",
            "-c",
            "italy-config.gfs.cfg",
            "--outargs",
            "inputs/arguments.txt",
            tmp.path().to_str().unwrap(),
            "2020071512",
            "2020071712",
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let text = std::fs::read_to_string(tmp.path().join("inputs/arguments.txt")).unwrap();
        assert_eq!(text, "italy-config.gfs.cfg\n2020071512 48\n");
    }

    #[tokio::test]
    async fn test_outargs_records_the_input_dataset() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = Cli::try_parse_from([
            "wrfda-runner",
            "run",
            "-i",
            "IFS",
            "--outargs",
            "inputs/arguments.txt",
            tmp.path().to_str().unwrap(),
            "2020071500",
            "2020071700",
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let file = ArgsFile::read(tmp.path().join("inputs/arguments.txt")).unwrap();
        assert_eq!(file.config_path, PathBuf::from("france-config.ifs.cfg"));
        assert_eq!(file.dataset_hint(), Some(InputDataset::Ifs));
        assert_eq!(file.periods[0].hours, 48);
    }

    #[tokio::test]
    async fn test_outargs_rejects_config_of_another_dataset() {
        let tmp = tempfile::TempDir::new().unwrap();
        for config in ["italy-config.gfs.cfg", "wrfda-runner.cfg"] {
            let cli = Cli::try_parse_from([
                "wrfda-runner",
                "run",
                "-i",
                "IFS",
                "-c",
                config,
                "--outargs",
                "inputs/arguments.txt",
                tmp.path().to_str().unwrap(),
                "2020071500",
                "2020071700",
            ])
            .unwrap();
            assert!(run_with_cli(cli).await.is_err(), "{} accepted", config);
        }
        assert!(!tmp.path().join("inputs/arguments.txt").exists());
    }

    #[tokio::test]
    async fn test_args_file_without_dataset_hint_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("inputs")).unwrap();
        std::fs::write(
            tmp.path().join("inputs/arguments.txt"),
            "wrfda-runner.cfg\n2020071512 48\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from(["wrfda-runner", "run", tmp.path().to_str().unwrap()]).unwrap();
        let err = run_with_cli(cli).await.unwrap_err();
        assert!(err.to_string().contains("unknown input dataset"));
    }
}
