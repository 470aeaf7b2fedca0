//! nodeshift - lymph-node shift analysis CLI
//!
//! Command-line interface for nested variance decomposition of node shifts.

use clap::{Parser, Subcommand, ValueEnum};
use nodeshift::benchmark::{generate_synthetic, SyntheticConfig};
use nodeshift::data::{ObservationTable, Reference};
use nodeshift::error::Result;
use nodeshift::pipeline::{fit_batch, run_analysis, AnalysisConfig, ModelPlan};
use nodeshift::report::{to_markdown, variance_table, write_report, BatchSummary};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// CLI-friendly reference enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliReference {
    /// Shifts relative to bony anatomy
    Bony,
    /// Shifts relative to the tumor
    Tumor,
}

impl From<CliReference> for Reference {
    fn from(reference: CliReference) -> Self {
        match reference {
            CliReference::Bony => Reference::Bony,
            CliReference::Tumor => Reference::Tumor,
        }
    }
}

/// Nested mixed-model analysis of lymph-node position shifts
#[derive(Parser)]
#[command(name = "nodeshift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of worker threads (0 = all cores)
    #[arg(short = 'j', long, default_value_t = 0, global = true)]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the configured model plan and write tables, JSON and figures
    Run {
        /// Path to analysis configuration YAML (defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to the observation table (CSV or TSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the intercept-only variance decomposition as a Markdown table
    Variance {
        /// Path to the observation table (CSV or TSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Path to analysis configuration YAML for input and fit settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reference for the shifts
        #[arg(short, long, value_enum, default_value = "bony")]
        reference: CliReference,
    },

    /// Write a synthetic cohort with known variance components
    Simulate {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of subjects
        #[arg(long, default_value_t = 12)]
        subjects: usize,

        /// Subject-level SD (mm)
        #[arg(long, default_value_t = 2.0)]
        sd_subject: f64,

        /// Node-level SD (mm)
        #[arg(long, default_value_t = 1.0)]
        sd_node: f64,

        /// Residual SD (mm)
        #[arg(long, default_value_t = 1.5)]
        sd_residual: f64,

        /// Shift added during treatment (mm)
        #[arg(long, default_value_t = 0.0)]
        phase_effect: f64,

        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Write an example configuration file
    Example {
        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .ok();
    }

    let result = match cli.command {
        Commands::Run {
            config,
            data,
            output,
        } => cmd_run(config.as_deref(), &data, &output),

        Commands::Variance {
            data,
            config,
            reference,
        } => cmd_variance(&data, config.as_deref(), reference.into()),

        Commands::Simulate {
            output,
            subjects,
            sd_subject,
            sd_node,
            sd_residual,
            phase_effect,
            seed,
        } => {
            let config = SyntheticConfig::new("simulated")
                .with_dimensions(subjects, SyntheticConfig::default().nodes_per_location)
                .with_sds(sd_subject, sd_node, sd_residual)
                .with_phase_effect(phase_effect)
                .with_seed(seed);
            cmd_simulate(&config, &output)
        }

        Commands::Example { output } => cmd_example(output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => {
            eprintln!("Loading configuration from {:?}...", path);
            AnalysisConfig::from_path(path)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

/// Fit the full plan and write the report
fn cmd_run(config_path: Option<&Path>, data_path: &Path, output: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    eprintln!("Loading data...");
    let table = ObservationTable::from_path(data_path, &config.input)?;
    eprintln!(
        "Loaded {} observations of {} nodes in {} subjects",
        table.len(),
        table.n_nodes(),
        table.n_subjects()
    );

    eprintln!("Fitting {} models...", config.plan.len());
    let batch = run_analysis(&table, &config);

    eprintln!("Writing results to {:?}...", output);
    let written = write_report(&batch, &table, &config, output)?;

    eprint!("{}", BatchSummary::from_batch(&batch));
    eprintln!("Done! {} files written", written.len());
    Ok(())
}

/// Intercept-only decomposition for one reference, printed to stdout
fn cmd_variance(data_path: &Path, config_path: Option<&Path>, reference: Reference) -> Result<()> {
    let config = load_config(config_path)?;
    let table = ObservationTable::from_path(data_path, &config.input)?;
    let plan = ModelPlan::variance_only(reference);
    let batch = fit_batch(&table, &plan, &config.lmm);

    print!("{}", to_markdown(&variance_table(&batch), config.output.precision));
    if batch.n_fitted() < batch.len() {
        eprintln!(
            "{} of {} strata not fitted (see -v for details)",
            batch.len() - batch.n_fitted(),
            batch.len()
        );
    }
    Ok(())
}

fn cmd_simulate(config: &SyntheticConfig, output: &Path) -> Result<()> {
    let data = generate_synthetic(config)?;
    data.write_to_dir(output)?;
    eprintln!(
        "Wrote {} observations of {} nodes in {} subjects to {:?}",
        data.table.len(),
        data.table.n_nodes(),
        data.table.n_subjects(),
        output
    );
    eprintln!(
        "True SDs: subject {:.2}, node {:.2}, systematic {:.2}, random {:.2}",
        config.sd_subject,
        config.sd_node,
        config.systematic_sd(),
        config.sd_residual
    );
    Ok(())
}

fn cmd_example(output: Option<&Path>) -> Result<()> {
    let config = AnalysisConfig {
        name: "Lymph node shift analysis".to_string(),
        ..AnalysisConfig::default()
    };
    let yaml = config.to_yaml()?;
    match output {
        Some(path) => {
            std::fs::write(path, yaml)?;
            eprintln!("Example configuration written to {:?}", path);
        }
        None => print!("{}", yaml),
    }
    Ok(())
}
