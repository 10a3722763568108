use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Phantasm Developers",
    version,
    about = "Phantasm CLI - Generate synthetic cryo-EM image stacks and projected potentials from atomic models.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads used for atom selection inside each frame.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate the exit-wave image of every frame into a single MRC stack.
    ExitWave(SimulateArgs),
    /// Compute the projected potential of every frame, one MRC volume per frame.
    Potential(SimulateArgs),
}

/// Arguments shared by the simulation subcommands.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    // --- Core Arguments ---
    /// Path to the sample atoms in CSV format (element,x,y,z[,sigma,occupancy]).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub sample: PathBuf,

    /// Output path: the MRC stack for `exit-wave`, a directory for `potential`.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Path to the simulation configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    // --- Execution Overrides ---
    /// Override the compute device ('cpu' or 'gpu').
    #[arg(short, long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Run frames on a pool of at most this many workers.
    #[arg(short = 'w', long, value_name = "INT")]
    pub max_workers: Option<usize>,

    /// Override the base seed of the per-frame noise generators.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Jitter every atom by its thermal displacement before simulating.
    #[arg(long)]
    pub thermal_jitter: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S simulation.margin=8
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
