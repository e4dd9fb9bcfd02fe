// Commandline argument parser using clap for earlink

use clap::Parser;
use std::path::PathBuf;

/// Arguments for the operator CLI.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct LinkArgs {
    /// Serial port path of the chip; when omitted, available ports are
    /// listed and one can be chosen interactively
    #[arg(short = 'p', long = "port")]
    pub port: Option<PathBuf>,

    /// Number of physical channels the chip streams
    #[arg(short = 'c', long = "channels", default_value_t = 8)]
    pub num_channels: usize,

    /// Initial sliding-window length, in packets, for every pipeline
    #[arg(short = 'w', long = "window", default_value_t = 100)]
    pub window: usize,

    /// Directory where session CSV files are written
    #[arg(short = 'd', long = "data-dir", default_value = "data")]
    pub data_dir: PathBuf,

    /// Basename for session CSV files; rotated to <basename>-<n>.csv
    #[arg(short = 'o', long = "out", default_value = "session")]
    pub basename: String,

    /// File of commands to send automatically once connected, one per
    /// line; skipped when absent
    #[arg(long = "startup")]
    pub startup_commands: Option<PathBuf>,

    /// Plot layout config, regenerated automatically when deleted
    #[arg(long = "layout", default_value = "layout.csv")]
    pub layout_config: PathBuf,

    /// File register dumps are appended to
    #[arg(long = "regdump", default_value = "regdump.txt")]
    pub reg_dump: PathBuf,
}
