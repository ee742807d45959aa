use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// Hookprobe: wait for a native module to load and watch calls into it
///
/// Hookprobe locates shared objects in a running process, waits for them
/// to be loaded and captures the arguments of calls at a fixed offset.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// Without it, built-in defaults and `HOOKPROBE_*` variables are used.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Path to log file.
    ///
    /// Logs go to stderr when not given.
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print where a module and the probe address are in a process.
    Locate {
        #[arg(short, long)]
        pid: i32,

        /// Module to look for. Defaults to the configured target.
        module: Option<String>,
    },

    /// Poll a process until a module is loaded.
    ///
    /// Stops on Ctrl-C or SIGTERM.
    Wait {
        #[arg(short, long)]
        pid: i32,

        /// Module to wait for. Defaults to the configured target.
        module: Option<String>,
    },

    /// Read memory of a process and print it as hex.
    Read {
        #[arg(short, long)]
        pid: i32,

        /// Start address, in hex (`0x...`) or decimal.
        #[arg(short, long, value_parser = parse_address)]
        address: usize,

        /// Number of bytes to read.
        #[arg(short = 'n', long)]
        length: usize,
    },

    /// Print the effective configuration.
    Config,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Parse a `0x`-prefixed hex or a decimal address.
pub fn parse_address(address: &str) -> Result<usize, String> {
    let parsed = match address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => address.parse(),
    };
    parsed.map_err(|_| format!("`{address}` is not a valid address"))
}
