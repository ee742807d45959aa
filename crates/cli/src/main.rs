use clap::Parser;
use config::Config;
use hookprobe::cli::{Cli, Command};
use hookprobe::{Error, commands};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::debug;
use tracing_log::AsTrace;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    debug!(config = ?cli);

    let config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    let mut out = std::io::stdout().lock();
    match cli.command {
        Command::Locate { pid, module } => commands::locate(&config, pid, module, &mut out),
        Command::Wait { pid, module } => commands::wait(&config, pid, module, &mut out).await,
        Command::Read {
            pid,
            address,
            length,
        } => commands::read(&config, pid, address, length, &mut out),
        Command::Config => commands::show_config(&config, &mut out),
    }
}

/// Level from `-v`/`-q`, overridable through `RUST_LOG`.
fn init_logging(cli: &Cli) -> Result<(), Error> {
    let level = cli.verbosity.log_level_filter().as_trace();
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (writer, ansi) = match &cli.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| Error::LogFile {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    Ok(())
}
