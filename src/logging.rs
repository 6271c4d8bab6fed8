use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, clap::Args)]
pub struct LogOptions {
    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Log progress information
    #[arg(short, long)]
    pub verbose: bool,

    /// Log debugging information
    #[arg(short, long)]
    pub debug: bool,

    /// Send the log to a file instead of stderr
    #[arg(short = 'l', long, value_name = "FILE")]
    pub logfile: Option<PathBuf>,
}

impl LogOptions {
    pub fn level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else if self.verbose {
            LevelFilter::Info
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Warn
        }
    }
}

/// Install the process logger: `LEVEL: message` lines at the requested
/// level, to stderr or the log file. `RUST_LOG` can still refine it.
pub fn init(opts: &LogOptions) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(opts.level())
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()));

    if let Some(path) = &opts.logfile {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}
