use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use atomail::config::{CliArgs, Settings, load_file_config};
use atomail::feed::datetime::now_local;
use atomail::logging::{self, LogOptions};
use atomail::source;
use atomail::sync::{EntryOptions, FeedSync};

#[derive(Parser)]
#[command(name = "atomail", version)]
#[command(about = "Convert mail into an Atom feed", long_about = None)]
struct Cli {
    /// TOML file with default settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    log: LogOptions,

    #[command(flatten)]
    args: CliArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log)?;

    // Configuration problems stop the run before the feed file is touched.
    let file_config = load_file_config(cli.config.as_deref())?;
    let settings = Settings::resolve(cli.args, file_config)?;
    if settings.uri_defaulted {
        warn!("Feed URI missing. Using default URI {}.", settings.uri);
    }

    let mut source = source::open(&settings.source)?;

    let sync = FeedSync {
        feed_path: settings.feed_path,
        uri: settings.uri,
        title: settings.title,
        retention: settings.retention,
        entry: EntryOptions {
            strip_subject: settings.strip_subject,
            charset: settings.charset,
            prefer: settings.prefer,
        },
    };
    let report = sync.run(source.as_mut(), now_local())?;
    info!(
        "Added {} messages ({} skipped), feed now has {} entries",
        report.added, report.skipped, report.entries
    );
    Ok(())
}
