use clap::ValueEnum;
use tracing::Level;

/// Log line format on stderr.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Install the global subscriber. JSON lines carry thread ids so output from
/// the per-stream reader tasks can be told apart.
pub fn init_logging(format: LogFormat, level: Level) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_ansi(false);

    let installed = match format {
        LogFormat::Text => builder.compact().try_init(),
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_thread_ids(true)
            .try_init(),
    };
    if let Err(err) = installed {
        eprintln!("logging already initialized: {err}");
    }
}
