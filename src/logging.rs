//! Stderr logging. Stdout is reserved for the startup banner and the
//! shutdown notice.

use crate::cli::{Cli, LogFormat};
use std::io::Write;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A writer that wraps stderr and flushes after each write.
/// This ensures log lines are immediately visible when stderr is piped.
struct FlushingStderr;

impl Write for FlushingStderr {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let n = handle.write(buf)?;
        handle.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `--log-level`.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(cli: &Cli) {
    let filter = env_filter(&cli.log_level);
    let use_color = cli.color.should_enable();

    match cli.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(true)
                        .with_writer(|| FlushingStderr),
                )
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_ansi(use_color)
                        .with_target(false)
                        .with_writer(|| FlushingStderr),
                )
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_ansi(use_color)
                        .with_target(false)
                        .with_writer(|| FlushingStderr),
                )
                .init();
        }
    }
}
