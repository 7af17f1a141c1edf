//! Tracing setup for terminal and log-file output.

use anyhow::Context as _;
use std::path::Path;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const MAX_MESSAGE_CHARS: usize = 280;

fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

fn write_field(
    writer: &mut format::Writer<'_>,
    field: &tracing::field::Field,
    value: &dyn std::fmt::Debug,
) -> std::fmt::Result {
    let field_name = field.name();

    if field_name == "message" {
        let formatted = format!("{value:?}");
        let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
        if was_truncated {
            write!(writer, "{field_name}={truncated}...")
        } else {
            write!(writer, "{field_name}={formatted}")
        }
    } else {
        write!(writer, "{field_name}={value:?}")
    }
}

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// With a log directory, output goes to a daily-rotated `replybot.log` there
/// instead of the terminal.
pub fn init_tracing(debug: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = build_env_filter(debug);

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

            let file_appender = tracing_appender::rolling::daily(log_dir, "replybot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // The writer must outlive every log call; the process owns it until exit.
            std::mem::forget(guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .fmt_fields(format::debug_fn(write_field))
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .fmt_fields(format::debug_fn(write_field))
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        let (truncated, was_truncated) = truncate_for_log("héllo wörld", 4);
        assert_eq!(truncated, "héll");
        assert!(was_truncated);

        let (whole, was_truncated) = truncate_for_log("short", 280);
        assert_eq!(whole, "short");
        assert!(!was_truncated);
    }
}
