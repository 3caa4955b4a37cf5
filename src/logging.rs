use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Reads `REHBER_LOG` for filter directives, falling back to `rehberd=info`.
/// `REHBER_LOG_FORMAT=json` switches to JSON lines. Output goes to stderr;
/// stdout carries the request/response protocol.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("REHBER_LOG").unwrap_or_else(|_| EnvFilter::new("rehberd=info"));
        let json = std::env::var("REHBER_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        }
    });
}
