//! Parsing helpers for `--engine` and `--connect KEY=VALUE` flags.

use super::{ConnectOptions, Engine};

#[cfg(any(test, feature = "transport-mock"))]
const ENGINES: &[&str] = &["amqp", "mock"];
#[cfg(not(any(test, feature = "transport-mock")))]
const ENGINES: &[&str] = &["amqp"];

/// Engine names accepted by [`parse_engine`] in this build. `mock` is only
/// compiled in with the `transport-mock` feature.
pub fn available_engines() -> &'static [&'static str] {
    ENGINES
}

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.trim().to_ascii_lowercase().as_str() {
        "amqp" | "rabbitmq" | "amqp-0-9" => Some(Engine::Amqp),
        #[cfg(any(test, feature = "transport-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

/// Collect `KEY=VALUE` pairs into connect params. Entries without `=` are
/// ignored; later keys override earlier ones.
pub fn parse_connect_kv(items: &[String]) -> ConnectOptions {
    let mut opts = ConnectOptions::default();
    for item in items {
        if let Some((k, v)) = item.split_once('=') {
            let key = k.trim();
            if key.is_empty() {
                continue;
            }
            opts.params.insert(key.to_string(), v.trim().to_string());
        }
    }
    opts
}
