//! Engine and connect-option parsing for the CLI.

use std::collections::BTreeMap;

use super::{ConnectOptions, Engine};

/// Parse an engine name as given on the command line.
pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.trim().to_ascii_lowercase().as_str() {
        "nats" => Some(Engine::Nats),
        "mqtt" => Some(Engine::Mqtt),
        #[cfg(any(test, feature = "transport-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

/// Parse repeatable `KEY=VALUE` connect options. Entries without `=` are
/// ignored; later duplicates win.
pub fn parse_connect_kv(pairs: &[String]) -> ConnectOptions {
    let mut params = BTreeMap::new();
    for pair in pairs {
        if let Some((key, value)) = pair.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                params.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    ConnectOptions {
        params,
        retry_enabled: false,
        retry_count: 3,
        retry_delay_ms: 1000,
        retry_max_delay_ms: 30000,
    }
}
