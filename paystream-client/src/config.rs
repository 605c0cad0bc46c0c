use paystream_types::{EventFormat, OutputOptions};
use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const BASE_URL: &str = "PAYSTREAM_BASE_URL";
    pub const SCHEMA_PATH: &str = "PAYSTREAM_SCHEMA_PATH";
    pub const PRIVATE_KEY: &str = "PAYSTREAM_PRIVATE_KEY";
    pub const RENEW_METHOD: &str = "PAYSTREAM_RENEW_METHOD";
    pub const RENEW_BACKOFF_MS: &str = "PAYSTREAM_RENEW_BACKOFF_MS";
    pub const MAX_PAYMENT: &str = "PAYSTREAM_MAX_PAYMENT";
    // Watchlists (comma-separated)
    pub const ACCOUNTS: &str = "PAYSTREAM_ACCOUNTS";
    pub const PROGRAMS: &str = "PAYSTREAM_PROGRAMS";
    // Output options sent in setOptions
    pub const EVENT_FORMAT: &str = "PAYSTREAM_EVENT_FORMAT";
    pub const INCLUDE_ACCOUNTS: &str = "PAYSTREAM_INCLUDE_ACCOUNTS";
    pub const INCLUDE_TOKEN_BALANCE_CHANGES: &str = "PAYSTREAM_INCLUDE_TOKEN_BALANCE_CHANGES";
    pub const INCLUDE_LOGS: &str = "PAYSTREAM_INCLUDE_LOGS";
    pub const INCLUDE_INSTRUCTIONS: &str = "PAYSTREAM_INCLUDE_INSTRUCTIONS";
    pub const FILTER_TOKEN_BALANCES: &str = "PAYSTREAM_FILTER_TOKEN_BALANCES";
    // Client-side dispatch
    pub const OUTPUT_MODE: &str = "PAYSTREAM_OUTPUT_MODE";
    pub const LOG_LEVEL: &str = "PAYSTREAM_LOG_LEVEL";
}

/// Default values
pub mod defaults {
    pub const BASE_URL: &str = "http://localhost:8080";
    pub const RENEW_BACKOFF_MS: u64 = 1000;
    pub const LOG_LEVEL: &str = "info";
}

/// How an expiring token is renewed, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RenewalMethod {
    /// Paid POST to the renewal endpoint, new token pushed with `renew_token`
    Http,
    /// Challenge fetched over HTTP, payment delivered over the socket with `renew_inband`
    Inband,
}

/// How much of each event the dispatcher forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputMode {
    Full,
    Summary,
}

/// Accounts and programs to subscribe to. Entries are unique, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchlistConfig {
    pub accounts: Vec<String>,
    pub programs: Vec<String>,
}

impl WatchlistConfig {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.programs.is_empty()
    }
}

#[derive(Clone)]
pub struct Config {
    pub base_url: String,
    pub schema_path: String,
    pub private_key: String,
    pub renewal_method: RenewalMethod,
    pub renew_backoff: Duration,
    /// Largest raw-unit amount any single payment may carry
    pub max_payment: Option<u128>,
    pub watchlist: WatchlistConfig,
    pub output_options: OutputOptions,
    pub output_mode: OutputMode,
    pub log_level: log::LevelFilter,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("schema_path", &self.schema_path)
            .field("private_key", &"<redacted>")
            .field("renewal_method", &self.renewal_method)
            .field("renew_backoff", &self.renew_backoff)
            .field("max_payment", &self.max_payment)
            .field("watchlist", &self.watchlist)
            .field("output_options", &self.output_options)
            .field("output_mode", &self.output_mode)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // Key material is checked first so nothing else runs without it
        let private_key = get(env_vars::PRIVATE_KEY)
            .ok_or_else(|| format!("{} not set", env_vars::PRIVATE_KEY))?;

        let schema_path = get(env_vars::SCHEMA_PATH)
            .ok_or_else(|| format!("{} not set", env_vars::SCHEMA_PATH))?;
        let schema_path = if schema_path.starts_with('/') {
            schema_path
        } else {
            format!("/{}", schema_path)
        };

        let base_url = get(env_vars::BASE_URL)
            .unwrap_or_else(|| defaults::BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url)
            .map_err(|e| format!("Invalid {} '{}': {}", env_vars::BASE_URL, base_url, e))?;

        let renewal_method = match get(env_vars::RENEW_METHOD) {
            Some(v) => v.parse::<RenewalMethod>().map_err(|_| {
                format!(
                    "Unknown {} '{}'. Use 'http' or 'inband'.",
                    env_vars::RENEW_METHOD,
                    v
                )
            })?,
            None => RenewalMethod::Http,
        };

        let renew_backoff_ms = match get(env_vars::RENEW_BACKOFF_MS) {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| format!("Invalid {} '{}': {}", env_vars::RENEW_BACKOFF_MS, v, e))?,
            None => defaults::RENEW_BACKOFF_MS,
        };

        let max_payment = match get(env_vars::MAX_PAYMENT) {
            Some(v) => Some(
                v.parse::<u128>()
                    .map_err(|e| format!("Invalid {} '{}': {}", env_vars::MAX_PAYMENT, v, e))?,
            ),
            None => None,
        };

        let watchlist = WatchlistConfig {
            accounts: parse_list(get(env_vars::ACCOUNTS).as_deref()),
            programs: parse_list(get(env_vars::PROGRAMS).as_deref()),
        };

        let defaults = OutputOptions::default();
        let event_format = match get(env_vars::EVENT_FORMAT) {
            Some(v) => v.parse::<EventFormat>().map_err(|_| {
                format!(
                    "Unknown {} '{}'. Use 'raw' or 'enhanced'.",
                    env_vars::EVENT_FORMAT,
                    v
                )
            })?,
            None => defaults.event_format,
        };
        let flag = |key: &str, default: bool| -> Result<bool, String> {
            match get(key) {
                Some(v) => parse_bool(&v).ok_or_else(|| format!("Invalid boolean for {}: '{}'", key, v)),
                None => Ok(default),
            }
        };
        let output_options = OutputOptions {
            event_format,
            include_accounts: flag(env_vars::INCLUDE_ACCOUNTS, defaults.include_accounts)?,
            include_token_balance_changes: flag(
                env_vars::INCLUDE_TOKEN_BALANCE_CHANGES,
                defaults.include_token_balance_changes,
            )?,
            include_logs: flag(env_vars::INCLUDE_LOGS, defaults.include_logs)?,
            include_instructions: flag(env_vars::INCLUDE_INSTRUCTIONS, defaults.include_instructions)?,
            filter_token_balances: flag(
                env_vars::FILTER_TOKEN_BALANCES,
                defaults.filter_token_balances,
            )?,
        };

        let output_mode = match get(env_vars::OUTPUT_MODE) {
            Some(v) => v.parse::<OutputMode>().map_err(|_| {
                format!(
                    "Unknown {} '{}'. Use 'full' or 'summary'.",
                    env_vars::OUTPUT_MODE,
                    v
                )
            })?,
            None => OutputMode::Full,
        };

        let log_level = get(env_vars::LOG_LEVEL)
            .unwrap_or_else(|| defaults::LOG_LEVEL.to_string());
        let log_level = log_level
            .parse::<log::LevelFilter>()
            .map_err(|_| format!("Invalid {} '{}'", env_vars::LOG_LEVEL, log_level))?;

        Ok(Self {
            base_url,
            schema_path,
            private_key,
            renewal_method,
            renew_backoff: Duration::from_millis(renew_backoff_ms),
            max_payment,
            watchlist,
            output_options,
            output_mode,
            log_level,
        })
    }
}

/// Split a comma-separated list, dropping blanks and repeats.
fn parse_list(raw: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.unwrap_or("").split(',') {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Mask a secret-ish string for logs: first 4 and last 2 characters.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_missing_private_key_is_fatal() {
        let err = Config::from_lookup(lookup(&[(env_vars::SCHEMA_PATH, "/v1/schema/stream/tx")]))
            .unwrap_err();
        assert!(err.contains(env_vars::PRIVATE_KEY));
    }

    #[test]
    fn test_blank_private_key_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            (env_vars::PRIVATE_KEY, "  "),
            (env_vars::SCHEMA_PATH, "/v1/schema/stream/tx"),
        ]))
        .unwrap_err();
        assert!(err.contains(env_vars::PRIVATE_KEY));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            (env_vars::PRIVATE_KEY, KEY),
            (env_vars::SCHEMA_PATH, "v1/schema/stream/tx"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, defaults::BASE_URL);
        assert_eq!(config.schema_path, "/v1/schema/stream/tx");
        assert_eq!(config.renewal_method, RenewalMethod::Http);
        assert_eq!(config.renew_backoff, Duration::from_secs(1));
        assert_eq!(config.output_mode, OutputMode::Full);
        assert_eq!(config.output_options, OutputOptions::default());
        assert!(config.watchlist.is_empty());
        assert_eq!(config.log_level, log::LevelFilter::Info);
        assert!(config.max_payment.is_none());
    }

    #[test]
    fn test_full_configuration() {
        let config = Config::from_lookup(lookup(&[
            (env_vars::PRIVATE_KEY, KEY),
            (env_vars::SCHEMA_PATH, "/v1/schema/stream/tx"),
            (env_vars::BASE_URL, "https://stream.example.com/"),
            (env_vars::RENEW_METHOD, "InBand"),
            (env_vars::ACCOUNTS, "A, B,,A ,C"),
            (env_vars::PROGRAMS, "P1"),
            (env_vars::EVENT_FORMAT, "raw"),
            (env_vars::INCLUDE_LOGS, "yes"),
            (env_vars::INCLUDE_ACCOUNTS, "0"),
            (env_vars::OUTPUT_MODE, "summary"),
            (env_vars::RENEW_BACKOFF_MS, "250"),
            (env_vars::MAX_PAYMENT, "10000"),
            (env_vars::LOG_LEVEL, "debug"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://stream.example.com");
        assert_eq!(config.renewal_method, RenewalMethod::Inband);
        assert_eq!(config.watchlist.accounts, vec!["A", "B", "C"]);
        assert_eq!(config.watchlist.programs, vec!["P1"]);
        assert_eq!(config.output_options.event_format, EventFormat::Raw);
        assert!(config.output_options.include_logs);
        assert!(!config.output_options.include_accounts);
        assert_eq!(config.output_mode, OutputMode::Summary);
        assert_eq!(config.renew_backoff, Duration::from_millis(250));
        assert_eq!(config.max_payment, Some(10_000));
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = [
            (env_vars::PRIVATE_KEY, KEY),
            (env_vars::SCHEMA_PATH, "/v1/schema/stream/tx"),
        ];
        for (key, value) in [
            (env_vars::RENEW_METHOD, "websocket"),
            (env_vars::EVENT_FORMAT, "json"),
            (env_vars::INCLUDE_LOGS, "maybe"),
            (env_vars::OUTPUT_MODE, "verbose"),
            (env_vars::RENEW_BACKOFF_MS, "-1"),
            (env_vars::BASE_URL, "not a url"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            assert!(
                Config::from_lookup(lookup(&pairs)).is_err(),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::from_lookup(lookup(&[
            (env_vars::PRIVATE_KEY, KEY),
            (env_vars::SCHEMA_PATH, "/v1/schema/stream/tx"),
        ]))
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(&KEY[2..]));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc123"), "***");
        assert_eq!(mask("abcdef123456"), "abcd…56");
    }
}
