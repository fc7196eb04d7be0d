use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pipeline::Pacing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Sqlite,
    Jsonl,
}

/// Run settings: defaults, then `avito.{toml,yaml,json}`, then `AVITO_*` env.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub region: String,
    pub category: String,
    pub radius: u32,
    pub pages: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub card_delay_ms: u64,
    pub specs_delay_ms: u64,
    pub page_delay_ms: u64,
    pub page_workers: usize,
    pub output: PathBuf,
    pub sink: SinkKind,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://www.avito.ru".into(),
            region: "perm".into(),
            category: "avtomobili".into(),
            radius: 200,
            pages: 1,
            request_timeout_secs: 10,
            max_retries: 2,
            retry_backoff_ms: 2000,
            card_delay_ms: 4000,
            specs_delay_ms: 2000,
            page_delay_ms: 10_000,
            page_workers: 1,
            output: PathBuf::from("data/avito_cars.sqlite"),
            sink: SinkKind::Sqlite,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name("avito").required(false))
            .add_source(config::Environment::with_prefix("AVITO").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to load settings")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            card_delay: Duration::from_millis(self.card_delay_ms),
            specs_delay: Duration::from_millis(self.specs_delay_ms),
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pacing_and_timeouts() {
        let s = Settings::default();
        let p = s.pacing();
        assert_eq!(p.card_delay, Duration::from_secs(4));
        assert_eq!(p.specs_delay, Duration::from_secs(2));
        assert!(p.page_delay > p.card_delay);
        assert_eq!(s.request_timeout(), Duration::from_secs(10));
        assert_eq!(s.sink, SinkKind::Sqlite);
    }

    #[test]
    fn partial_source_keeps_defaults() {
        let s: Settings = config::Config::builder()
            .set_override("region", "ekaterinburg")
            .unwrap()
            .set_override("page_workers", 3)
            .unwrap()
            .set_override("sink", "jsonl")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.region, "ekaterinburg");
        assert_eq!(s.page_workers, 3);
        assert_eq!(s.sink, SinkKind::Jsonl);
        assert_eq!(s.radius, 200);
    }
}
