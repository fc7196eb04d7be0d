use std::time::Duration;

use async_trait::async_trait;
use rand::{rng, Rng};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::settings::Settings;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 Edg/124.0",
];

/// Fetches raw markup for one URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Opens a fresh fetcher for each listing page. Dropping the fetcher ends
/// the session.
pub trait SessionFactory: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn PageFetcher>, FetchError>;
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS[rng().random_range(0..USER_AGENTS.len())]
}

/// Builds reqwest-backed sessions.
#[derive(Debug, Clone)]
pub struct HttpSessions {
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl HttpSessions {
    pub fn new(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        HttpSessions {
            timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.request_timeout(),
            settings.max_retries,
            settings.retry_backoff(),
        )
    }
}

impl SessionFactory for HttpSessions {
    fn open_session(&self) -> Result<Box<dyn PageFetcher>, FetchError> {
        let user_agent = random_user_agent();

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        debug!("Opened session as {}", user_agent);
        Ok(Box::new(HttpSession {
            client,
            max_retries: self.max_retries,
            backoff: self.backoff,
        }))
    }
}

/// One client (cookies + user agent) shared by every request on a page.
pub struct HttpSession {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpSession {
    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PageFetcher for HttpSession {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff_delay(self.backoff, attempt);
                    attempt += 1;
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        e,
                        url,
                        attempt,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }
}

/// `base * 2^attempt`, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_comes_from_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(16));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn sessions_open_without_network() {
        let sessions = HttpSessions::new(Duration::from_secs(1), 0, Duration::ZERO);
        assert!(sessions.open_session().is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_or_timeout() {
        let sessions = HttpSessions::new(Duration::from_secs(2), 0, Duration::ZERO);
        let session = sessions.open_session().unwrap();
        let err = session.fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout));
    }
}
