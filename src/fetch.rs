//! HTTP page fetching with retry and pacing.

use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cli::BackoffKind;

pub const DEFAULT_BASE_URL: &str = "https://www.royalroad.com";

/// Header set sent with every request so the site serves its normal pages.
pub const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("upgrade-insecure-requests", "1"),
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Body { source, .. } => source.is_timeout(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt`
    Linear { step: Duration },
    /// `base * 2^(attempt - 1)`
    Exponential { base: Duration },
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear {
                step: Duration::from_secs(10),
            },
            retryable: FetchError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && (self.retryable)(&err) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "transient fetch failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Random sleep between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub const NONE: Pacing = Pacing {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Self {
            min: Duration::from_millis(lo),
            max: Duration::from_millis(hi),
        }
    }

    pub fn sample(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        if hi <= lo {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if delay.is_zero() {
            return;
        }
        tracing::trace!(delay_ms = delay.as_millis() as u64, "pacing");
        tokio::time::sleep(delay).await;
    }
}

/// Anything that can hand back the body of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for &(name, value) in BROWSER_HEADERS {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self { client, policy })
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Body {
            url: url.to_owned(),
            source,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!(url, "fetching");
        self.policy.run(url, |_| self.get_once(url)).await
    }
}

impl crate::cli::FetchArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        let step = Duration::from_millis(self.retry_step_ms);
        let backoff = match self.backoff {
            BackoffKind::Linear => Backoff::Linear { step },
            BackoffKind::Exponential => Backoff::Exponential { base: step },
        };
        RetryPolicy {
            max_attempts: self.attempts,
            backoff,
            ..RetryPolicy::default()
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::from_millis(self.pace_min_ms, self.pace_max_ms)
    }

    pub fn fetcher(&self) -> anyhow::Result<HttpFetcher> {
        HttpFetcher::new(Duration::from_secs(self.timeout_secs), self.retry_policy())
    }

    pub fn url(&self, path: &str) -> anyhow::Result<url::Url> {
        site_url(&self.base_url, path)
    }
}

/// Joins `path` onto the site root, tolerating trailing slashes on either side.
pub fn site_url(base: &str, path: &str) -> anyhow::Result<url::Url> {
    let mut base = url::Url::parse(base).with_context(|| format!("parse base url: {base}"))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(path.trim_start_matches('/'))
        .with_context(|| format!("join {path} onto {base}"))
}
