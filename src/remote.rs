//! The remote WebDAV endpoint: URL layout and a credential check.

use std::thread;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;

use crate::config::RetrySettings;
use crate::error::MountError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    base_url: String,
}

impl RemoteEndpoint {
    pub fn new(base_url: &str) -> Result<Self, MountError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
            return Err(MountError::Config(format!(
                "base_url must start with http:// or https://, got '{base_url}'"
            )));
        }
        Ok(Self {
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/remote.php/dav/files/{user}/`
    pub fn user_url(&self, username: &str) -> String {
        format!("{}/remote.php/dav/files/{username}/", self.base_url)
    }
}

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// How long to back off before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// HTTP 429: doubling delay plus jitter.
    RateLimited,
    /// 502/503/504 and network errors: gentler 1.5x growth.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    InvalidCredentials(u16),
    Retry(Backoff),
    Unexpected(u16),
}

pub fn classify_status(code: u16) -> CheckStatus {
    match code {
        200 | 207 => CheckStatus::Ok,
        401 | 403 => CheckStatus::InvalidCredentials(code),
        429 => CheckStatus::Retry(Backoff::RateLimited),
        502..=504 => CheckStatus::Retry(Backoff::Unavailable),
        other => CheckStatus::Unexpected(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: s.base_delay,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). `jitter` is a fraction
    /// added on top for rate limiting; callers draw it from 0.1..0.3.
    /// Never exceeds `MAX_RETRY_DELAY`.
    pub fn delay_for(&self, backoff: Backoff, attempt: u32, jitter: f64) -> Duration {
        let factor = match backoff {
            Backoff::RateLimited => 2f64.powf(f64::from(attempt)) * (1.0 + jitter),
            Backoff::Unavailable => 1.5f64.powf(f64::from(attempt)),
        };
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }
}

/// Result of one request: an HTTP status, or a transport failure.
pub type Attempt = Result<u16, String>;

/// Drive `send` until it yields a definite answer or retries run out.
pub fn verify_with(
    policy: RetryPolicy,
    username: &str,
    mut send: impl FnMut() -> Attempt,
    mut sleep: impl FnMut(Duration),
) -> Result<(), MountError> {
    let mut last = String::new();
    for attempt in 0..=policy.max_retries {
        let backoff = match send() {
            Ok(code) => match classify_status(code) {
                CheckStatus::Ok => return Ok(()),
                CheckStatus::InvalidCredentials(status) => {
                    return Err(MountError::InvalidCredentials {
                        user: username.to_string(),
                        status,
                    });
                }
                CheckStatus::Unexpected(status) => {
                    return Err(MountError::Transient(format!(
                        "Unexpected HTTP {status} from the WebDAV endpoint"
                    )));
                }
                CheckStatus::Retry(backoff) => {
                    last = format!("HTTP {code}");
                    backoff
                }
            },
            Err(e) => {
                last = e;
                Backoff::Unavailable
            }
        };
        if attempt < policy.max_retries {
            let jitter = rand::rng().random_range(0.1..0.3);
            let delay = policy.delay_for(backoff, attempt, jitter);
            tracing::warn!(attempt = attempt + 1, ?delay, reason = %last, "credential check will retry");
            sleep(delay);
        }
    }
    Err(MountError::Transient(format!(
        "Gave up after {} attempts: {last}",
        policy.max_retries + 1
    )))
}

/// Confirms that a username/password pair is accepted by the remote.
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<(), MountError>;
}

/// Depth-0 PROPFIND against the user's WebDAV root.
pub struct WebDavProbe {
    endpoint: RemoteEndpoint,
    policy: RetryPolicy,
    agent: ureq::Agent,
}

impl WebDavProbe {
    pub fn new(endpoint: RemoteEndpoint, policy: RetryPolicy, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build();
        Self {
            endpoint,
            policy,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn send(&self, url: &str, auth: &str) -> Attempt {
        let request = ureq::http::Request::builder()
            .method("PROPFIND")
            .uri(url)
            .header("Depth", "0")
            .header("Authorization", auth)
            .body(())
            .map_err(|e| format!("Invalid request for {url}: {e}"))?;
        match self.agent.run(request) {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl CredentialCheck for WebDavProbe {
    fn verify(&self, username: &str, password: &str) -> Result<(), MountError> {
        let url = self.endpoint.user_url(username);
        let auth = format!("Basic {}", BASE64.encode(format!("{username}:{password}")));
        tracing::debug!(%url, "PROPFIND");
        verify_with(self.policy, username, || self.send(&url, &auth), thread::sleep)
    }
}
