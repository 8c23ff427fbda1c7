use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client};
use url::Url;

use crate::app::{RelayError, Result};
use crate::fetcher::{FetchResponse, Fetcher};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("orgrelay/", env!("CARGO_PKG_VERSION"));

/// reqwest-based fetcher that follows redirects itself so the chain is known.
pub struct HttpFetcher {
    client: Client,
    max_redirects: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_options(
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_MAX_REDIRECTS,
            DEFAULT_USER_AGENT,
        )
    }

    pub fn with_options(timeout: Duration, max_redirects: usize, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .redirect(redirect::Policy::none())
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            max_redirects,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let mut current = Url::parse(url)?;
        let mut chain = Vec::new();

        loop {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| map_transport_error(url, e))?;

            let status = response.status();
            if status.is_redirection() {
                if let Some(next) = redirect_target(&current, response.headers().get(LOCATION)) {
                    if chain.len() >= self.max_redirects {
                        return Err(RelayError::TooManyRedirects(url.to_string()));
                    }
                    tracing::debug!("{} redirected to {}", current, next);
                    chain.push(current.to_string());
                    current = next;
                    continue;
                }
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| map_transport_error(url, e))?
                .to_vec();

            return Ok(FetchResponse {
                status: status.as_u16(),
                body,
                final_url: current.to_string(),
                redirect_chain: chain,
            });
        }
    }
}

fn redirect_target(base: &Url, location: Option<&reqwest::header::HeaderValue>) -> Option<Url> {
    let location = location?.to_str().ok()?;
    base.join(location).ok()
}

fn map_transport_error(url: &str, e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Timeout(url.to_string())
    } else {
        RelayError::Http(e)
    }
}
