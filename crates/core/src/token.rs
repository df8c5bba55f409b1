//! Access-token acquisition.
//!
//! The session service authenticates each session with a short-lived bearer
//! token. The token endpoint is a POST with an empty body that answers with
//! the raw token as text.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of bearer tokens for new sessions.
#[async_trait]
pub trait TokenSource: Send + Sync {
	/// Fetches a fresh, non-empty token. Failures are [`Error::Auth`].
	async fn fetch(&self) -> Result<String>;
}

/// Fetches tokens from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
	client: reqwest::Client,
	url: Url,
}

impl HttpTokenSource {
	pub fn new(url: Url) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(TOKEN_TIMEOUT)
			.build()
			.map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
		Ok(Self { client, url })
	}

	/// Parses `url` and builds a source for it.
	pub fn parse(url: &str) -> Result<Self> {
		let url = Url::parse(url).map_err(|e| Error::Config(format!("invalid token url {url:?}: {e}")))?;
		Self::new(url)
	}

	/// Uses a caller-provided client, e.g. with custom TLS or proxies.
	pub fn with_client(mut self, client: reqwest::Client) -> Self {
		self.client = client;
		self
	}

	pub fn url(&self) -> &Url {
		&self.url
	}
}

#[async_trait]
impl TokenSource for HttpTokenSource {
	async fn fetch(&self) -> Result<String> {
		debug!(target = "avatar.token", url = %self.url, "requesting access token");
		let response = self
			.client
			.post(self.url.clone())
			.send()
			.await
			.map_err(|e| Error::Auth(format!("token endpoint unreachable: {e}")))?;

		let status = response.status();
		if !status.is_success() {
			return Err(Error::Auth(format!("token endpoint returned {status}")));
		}

		let body = response
			.text()
			.await
			.map_err(|e| Error::Auth(format!("failed to read token response: {e}")))?;
		let token = body.trim();
		if token.is_empty() {
			return Err(Error::Auth("token endpoint returned an empty token".to_string()));
		}

		debug!(target = "avatar.token", len = token.len(), "access token received");
		Ok(token.to_string())
	}
}
