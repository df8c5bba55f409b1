use avatar::{ClientConfig, HttpTokenSource, TokenSource};
use serde::Serialize;
use tracing::info;

use crate::error::{CliError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
	pub url: String,
	pub token: String,
	pub length: usize,
}

/// Fetches a token from `url`, or from the configured endpoint.
pub async fn fetch(config: &ClientConfig, url: Option<&str>) -> Result<TokenReport> {
	let source = match url {
		Some(url) => HttpTokenSource::parse(url).map_err(|err| CliError::InvalidInput(format!("--url: {err}")))?,
		None => config.token_source()?,
	};
	let token = source.fetch().await?;
	info!(target = "avatar.cli", url = %source.url(), len = token.len(), "token fetched");
	Ok(TokenReport {
		url: source.url().to_string(),
		length: token.len(),
		token,
	})
}
