//! Client configuration.
//!
//! Settings come from an optional JSON file and are completed from the
//! environment. Environment values only fill fields the file left unset; a
//! missing or empty variable never fails construction.

use std::path::Path;

use avatar_protocol::StartConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::HttpTokenSource;

/// Token endpoint URL.
pub const ENV_TOKEN_URL: &str = "AVATAR_TOKEN_URL";
/// Base URL of the streaming service API.
pub const ENV_BASE_API_URL: &str = "AVATAR_BASE_API_URL";
/// Knowledge base used when the start configuration names none.
pub const ENV_KNOWLEDGE_BASE_ID: &str = "AVATAR_KNOWLEDGE_BASE_ID";

/// Avatar started when the configuration names none.
pub const DEFAULT_AVATAR_NAME: &str = "Ann_Therapist_public";

/// Greeting spoken when the configuration names none.
pub const DEFAULT_PREAMBLE: &str = "Hello! I'm ready — how can I help you today?";

/// Everything needed to build an orchestrator against a real service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base_path: Option<String>,
	#[serde(default = "default_start")]
	pub start: StartConfig,
	/// Greeting spoken once the stream is ready. An empty string disables it.
	#[serde(default = "default_preamble", skip_serializing_if = "Option::is_none")]
	pub preamble: Option<String>,
}

fn default_start() -> StartConfig {
	StartConfig::new(DEFAULT_AVATAR_NAME)
}

fn default_preamble() -> Option<String> {
	Some(DEFAULT_PREAMBLE.to_string())
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			token_url: None,
			base_path: None,
			start: default_start(),
			preamble: default_preamble(),
		}
	}
}

impl ClientConfig {
	pub fn from_json(raw: &str) -> Result<Self> {
		serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))
	}

	/// Reads a JSON configuration file.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
		Self::from_json(&raw)
	}

	/// Fills unset fields from the process environment.
	pub fn apply_env(self) -> Self {
		self.apply_vars(|name| std::env::var(name).ok())
	}

	/// Fills unset fields from `lookup`, which maps variable names to values.
	pub fn apply_vars<F>(mut self, lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String>,
	{
		let lookup = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

		if self.token_url.is_none() {
			self.token_url = lookup(ENV_TOKEN_URL);
		}
		if self.base_path.is_none() {
			self.base_path = lookup(ENV_BASE_API_URL);
		}
		if self.start.knowledge_id.is_none() {
			self.start.knowledge_id = lookup(ENV_KNOWLEDGE_BASE_ID);
		}
		self
	}

	/// The greeting to speak, if any.
	pub fn greeting(&self) -> Option<&str> {
		self.preamble.as_deref().map(str::trim).filter(|text| !text.is_empty())
	}

	/// Token source for the configured endpoint.
	pub fn token_source(&self) -> Result<HttpTokenSource> {
		let url = self
			.token_url
			.as_deref()
			.ok_or_else(|| Error::Config(format!("no token url configured; set {ENV_TOKEN_URL}")))?;
		HttpTokenSource::parse(url)
	}
}
