use avatar::ClientConfig;
use avatar::config::{ENV_BASE_API_URL, ENV_KNOWLEDGE_BASE_ID, ENV_TOKEN_URL};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
	#[serde(flatten)]
	pub config: ClientConfig,
	/// Environment variables consulted for unset fields.
	pub env: [&'static str; 3],
}

pub fn show(config: &ClientConfig) -> ConfigReport {
	ConfigReport {
		config: config.clone(),
		env: [ENV_TOKEN_URL, ENV_BASE_API_URL, ENV_KNOWLEDGE_BASE_ID],
	}
}
