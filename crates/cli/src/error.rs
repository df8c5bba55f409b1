use std::io;

use thiserror::Error;

use crate::output::ErrorCode;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Session(#[from] avatar::Error),

	#[error("io error: {0}")]
	Io(#[from] io::Error),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid input: {0}")]
	InvalidInput(String),
}

impl CliError {
	/// Code reported in the failure envelope.
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Session(avatar::Error::Auth(_)) => ErrorCode::AuthError,
			CliError::Session(avatar::Error::Config(_)) | CliError::InvalidInput(_) => ErrorCode::InvalidInput,
			CliError::Session(_) => ErrorCode::SessionError,
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) => ErrorCode::InternalError,
		}
	}
}

pub type Result<T> = std::result::Result<T, CliError>;
