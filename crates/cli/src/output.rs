//! Result envelope printed by every command.

use std::fmt;
use std::io::{self, Write};
use std::time::Instant;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// JSON envelope
	#[default]
	Json,
	/// Human-readable text
	Text,
}

impl fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Text => write!(f, "text"),
		}
	}
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	InvalidInput,
	AuthError,
	SessionError,
	IoError,
	InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
}

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			ok: self.error.is_none(),
			command: self.command,
			data: self.data,
			error: self.error,
			duration_ms: Some(self.start_time.elapsed().as_millis() as u64),
		}
	}
}

/// Writes `result` to stdout in `format`.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) -> io::Result<()> {
	let stdout = io::stdout();
	let mut out = stdout.lock();
	write_result(&mut out, result, format)
}

pub fn write_result<T: Serialize>(out: &mut impl Write, result: &CommandResult<T>, format: OutputFormat) -> io::Result<()> {
	match format {
		OutputFormat::Json => {
			serde_json::to_writer_pretty(&mut *out, result)?;
			writeln!(out)
		}
		OutputFormat::Text => {
			if let Some(err) = &result.error {
				return writeln!(out, "{}: error [{:?}]: {}", result.command, err.code, err.message);
			}
			match &result.data {
				Some(data) => {
					let value = serde_json::to_value(data)?;
					write_text(out, &value, 0)
				}
				None => writeln!(out, "{}: ok", result.command),
			}
		}
	}
}

fn write_text(out: &mut impl Write, value: &serde_json::Value, depth: usize) -> io::Result<()> {
	let indent = "  ".repeat(depth);
	match value {
		serde_json::Value::Object(map) => {
			for (key, value) in map {
				if value.is_object() || value.is_array() {
					writeln!(out, "{indent}{key}:")?;
					write_text(out, value, depth + 1)?;
				} else {
					writeln!(out, "{indent}{key}: {}", scalar(value))?;
				}
			}
			Ok(())
		}
		serde_json::Value::Array(items) => {
			for item in items {
				if item.is_object() || item.is_array() {
					writeln!(out, "{indent}-")?;
					write_text(out, item, depth + 1)?;
				} else {
					writeln!(out, "{indent}- {}", scalar(item))?;
				}
			}
			Ok(())
		}
		other => writeln!(out, "{indent}{}", scalar(other)),
	}
}

fn scalar(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}
