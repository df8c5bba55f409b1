//! Connection quality reported by the remote session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Displayable connection quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionQuality {
	#[default]
	Unknown,
	Good,
	Bad,
}

impl ConnectionQuality {
	/// Maps a `connection-quality-changed` payload. Unrecognized values are `Unknown`.
	pub fn from_wire(value: &str) -> Self {
		match value.trim().to_ascii_uppercase().as_str() {
			"GOOD" => ConnectionQuality::Good,
			"BAD" => ConnectionQuality::Bad,
			_ => ConnectionQuality::Unknown,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionQuality::Unknown => "UNKNOWN",
			ConnectionQuality::Good => "GOOD",
			ConnectionQuality::Bad => "BAD",
		}
	}
}

impl fmt::Display for ConnectionQuality {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
