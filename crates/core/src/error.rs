//! Error types for session orchestration.

use std::fmt;

use thiserror::Error;

/// A lifecycle transition that may be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// Token exchange, handle creation or negotiation.
	Start,
	/// Release of a handle taken out of the store.
	Stop,
	/// Opening or closing the voice-chat sub-channel.
	VoiceChat,
}

impl fmt::Display for Transition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Transition::Start => "start",
			Transition::Stop => "stop",
			Transition::VoiceChat => "voice-chat",
		})
	}
}

/// Errors produced while driving a session.
#[derive(Debug, Error)]
pub enum Error {
	/// The access token was missing or rejected.
	#[error("authentication failed: {0}")]
	Auth(String),

	/// The remote session could not be created or started.
	#[error("session negotiation failed: {0}")]
	Negotiation(String),

	/// The caller acted outside the lifecycle contract.
	#[error("lifecycle invariant violated: {0}")]
	Invariant(String),

	/// Another transition has not completed yet.
	#[error("a {pending} transition is already in flight")]
	Busy { pending: Transition },

	/// A task sent to a live session failed.
	#[error("session task failed: {0}")]
	Task(String),

	/// Client configuration is unusable.
	#[error("invalid configuration: {0}")]
	Config(String),
}

impl Error {
	/// Returns true for failures the user can recover from by starting again.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::Auth(_) | Error::Negotiation(_))
	}

	/// Returns true when the error signals a defect in the calling code.
	pub fn is_contract_violation(&self) -> bool {
		matches!(self, Error::Invariant(_) | Error::Busy { .. })
	}
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
