//! Event names emitted by a remote session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The enumerated set of events a session handle may emit.
///
/// Wire names are kebab-case (`stream-ready`, `user-talking-message`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
	/// The live media stream is available.
	StreamReady,
	/// The media stream ended, whoever initiated it.
	StreamDisconnected,
	AvatarStartTalking,
	AvatarStopTalking,
	UserStart,
	UserStop,
	/// A chunk of the user's transcribed speech.
	UserTalkingMessage,
	/// A chunk of the avatar's spoken reply.
	AvatarTalkingMessage,
	UserEndMessage,
	AvatarEndMessage,
	ConnectionQualityChanged,
}

impl EventKind {
	/// Every event kind, in declaration order.
	pub const ALL: [EventKind; 11] = [
		EventKind::StreamReady,
		EventKind::StreamDisconnected,
		EventKind::AvatarStartTalking,
		EventKind::AvatarStopTalking,
		EventKind::UserStart,
		EventKind::UserStop,
		EventKind::UserTalkingMessage,
		EventKind::AvatarTalkingMessage,
		EventKind::UserEndMessage,
		EventKind::AvatarEndMessage,
		EventKind::ConnectionQualityChanged,
	];

	/// Returns the wire name of this event.
	pub fn as_str(self) -> &'static str {
		match self {
			EventKind::StreamReady => "stream-ready",
			EventKind::StreamDisconnected => "stream-disconnected",
			EventKind::AvatarStartTalking => "avatar-start-talking",
			EventKind::AvatarStopTalking => "avatar-stop-talking",
			EventKind::UserStart => "user-start",
			EventKind::UserStop => "user-stop",
			EventKind::UserTalkingMessage => "user-talking-message",
			EventKind::AvatarTalkingMessage => "avatar-talking-message",
			EventKind::UserEndMessage => "user-end-message",
			EventKind::AvatarEndMessage => "avatar-end-message",
			EventKind::ConnectionQualityChanged => "connection-quality-changed",
		}
	}

	/// Parses a wire name. Unknown names yield `None`.
	pub fn from_wire(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.as_str() == name)
	}

	/// Whether the event only informs observers and never drives the lifecycle.
	pub fn is_informational(self) -> bool {
		!matches!(
			self,
			EventKind::StreamReady | EventKind::StreamDisconnected | EventKind::ConnectionQualityChanged
		)
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_names_match_serde_names() {
		for kind in EventKind::ALL {
			let value = serde_json::to_value(kind).unwrap();
			assert_eq!(value, kind.as_str());
			assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
		}
	}

	#[test]
	fn unknown_wire_name_is_rejected() {
		assert_eq!(EventKind::from_wire("stream-paused"), None);
	}

	#[test]
	fn lifecycle_events_are_not_informational() {
		assert!(!EventKind::StreamReady.is_informational());
		assert!(!EventKind::ConnectionQualityChanged.is_informational());
		assert!(EventKind::AvatarEndMessage.is_informational());
	}
}
