//! Collaborator traits for the remote streaming service.
//!
//! The remote service is opaque: its negotiation and media transport live
//! behind [`SessionConnector`] and [`RemoteSession`]. Connectors deliver
//! session events through the [`EventEmitter`] they receive at connect time.

use std::sync::Arc;

use async_trait::async_trait;
use avatar_protocol::{SpeakRequest, StartConfig, VoiceChatOptions};

use crate::error::Result;
use crate::events::EventEmitter;

/// Kind of a track carried by a media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
	Audio,
	Video,
}

/// Non-owning reference to a live stream owned by the remote session.
///
/// Cloning is cheap; the remote session decides when the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
	id: Arc<str>,
	tracks: Arc<[TrackKind]>,
}

impl MediaStream {
	pub fn new(id: impl Into<Arc<str>>, tracks: impl Into<Arc<[TrackKind]>>) -> Self {
		Self {
			id: id.into(),
			tracks: tracks.into(),
		}
	}

	/// Stream carrying one audio and one video track.
	pub fn audio_video(id: impl Into<Arc<str>>) -> Self {
		Self::new(id, [TrackKind::Audio, TrackKind::Video])
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn tracks(&self) -> &[TrackKind] {
		&self.tracks
	}

	pub fn has_audio(&self) -> bool {
		self.tracks.contains(&TrackKind::Audio)
	}

	pub fn has_video(&self) -> bool {
		self.tracks.contains(&TrackKind::Video)
	}
}

/// What a connector needs to reach the service for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
	/// Bearer token for this session.
	pub token: String,
	/// Override for the service's API base URL.
	pub base_path: Option<String>,
}

/// One negotiated session on the remote service.
#[async_trait]
pub trait RemoteSession: Send + Sync {
	/// Negotiates the session. Resolves independently of `stream-ready`.
	async fn start(&self, config: &StartConfig) -> Result<()>;

	/// Ends the session. Must be idempotent.
	async fn stop(&self) -> Result<()>;

	/// Submits a spoken utterance task.
	async fn speak(&self, request: &SpeakRequest) -> Result<()>;

	/// Opens the voice-chat sub-channel.
	async fn start_voice_chat(&self, options: &VoiceChatOptions) -> Result<()>;

	/// Closes the voice-chat sub-channel. Must be idempotent.
	async fn close_voice_chat(&self) -> Result<()>;
}

/// Creates remote sessions from bearer tokens.
#[async_trait]
pub trait SessionConnector: Send + Sync {
	/// Creates a session bound to `request.token`, against
	/// `request.base_path` when one is set.
	///
	/// Implementations report a rejected token as [`Error::Auth`] and an
	/// unreachable or refusing service as [`Error::Negotiation`]. Events for the
	/// session must be delivered through `emitter`.
	///
	/// [`Error::Auth`]: crate::Error::Auth
	/// [`Error::Negotiation`]: crate::Error::Negotiation
	async fn connect(&self, request: &ConnectRequest, emitter: EventEmitter) -> Result<Arc<dyn RemoteSession>>;
}
