//! Media attachment: binding a live stream to a playback surface.
//!
//! Playback may be refused by the host (autoplay policy). That is not a
//! session failure: the controller records [`PlaybackBlocked`], the session
//! stays connected, and [`MediaAttachment::retry_playback`] can be invoked
//! from a user gesture.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::MediaStream;

/// Hint shown while playback is blocked.
pub const PLAYBACK_BLOCKED_HINT: &str = "Playback blocked by the browser. Click the video to start audio.";

/// Why a playback surface refused to play.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
	/// Rejected by the host's autoplay policy until a user gesture.
	#[error("playback not allowed: {0}")]
	NotAllowed(String),
	#[error("playback failed: {0}")]
	Failed(String),
}

/// A surface that can render a media stream, such as a video element.
pub trait PlaybackSurface: Send + Sync {
	/// Points the surface at `stream`.
	fn bind(&self, stream: &MediaStream);

	/// Detaches whatever is bound. Must tolerate an empty surface.
	fn unbind(&self);

	/// Starts playback of the bound stream.
	fn play(&self) -> Result<(), PlaybackError>;
}

/// Recoverable condition: the stream is bound but not playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackBlocked {
	pub reason: String,
}

impl PlaybackBlocked {
	pub fn hint(&self) -> &'static str {
		PLAYBACK_BLOCKED_HINT
	}
}

/// Result of an attach or retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
	Playing,
	Blocked(PlaybackBlocked),
	/// No surface configured or nothing bound to retry.
	Unbound,
	/// The session ended before the stream could be bound.
	Stale,
}

#[derive(Default)]
struct Attached {
	stream: Option<MediaStream>,
	blocked: Option<PlaybackBlocked>,
}

/// Binds streams to an optional playback surface.
///
/// Binding, playback and unbinding all happen under one lock, so a detach
/// issued by a teardown is never overtaken by a bind for the same session.
pub struct MediaAttachment {
	surface: Option<Arc<dyn PlaybackSurface>>,
	attached: Mutex<Attached>,
}

impl MediaAttachment {
	pub fn new(surface: Option<Arc<dyn PlaybackSurface>>) -> Self {
		Self {
			surface,
			attached: Mutex::new(Attached::default()),
		}
	}

	/// Binds `stream` and attempts playback immediately.
	///
	/// `is_current` is checked under the attachment lock right before
	/// binding; when it reports the session gone nothing is bound.
	pub fn attach<F>(&self, stream: &MediaStream, is_current: F) -> PlaybackOutcome
	where
		F: FnOnce() -> bool,
	{
		let Some(surface) = &self.surface else {
			debug!(target = "avatar.media", stream = stream.id(), "no playback surface; stream left unbound");
			return PlaybackOutcome::Unbound;
		};

		let mut attached = self.attached.lock();
		if !is_current() {
			debug!(target = "avatar.media", stream = stream.id(), "session ended before attach; stream not bound");
			return PlaybackOutcome::Stale;
		}
		surface.bind(stream);
		attached.stream = Some(stream.clone());
		debug!(target = "avatar.media", stream = stream.id(), "stream bound to surface");
		play(surface.as_ref(), &mut attached)
	}

	/// Retries playback of the bound stream. Intended for user gestures.
	pub fn retry_playback(&self) -> PlaybackOutcome {
		let Some(surface) = &self.surface else {
			return PlaybackOutcome::Unbound;
		};
		let mut attached = self.attached.lock();
		if attached.stream.is_none() {
			debug!(target = "avatar.media", "retry requested with nothing bound");
			return PlaybackOutcome::Unbound;
		}
		play(surface.as_ref(), &mut attached)
	}

	/// Unbinds the surface. Never fails, even with nothing bound.
	pub fn detach(&self) {
		let mut attached = self.attached.lock();
		if let Some(surface) = &self.surface {
			surface.unbind();
		}
		if let Some(stream) = attached.stream.take() {
			debug!(target = "avatar.media", stream = stream.id(), "stream unbound");
		}
		attached.blocked = None;
	}

	pub fn blocked(&self) -> Option<PlaybackBlocked> {
		self.attached.lock().blocked.clone()
	}

	pub fn bound_stream(&self) -> Option<MediaStream> {
		self.attached.lock().stream.clone()
	}
}

fn play(surface: &dyn PlaybackSurface, attached: &mut Attached) -> PlaybackOutcome {
	match surface.play() {
		Ok(()) => {
			if attached.blocked.take().is_some() {
				info!(target = "avatar.media", "playback resumed after retry");
			}
			PlaybackOutcome::Playing
		}
		Err(err) => {
			warn!(target = "avatar.media", error = %err, "playback blocked");
			let blocked = PlaybackBlocked { reason: err.to_string() };
			attached.blocked = Some(blocked.clone());
			PlaybackOutcome::Blocked(blocked)
		}
	}
}
