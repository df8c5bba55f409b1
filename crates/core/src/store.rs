//! Lifecycle state store.
//!
//! The single mutable record behind a session: state, active handle, stream,
//! voice-chat state, connection quality, playback condition and in-flight
//! transitions. Only the orchestrator mutates it. Readers get
//! [`SessionSnapshot`]s, either on demand or through a watch channel.
//!
//! ```text
//! Inactive --init_handle--> Connecting --mark_connected--> Connected
//!    ^                          |                              |
//!    +----------- reset --------+------------- reset ----------+
//! ```
//!
//! Every operation takes the record lock once and never across an await.

use std::fmt;
use std::sync::Arc;

use avatar_protocol::ConnectionQuality;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::client::MediaStream;
use crate::error::{Error, Result, Transition};
use crate::factory::{HandleId, SessionHandle};
use crate::media::PlaybackBlocked;
use crate::quality::QualityMonitor;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
	#[default]
	Inactive,
	Connecting,
	Connected,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			SessionState::Inactive => "inactive",
			SessionState::Connecting => "connecting",
			SessionState::Connected => "connected",
		})
	}
}

/// Voice-chat sub-state, only meaningful while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceChatState {
	#[default]
	Off,
	On,
}

/// Category of a failed start shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	Auth,
	Negotiation,
}

/// Dismissable message describing the last failed start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
	pub kind: FailureKind,
	pub message: String,
}

impl SessionFailure {
	/// Builds a failure from a retryable error; other errors yield `None`.
	pub fn from_error(err: &Error) -> Option<Self> {
		let kind = match err {
			Error::Auth(_) => FailureKind::Auth,
			Error::Negotiation(_) => FailureKind::Negotiation,
			_ => return None,
		};
		Some(Self {
			kind,
			message: err.to_string(),
		})
	}
}

/// Read-only view of the lifecycle record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
	pub state: SessionState,
	pub handle: Option<HandleId>,
	pub stream: Option<MediaStream>,
	pub voice_chat: VoiceChatState,
	pub quality: ConnectionQuality,
	pub playback_blocked: Option<PlaybackBlocked>,
	pub pending: Option<Transition>,
	pub failure: Option<SessionFailure>,
}

impl SessionSnapshot {
	/// Whether a start would currently be accepted.
	pub fn can_start(&self) -> bool {
		self.state == SessionState::Inactive && self.pending.is_none()
	}
}

/// Proof that a start was admitted; tied to the generation it began in.
#[derive(Debug)]
pub(crate) struct StartTicket {
	generation: u64,
}

#[derive(Default)]
struct Record {
	state: SessionState,
	handle: Option<Arc<SessionHandle>>,
	stream: Option<MediaStream>,
	voice_chat: VoiceChatState,
	quality: QualityMonitor,
	playback_blocked: Option<PlaybackBlocked>,
	starting: bool,
	releasing: usize,
	voice_pending: bool,
	generation: u64,
	failure: Option<SessionFailure>,
}

impl Record {
	fn pending(&self) -> Option<Transition> {
		if self.starting {
			Some(Transition::Start)
		} else if self.releasing > 0 {
			Some(Transition::Stop)
		} else if self.voice_pending {
			Some(Transition::VoiceChat)
		} else {
			None
		}
	}

	fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			state: self.state,
			handle: self.handle.as_ref().map(|handle| handle.id()),
			stream: self.stream.clone(),
			voice_chat: self.voice_chat,
			quality: self.quality.current(),
			playback_blocked: self.playback_blocked.clone(),
			pending: self.pending(),
			failure: self.failure.clone(),
		}
	}

	fn current_is(&self, id: HandleId) -> bool {
		self.handle.as_ref().is_some_and(|handle| handle.id() == id)
	}

	/// Returns to `Inactive`, clearing everything scoped to the session.
	fn clear(&mut self) -> Option<Arc<SessionHandle>> {
		self.generation += 1;
		self.state = SessionState::Inactive;
		self.stream = None;
		self.voice_chat = VoiceChatState::Off;
		self.quality.reset();
		self.playback_blocked = None;
		let handle = self.handle.take();
		if handle.is_some() {
			self.releasing += 1;
		}
		handle
	}
}

/// Single-writer holder of the session lifecycle record.
pub struct LifecycleStore {
	record: Mutex<Record>,
	snapshots: watch::Sender<SessionSnapshot>,
}

impl Default for LifecycleStore {
	fn default() -> Self {
		Self::new()
	}
}

impl LifecycleStore {
	pub fn new() -> Self {
		let (snapshots, _) = watch::channel(SessionSnapshot::default());
		Self {
			record: Mutex::new(Record::default()),
			snapshots,
		}
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		self.record.lock().snapshot()
	}

	pub fn state(&self) -> SessionState {
		self.record.lock().state
	}

	/// Receiver that observes every published change.
	pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
		self.snapshots.subscribe()
	}

	fn publish(&self, record: &Record) {
		let next = record.snapshot();
		self.snapshots.send_if_modified(|current| {
			if *current == next {
				false
			} else {
				*current = next;
				true
			}
		});
	}

	/// Admits a start.
	///
	/// Rejected with [`Error::Busy`] while a start or a release is in flight
	/// or while a previous start is still connecting, and with
	/// [`Error::Invariant`] when a session is already connected.
	pub(crate) fn begin_start(&self) -> Result<StartTicket> {
		let mut record = self.record.lock();
		if let Some(pending @ (Transition::Start | Transition::Stop)) = record.pending() {
			return Err(Error::Busy { pending });
		}
		match record.state {
			SessionState::Inactive => {}
			SessionState::Connecting => {
				return Err(Error::Busy {
					pending: Transition::Start,
				});
			}
			SessionState::Connected => {
				return Err(Error::Invariant("a session is already connected".to_string()));
			}
		}

		record.starting = true;
		record.failure = None;
		self.publish(&record);
		Ok(StartTicket {
			generation: record.generation,
		})
	}

	/// Ends an admitted start, whatever its outcome.
	pub(crate) fn finish_start(&self) {
		let mut record = self.record.lock();
		record.starting = false;
		self.publish(&record);
	}

	/// Whether no reset happened since `ticket` was issued.
	pub(crate) fn is_current(&self, ticket: &StartTicket) -> bool {
		self.record.lock().generation == ticket.generation
	}

	/// Stores a freshly created handle and moves to `Connecting`.
	///
	/// When the start was cancelled in the meantime the handle is handed back
	/// so the caller can release it.
	pub(crate) fn init_handle(
		&self,
		ticket: &StartTicket,
		handle: Arc<SessionHandle>,
	) -> std::result::Result<(), Arc<SessionHandle>> {
		let mut record = self.record.lock();
		if record.generation != ticket.generation || record.state != SessionState::Inactive || record.handle.is_some() {
			return Err(handle);
		}

		debug!(target = "avatar.store", handle = %handle.id(), "state -> connecting");
		record.handle = Some(handle);
		record.state = SessionState::Connecting;
		self.publish(&record);
		Ok(())
	}

	/// Whether `id` is the active handle.
	pub(crate) fn holds(&self, id: HandleId) -> bool {
		self.record.lock().current_is(id)
	}

	/// The active handle, whatever the state.
	pub(crate) fn current_handle(&self) -> Option<Arc<SessionHandle>> {
		self.record.lock().handle.clone()
	}

	/// The active handle, only while connected.
	pub(crate) fn connected_handle(&self) -> Result<Arc<SessionHandle>> {
		let record = self.record.lock();
		match (&record.handle, record.state) {
			(Some(handle), SessionState::Connected) => Ok(Arc::clone(handle)),
			(_, state) => Err(Error::Invariant(format!("session is {state}, not connected"))),
		}
	}

	/// Records the live stream and moves to `Connected`.
	///
	/// Only valid while `id` is the active handle and the session is
	/// connecting. Returns the handle for follow-up work on the stream.
	pub(crate) fn mark_connected(&self, id: HandleId, stream: MediaStream) -> Result<Arc<SessionHandle>> {
		let mut record = self.record.lock();
		if !record.current_is(id) {
			return Err(Error::Invariant(format!("stream ready for stale {id}")));
		}
		if record.state != SessionState::Connecting {
			return Err(Error::Invariant(format!("stream ready while {}", record.state)));
		}

		debug!(target = "avatar.store", handle = %id, stream = stream.id(), "state -> connected");
		record.stream = Some(stream);
		record.state = SessionState::Connected;
		self.publish(&record);
		record
			.handle
			.clone()
			.ok_or_else(|| Error::Invariant("connected without a handle".to_string()))
	}

	/// Returns to `Inactive` and hands back the handle to release.
	///
	/// Always bumps the generation, which cancels an in-flight start. When a
	/// handle is returned, the caller owes a [`LifecycleStore::finish_release`].
	pub(crate) fn reset(&self) -> Option<Arc<SessionHandle>> {
		let mut record = self.record.lock();
		let previous = record.state;
		let handle = record.clear();
		if previous != SessionState::Inactive {
			debug!(target = "avatar.store", from = %previous, "state -> inactive");
		}
		self.publish(&record);
		handle
	}

	/// Resets only when `id` is still the active handle.
	pub(crate) fn reset_if(&self, id: HandleId) -> Option<Arc<SessionHandle>> {
		let mut record = self.record.lock();
		if !record.current_is(id) {
			return None;
		}
		let handle = record.clear();
		debug!(target = "avatar.store", handle = %id, "state -> inactive");
		self.publish(&record);
		handle
	}

	/// Marks one handle taken by a reset as fully released.
	pub(crate) fn finish_release(&self) {
		let mut record = self.record.lock();
		record.releasing = record.releasing.saturating_sub(1);
		self.publish(&record);
	}

	/// Admits a voice-chat transition towards `target`.
	///
	/// Returns `None` when already in the target state. Opening requires a
	/// connected session.
	pub(crate) fn begin_voice(&self, target: VoiceChatState) -> Result<Option<Arc<SessionHandle>>> {
		let mut record = self.record.lock();
		if record.voice_pending {
			return Err(Error::Busy {
				pending: Transition::VoiceChat,
			});
		}
		if record.voice_chat == target {
			return Ok(None);
		}
		if target == VoiceChatState::On && record.state != SessionState::Connected {
			return Err(Error::Invariant(format!("voice chat requires a connected session, session is {}", record.state)));
		}
		let Some(handle) = record.handle.clone() else {
			return Ok(None);
		};

		record.voice_pending = true;
		self.publish(&record);
		Ok(Some(handle))
	}

	/// Ends a voice-chat transition. `outcome` applies only if `id` is still
	/// the active, connected handle.
	pub(crate) fn finish_voice(&self, id: HandleId, outcome: Option<VoiceChatState>) {
		let mut record = self.record.lock();
		record.voice_pending = false;
		if let Some(state) = outcome {
			if record.current_is(id) && record.state == SessionState::Connected {
				record.voice_chat = state;
			}
		}
		self.publish(&record);
	}

	/// Applies a quality reading from `id`; stale handles are ignored.
	pub(crate) fn observe_quality(&self, id: HandleId, quality: ConnectionQuality) -> bool {
		let mut record = self.record.lock();
		if !record.current_is(id) {
			return false;
		}
		record.quality.observe(quality);
		self.publish(&record);
		true
	}

	/// Sets or clears the playback condition of the connected session.
	pub(crate) fn set_playback_blocked(&self, blocked: Option<PlaybackBlocked>) {
		let mut record = self.record.lock();
		if record.state != SessionState::Connected {
			return;
		}
		record.playback_blocked = blocked;
		self.publish(&record);
	}

	pub(crate) fn record_failure(&self, failure: SessionFailure) {
		let mut record = self.record.lock();
		record.failure = Some(failure);
		self.publish(&record);
	}

	/// Clears the failure message; returns whether there was one.
	pub(crate) fn dismiss_failure(&self) -> bool {
		let mut record = self.record.lock();
		let had = record.failure.take().is_some();
		self.publish(&record);
		had
	}
}
