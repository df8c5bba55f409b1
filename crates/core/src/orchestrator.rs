//! Session lifecycle orchestration.
//!
//! [`SessionOrchestrator`] drives one session at a time from `Inactive`
//! through token acquisition and negotiation to an attached live stream, and
//! back. It owns the [`LifecycleStore`] and is the only writer to it.
//!
//! A stop issued while a start is pending cancels that start: the store's
//! generation moves on, and whatever handle the pending start obtains is
//! released instead of being recorded.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use avatar_protocol::{EventKind, SpeakRequest, StartConfig, VoiceChatOptions};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{MediaStream, SessionConnector};
use crate::error::{Error, Result};
use crate::events::{Listener, SessionEvent};
use crate::factory::{HandleFactory, HandleId, SessionHandle};
use crate::media::{MediaAttachment, PlaybackOutcome, PlaybackSurface};
use crate::store::{LifecycleStore, SessionFailure, SessionSnapshot, SessionState, StartTicket, VoiceChatState};
use crate::token::TokenSource;

/// How long a start waits for `stream-ready` before opening voice chat.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-start options.
#[derive(Debug, Clone)]
pub struct StartOptions {
	/// Open the voice-chat channel once connected.
	pub voice_chat: bool,
	pub voice_chat_options: VoiceChatOptions,
	/// Spoken once when the stream becomes ready.
	pub preamble: Option<String>,
	pub ready_timeout: Duration,
}

impl Default for StartOptions {
	fn default() -> Self {
		Self {
			voice_chat: false,
			voice_chat_options: VoiceChatOptions::default(),
			preamble: None,
			ready_timeout: DEFAULT_READY_TIMEOUT,
		}
	}
}

impl StartOptions {
	pub fn with_voice_chat(mut self, options: VoiceChatOptions) -> Self {
		self.voice_chat = true;
		self.voice_chat_options = options;
		self
	}

	pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
		self.preamble = Some(preamble.into());
		self
	}

	pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}
}

/// Result of a start that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
	/// Negotiation succeeded; the session is `Connecting` or `Connected`.
	Started(HandleId),
	/// Stopped or disconnected before negotiation completed.
	Cancelled,
}

/// Builder for [`SessionOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
	tokens: Option<Arc<dyn TokenSource>>,
	connector: Option<Arc<dyn SessionConnector>>,
	surface: Option<Arc<dyn PlaybackSurface>>,
	base_path: Option<String>,
}

impl OrchestratorBuilder {
	pub fn tokens<T: TokenSource + 'static>(self, tokens: T) -> Self {
		self.shared_tokens(Arc::new(tokens))
	}

	pub fn shared_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
		self.tokens = Some(tokens);
		self
	}

	pub fn connector<C: SessionConnector + 'static>(mut self, connector: C) -> Self {
		self.connector = Some(Arc::new(connector));
		self
	}

	/// Surface the live stream is bound to. Without one, streams stay unbound.
	pub fn surface(mut self, surface: Arc<dyn PlaybackSurface>) -> Self {
		self.surface = Some(surface);
		self
	}

	/// API base URL handed to the connector for every session.
	pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
		self.base_path = Some(base_path.into());
		self
	}

	pub fn build(self) -> Result<SessionOrchestrator> {
		let tokens = self
			.tokens
			.ok_or_else(|| Error::Config("orchestrator needs a token source".to_string()))?;
		let connector = self
			.connector
			.ok_or_else(|| Error::Config("orchestrator needs a session connector".to_string()))?;

		Ok(SessionOrchestrator {
			inner: Arc::new(Inner {
				tokens,
				factory: HandleFactory::new(connector).with_base_path(self.base_path),
				store: LifecycleStore::new(),
				media: MediaAttachment::new(self.surface),
				observers: Mutex::new(Vec::new()),
			}),
		})
	}
}

struct Inner {
	tokens: Arc<dyn TokenSource>,
	factory: HandleFactory,
	store: LifecycleStore,
	media: MediaAttachment,
	/// Persistent listeners attached to every handle before its start.
	observers: Mutex<Vec<(EventKind, Listener)>>,
}

/// Clears the in-flight start flag when the start ends or is dropped.
struct StartGuard<'a> {
	store: &'a LifecycleStore,
}

impl Drop for StartGuard<'_> {
	fn drop(&mut self) {
		self.store.finish_start();
	}
}

/// Marks a handle taken by a reset as released when dropped.
struct ReleaseGuard<'a> {
	store: &'a LifecycleStore,
}

impl Drop for ReleaseGuard<'_> {
	fn drop(&mut self) {
		self.store.finish_release();
	}
}

/// Ends a voice transition, applying `outcome` if one was reached.
struct VoiceGuard<'a> {
	store: &'a LifecycleStore,
	handle: HandleId,
	outcome: Option<VoiceChatState>,
}

impl Drop for VoiceGuard<'_> {
	fn drop(&mut self) {
		self.store.finish_voice(self.handle, self.outcome);
	}
}

impl Inner {
	fn on_stream_ready(self: &Arc<Self>, id: HandleId, stream: &MediaStream, preamble: Option<String>) {
		let handle = match self.store.mark_connected(id, stream.clone()) {
			Ok(handle) => handle,
			Err(err) => {
				debug!(target = "avatar.session", handle = %id, error = %err, "ignoring stream-ready");
				return;
			}
		};
		info!(target = "avatar.session", handle = %id, stream = stream.id(), "session connected");

		match self.media.attach(stream, || self.store.holds(id)) {
			PlaybackOutcome::Playing => self.store.set_playback_blocked(None),
			PlaybackOutcome::Blocked(blocked) => self.store.set_playback_blocked(Some(blocked)),
			PlaybackOutcome::Unbound => {}
			PlaybackOutcome::Stale => return,
		}

		if let Some(text) = preamble {
			let Ok(runtime) = tokio::runtime::Handle::try_current() else {
				warn!(target = "avatar.session", handle = %id, "no runtime to send the preamble");
				return;
			};
			runtime.spawn(async move {
				if handle.is_released() {
					return;
				}
				if let Err(err) = handle.speak(&SpeakRequest::repeat_async(text)).await {
					warn!(target = "avatar.session", handle = %id, error = %err, "failed to send preamble");
				}
			});
		}
	}

	fn on_disconnected(self: &Arc<Self>, id: HandleId) {
		let Some(handle) = self.store.reset_if(id) else {
			debug!(target = "avatar.session", handle = %id, "disconnect from inactive handle");
			return;
		};
		info!(target = "avatar.session", handle = %id, "stream disconnected; session reset");
		self.media.detach();
		self.release_in_background(handle);
	}

	/// Releases a handle taken by a reset without awaiting it.
	fn release_in_background(self: &Arc<Self>, handle: Arc<SessionHandle>) {
		match tokio::runtime::Handle::try_current() {
			Ok(runtime) => {
				let inner = Arc::clone(self);
				runtime.spawn(async move {
					let _released = ReleaseGuard { store: &inner.store };
					handle.release().await;
				});
			}
			Err(_) => {
				// Dropping an unreleased handle frees its slot and closes its bus.
				drop(handle);
				self.store.finish_release();
			}
		}
	}

	/// Records a start failure and hands the error back.
	fn fail_start(&self, err: Error) -> Error {
		match SessionFailure::from_error(&err) {
			Some(failure) => {
				warn!(target = "avatar.session", error = %err, "session start failed");
				self.store.record_failure(failure);
			}
			None => error!(target = "avatar.session", error = %err, "session start failed"),
		}
		err
	}
}

fn log_rejection(operation: &str, err: &Error) {
	match err {
		Error::Busy { .. } => warn!(target = "avatar.session", operation, error = %err, "operation rejected"),
		_ => error!(target = "avatar.session", operation, error = %err, "operation rejected"),
	}
}

fn into_task(err: Error) -> Error {
	match err {
		Error::Task(msg) => Error::Task(msg),
		other => Error::Task(other.to_string()),
	}
}

/// Entry point for starting, driving and stopping avatar sessions.
#[derive(Clone)]
pub struct SessionOrchestrator {
	inner: Arc<Inner>,
}

impl SessionOrchestrator {
	pub fn builder() -> OrchestratorBuilder {
		OrchestratorBuilder::default()
	}

	/// Starts a session described by `config`.
	///
	/// Fetches a token, creates a handle, attaches listeners and negotiates.
	/// The state is `Connecting` once this returns `Started`; it becomes
	/// `Connected` when the service reports the stream ready, which may
	/// happen before or after negotiation resolves.
	///
	/// # Errors
	///
	/// * [`Error::Busy`] while another start or a release is in flight
	/// * [`Error::Invariant`] when a session is already connected
	/// * [`Error::Auth`] / [`Error::Negotiation`] when the token or the
	///   negotiation fails; the state is back to `Inactive` and a
	///   [`SessionFailure`] is recorded
	pub async fn start_session(&self, config: StartConfig, options: StartOptions) -> Result<StartOutcome> {
		let inner = &self.inner;
		let ticket = inner.store.begin_start().inspect_err(|err| log_rejection("start", err))?;
		let started = {
			let _starting = StartGuard { store: &inner.store };
			self.negotiate(&ticket, &config, &options).await?
		};

		let StartOutcome::Started(id) = started else {
			info!(target = "avatar.session", "session start cancelled");
			return Ok(started);
		};
		if options.voice_chat {
			self.open_voice_after_ready(id, &options).await;
		}
		Ok(started)
	}

	async fn negotiate(&self, ticket: &StartTicket, config: &StartConfig, options: &StartOptions) -> Result<StartOutcome> {
		let inner = &self.inner;
		let token = match inner.tokens.fetch().await {
			Ok(token) => token,
			Err(err) => return self.fail_or_cancel(ticket, err),
		};
		if !inner.store.is_current(ticket) {
			return Ok(StartOutcome::Cancelled);
		}

		let handle = match inner.factory.create(&token).await {
			Ok(handle) => Arc::new(handle),
			Err(err) => return self.fail_or_cancel(ticket, err),
		};
		let id = handle.id();
		self.wire_core_listeners(&handle, options.preamble.clone());
		let refused = {
			let observers = inner.observers.lock();
			match inner.store.init_handle(ticket, Arc::clone(&handle)) {
				Ok(()) => {
					for (kind, listener) in observers.iter() {
						handle.events().add_listener(*kind, Arc::clone(listener));
					}
					false
				}
				Err(_) => true,
			}
		};
		if refused {
			debug!(target = "avatar.session", handle = %id, "start cancelled before negotiation; releasing");
			handle.release().await;
			return Ok(StartOutcome::Cancelled);
		}
		if !inner.store.is_current(ticket) {
			return Ok(StartOutcome::Cancelled);
		}

		info!(target = "avatar.session", handle = %id, avatar = %config.avatar_name, "negotiating session");
		if let Err(err) = handle.start(config).await {
			if !inner.store.is_current(ticket) {
				debug!(target = "avatar.session", handle = %id, error = %err, "cancelled start failed");
				return Ok(StartOutcome::Cancelled);
			}
			if let Some(taken) = inner.store.reset_if(id) {
				inner.media.detach();
				let _released = ReleaseGuard { store: &inner.store };
				taken.release().await;
			}
			return Err(inner.fail_start(err));
		}

		if !inner.store.is_current(ticket) {
			// Whoever reset the store owns the release.
			return Ok(StartOutcome::Cancelled);
		}
		Ok(StartOutcome::Started(id))
	}

	/// A failure after the start was cancelled is not reported.
	fn fail_or_cancel(&self, ticket: &StartTicket, err: Error) -> Result<StartOutcome> {
		if !self.inner.store.is_current(ticket) {
			debug!(target = "avatar.session", error = %err, "cancelled start failed");
			return Ok(StartOutcome::Cancelled);
		}
		Err(self.inner.fail_start(err))
	}

	fn wire_core_listeners(&self, handle: &SessionHandle, preamble: Option<String>) {
		let id = handle.id();

		let weak = Arc::downgrade(&self.inner);
		handle.on(EventKind::StreamReady, move |event| {
			if let (Some(inner), SessionEvent::StreamReady(stream)) = (weak.upgrade(), event) {
				inner.on_stream_ready(id, stream, preamble.clone());
			}
		});

		let weak = Arc::downgrade(&self.inner);
		handle.on(EventKind::StreamDisconnected, move |_| {
			if let Some(inner) = weak.upgrade() {
				inner.on_disconnected(id);
			}
		});

		let weak = Arc::downgrade(&self.inner);
		handle.on(EventKind::ConnectionQualityChanged, move |event| {
			if let (Some(inner), SessionEvent::ConnectionQualityChanged(quality)) = (weak.upgrade(), event) {
				if inner.store.observe_quality(id, *quality) {
					debug!(target = "avatar.session", handle = %id, %quality, "connection quality changed");
				}
			}
		});

		for kind in EventKind::ALL.iter().copied().filter(|kind| kind.is_informational()) {
			handle.on(kind, move |event| {
				debug!(target = "avatar.events", handle = %id, event = %kind, detail = ?event, "session event");
			});
		}
	}

	async fn open_voice_after_ready(&self, id: HandleId, options: &StartOptions) {
		let mut rx = self.subscribe();
		let ready = tokio::time::timeout(
			options.ready_timeout,
			rx.wait_for(|s| s.state == SessionState::Connected || s.handle != Some(id)),
		)
		.await
		.map(|changed| changed.is_ok());

		match ready {
			Err(_) => {
				warn!(target = "avatar.voice", handle = %id, timeout = ?options.ready_timeout, "stream not ready; voice chat not opened");
				return;
			}
			Ok(false) => return,
			Ok(true) => {}
		}
		if !self.inner.store.holds(id) {
			return;
		}
		if let Err(err) = self.start_voice_chat(options.voice_chat_options).await {
			warn!(target = "avatar.voice", handle = %id, error = %err, "voice chat failed to open after start");
		}
	}

	/// Stops the active session, if any. Idempotent; never fails.
	///
	/// Accepted in every state. While a start is pending this cancels it.
	pub async fn stop_session(&self) {
		let inner = &self.inner;
		let Some(handle) = inner.store.reset() else {
			debug!(target = "avatar.session", "stop with no active session");
			return;
		};
		let _released = ReleaseGuard { store: &inner.store };
		info!(target = "avatar.session", handle = %handle.id(), "stopping session");
		inner.media.detach();
		handle.release().await;
	}

	/// Submits an utterance to the connected session.
	pub async fn speak(&self, request: SpeakRequest) -> Result<()> {
		let handle = self
			.inner
			.store
			.connected_handle()
			.inspect_err(|err| log_rejection("speak", err))?;
		handle.speak(&request).await.map_err(into_task)
	}

	/// Opens the voice-chat channel of the connected session.
	///
	/// Already open is a no-op. While another voice transition is in flight
	/// this fails with [`Error::Busy`].
	pub async fn start_voice_chat(&self, options: VoiceChatOptions) -> Result<()> {
		let store = &self.inner.store;
		let Some(handle) = store
			.begin_voice(VoiceChatState::On)
			.inspect_err(|err| log_rejection("start-voice-chat", err))?
		else {
			return Ok(());
		};
		let mut guard = VoiceGuard {
			store,
			handle: handle.id(),
			outcome: None,
		};

		handle.start_voice_chat(&options).await.map_err(|err| {
			warn!(target = "avatar.voice", handle = %handle.id(), error = %err, "voice chat failed to open");
			into_task(err)
		})?;
		guard.outcome = Some(VoiceChatState::On);
		info!(target = "avatar.voice", handle = %handle.id(), "voice chat open");
		Ok(())
	}

	/// Closes the voice-chat channel. Idempotent.
	///
	/// The local state is `Off` afterwards even when the remote close fails.
	pub async fn stop_voice_chat(&self) -> Result<()> {
		let store = &self.inner.store;
		let Some(handle) = store
			.begin_voice(VoiceChatState::Off)
			.inspect_err(|err| log_rejection("stop-voice-chat", err))?
		else {
			return Ok(());
		};
		let _guard = VoiceGuard {
			store,
			handle: handle.id(),
			outcome: Some(VoiceChatState::Off),
		};

		handle.close_voice_chat().await.map_err(|err| {
			warn!(target = "avatar.voice", handle = %handle.id(), error = %err, "voice chat close failed");
			into_task(err)
		})?;
		info!(target = "avatar.voice", handle = %handle.id(), "voice chat closed");
		Ok(())
	}

	/// Retries playback after a blocked autoplay. Call from a user gesture.
	pub fn retry_playback(&self) -> PlaybackOutcome {
		let inner = &self.inner;
		if inner.store.state() != SessionState::Connected {
			return PlaybackOutcome::Unbound;
		}
		let outcome = inner.media.retry_playback();
		match &outcome {
			PlaybackOutcome::Playing => inner.store.set_playback_blocked(None),
			PlaybackOutcome::Blocked(blocked) => inner.store.set_playback_blocked(Some(blocked.clone())),
			PlaybackOutcome::Unbound | PlaybackOutcome::Stale => {}
		}
		outcome
	}

	/// Clears the last start failure; returns whether there was one.
	pub fn dismiss_failure(&self) -> bool {
		self.inner.store.dismiss_failure()
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		self.inner.store.snapshot()
	}

	pub fn state(&self) -> SessionState {
		self.inner.store.state()
	}

	/// Receiver observing every snapshot change.
	pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
		self.inner.store.subscribe()
	}

	/// Waits until the state is `target`; `false` on timeout.
	pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
		self.wait_until(timeout, |s| s.state == target).await
	}

	/// Waits until no transition is in flight; `false` on timeout.
	pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
		self.wait_until(timeout, |s| s.pending.is_none()).await
	}

	async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
	where
		F: FnMut(&SessionSnapshot) -> bool,
	{
		let mut rx = self.subscribe();
		let reached = tokio::time::timeout(timeout, rx.wait_for(predicate))
			.await
			.is_ok_and(|changed| changed.is_ok());
		reached
	}

	/// Attaches a listener to the active handle only.
	///
	/// Fails with [`Error::Invariant`] when there is no active handle.
	pub fn attach<F>(&self, kind: EventKind, listener: F) -> Result<()>
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		let handle = self
			.inner
			.store
			.current_handle()
			.ok_or_else(|| Error::Invariant(format!("cannot attach a {kind} listener without an active session")))
			.inspect_err(|err| log_rejection("attach", err))?;
		handle.on(kind, listener);
		Ok(())
	}

	/// Registers a listener for every session, current and future.
	///
	/// Future handles receive it before negotiation starts.
	pub fn on<F>(&self, kind: EventKind, listener: F)
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		let listener: Listener = Arc::new(listener);
		let mut observers = self.inner.observers.lock();
		observers.push((kind, Arc::clone(&listener)));
		if let Some(handle) = self.inner.store.current_handle() {
			handle.events().add_listener(kind, listener);
		}
	}

	/// Live handles; never more than one.
	pub fn live_handles(&self) -> usize {
		self.inner.factory.live_handles()
	}

	/// Guard that tears the session down when dropped.
	pub fn scope(&self) -> SessionScope {
		SessionScope {
			orchestrator: self.clone(),
			closed: false,
		}
	}
}

/// Ties a session to a lexical scope.
///
/// Dropping the scope resets the store at once and releases the handle in
/// the background. [`SessionScope::close`] does the same and waits.
pub struct SessionScope {
	orchestrator: SessionOrchestrator,
	closed: bool,
}

impl SessionScope {
	/// Stops the session and waits for the release.
	pub async fn close(mut self) {
		self.closed = true;
		self.orchestrator.stop_session().await;
	}
}

impl Deref for SessionScope {
	type Target = SessionOrchestrator;

	fn deref(&self) -> &Self::Target {
		&self.orchestrator
	}
}

impl Drop for SessionScope {
	fn drop(&mut self) {
		if self.closed {
			return;
		}
		let inner = &self.orchestrator.inner;
		if let Some(handle) = inner.store.reset() {
			info!(target = "avatar.session", handle = %handle.id(), "session scope exited; tearing down");
			inner.media.detach();
			inner.release_in_background(handle);
		}
	}
}
