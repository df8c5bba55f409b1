//! In-memory fakes for driving the orchestrator without a network.
//!
//! [`FakeConnector`] stands in for the remote session service and hands out a
//! [`FakeController`] for scripting failures, emitting events and inspecting
//! what the orchestrator asked for. [`FakeSurface`] and [`StaticTokenSource`]
//! cover the playback surface and the token endpoint.
//!
//! # Example
//!
//! ```ignore
//! let connector = FakeConnector::new();
//! let controller = connector.controller();
//! controller.emit_stream_on_start(MediaStream::audio_video("stream-1"));
//!
//! let orchestrator = SessionOrchestrator::builder()
//!     .tokens(StaticTokenSource::new("tok"))
//!     .connector(connector)
//!     .build()?;
//! orchestrator.start_session(config, StartOptions::default()).await?;
//! assert_eq!(controller.start_calls(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use avatar_protocol::{SpeakRequest, StartConfig, VoiceChatOptions};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::client::{ConnectRequest, MediaStream, RemoteSession, SessionConnector};
use crate::error::{Error, Result};
use crate::events::{EventEmitter, SessionEvent};
use crate::media::{PlaybackError, PlaybackSurface};
use crate::token::TokenSource;

#[derive(Default)]
struct Script {
	connect_failures: VecDeque<Error>,
	start_failures: VecDeque<Error>,
	voice_failures: VecDeque<Error>,
	held_connects: VecDeque<oneshot::Receiver<()>>,
	held_starts: VecDeque<oneshot::Receiver<()>>,
	stream_on_start: Option<MediaStream>,
	current: Option<EventEmitter>,
	tokens: Vec<String>,
	base_paths: Vec<Option<String>>,
	spoken: Vec<SpeakRequest>,
	configs: Vec<StartConfig>,
	connects: usize,
	start_calls: usize,
	stop_calls: usize,
	voice_chat_starts: usize,
	voice_chat_closes: usize,
	live: usize,
	max_live: usize,
}

#[derive(Default)]
struct Shared {
	script: Mutex<Script>,
	progressed: Notify,
}

/// Fake session service.
#[derive(Default)]
pub struct FakeConnector {
	shared: Arc<Shared>,
}

impl FakeConnector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Controller sharing this connector's state.
	pub fn controller(&self) -> FakeController {
		FakeController {
			shared: Arc::clone(&self.shared),
		}
	}
}

#[async_trait]
impl SessionConnector for FakeConnector {
	async fn connect(&self, request: &ConnectRequest, emitter: EventEmitter) -> Result<Arc<dyn RemoteSession>> {
		let gate = {
			let mut script = self.shared.script.lock();
			script.connects += 1;
			script.tokens.push(request.token.clone());
			script.base_paths.push(request.base_path.clone());
			script.held_connects.pop_front()
		};
		self.shared.progressed.notify_waiters();

		if let Some(gate) = gate {
			let _ = gate.await;
		}

		let mut script = self.shared.script.lock();
		if let Some(err) = script.connect_failures.pop_front() {
			return Err(err);
		}

		script.live += 1;
		script.max_live = script.max_live.max(script.live);
		script.current = Some(emitter.clone());
		Ok(Arc::new(FakeSession {
			shared: Arc::clone(&self.shared),
			emitter,
			stopped: AtomicBool::new(false),
		}))
	}
}

struct FakeSession {
	shared: Arc<Shared>,
	emitter: EventEmitter,
	stopped: AtomicBool,
}

#[async_trait]
impl RemoteSession for FakeSession {
	async fn start(&self, config: &StartConfig) -> Result<()> {
		let gate = {
			let mut script = self.shared.script.lock();
			script.start_calls += 1;
			script.configs.push(config.clone());
			script.held_starts.pop_front()
		};
		self.shared.progressed.notify_waiters();

		if let Some(gate) = gate {
			// A dropped gate releases the start as well.
			let _ = gate.await;
		}

		let (failure, stream) = {
			let mut script = self.shared.script.lock();
			(script.start_failures.pop_front(), script.stream_on_start.clone())
		};
		if let Some(err) = failure {
			return Err(err);
		}
		if let Some(stream) = stream {
			self.emitter.emit(SessionEvent::StreamReady(stream));
		}
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		let mut script = self.shared.script.lock();
		script.stop_calls += 1;
		if !self.stopped.swap(true, Ordering::SeqCst) {
			script.live -= 1;
		}
		Ok(())
	}

	async fn speak(&self, request: &SpeakRequest) -> Result<()> {
		self.shared.script.lock().spoken.push(request.clone());
		Ok(())
	}

	async fn start_voice_chat(&self, _options: &VoiceChatOptions) -> Result<()> {
		let mut script = self.shared.script.lock();
		script.voice_chat_starts += 1;
		match script.voice_failures.pop_front() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	async fn close_voice_chat(&self) -> Result<()> {
		self.shared.script.lock().voice_chat_closes += 1;
		Ok(())
	}
}

/// Holds a fake `start` until opened.
pub struct StartGate {
	tx: oneshot::Sender<()>,
}

impl StartGate {
	pub fn open(self) {
		let _ = self.tx.send(());
	}
}

/// Scripts and inspects a [`FakeConnector`].
#[derive(Clone)]
pub struct FakeController {
	shared: Arc<Shared>,
}

impl FakeController {
	/// Fails the next `connect` with `err`.
	pub fn reject_next_connect(&self, err: Error) {
		self.shared.script.lock().connect_failures.push_back(err);
	}

	/// Fails the next remote `start` with `err`.
	pub fn fail_next_start(&self, err: Error) {
		self.shared.script.lock().start_failures.push_back(err);
	}

	pub fn fail_next_voice_chat(&self, err: Error) {
		self.shared.script.lock().voice_failures.push_back(err);
	}

	/// Emits `stream-ready` with `stream` from inside every subsequent
	/// `start`, before it resolves.
	pub fn emit_stream_on_start(&self, stream: MediaStream) {
		self.shared.script.lock().stream_on_start = Some(stream);
	}

	/// Parks the next `connect` until the returned gate is opened or dropped.
	///
	/// Scripted connect failures apply once the gate opens.
	pub fn hold_next_connect(&self) -> StartGate {
		let (tx, rx) = oneshot::channel();
		self.shared.script.lock().held_connects.push_back(rx);
		StartGate { tx }
	}

	/// Parks the next `start` until the returned gate is opened or dropped.
	pub fn hold_next_start(&self) -> StartGate {
		let (tx, rx) = oneshot::channel();
		self.shared.script.lock().held_starts.push_back(rx);
		StartGate { tx }
	}

	/// Emits `event` on the most recently connected session.
	///
	/// Returns how many listeners ran; zero once that session was released.
	pub fn emit(&self, event: SessionEvent) -> usize {
		let emitter = self.shared.script.lock().current.clone();
		match emitter {
			Some(emitter) => emitter.emit(event),
			None => 0,
		}
	}

	pub fn emit_stream_ready(&self, stream: MediaStream) -> usize {
		self.emit(SessionEvent::StreamReady(stream))
	}

	/// Simulates the service dropping the stream.
	pub fn disconnect(&self) -> usize {
		self.emit(SessionEvent::StreamDisconnected)
	}

	/// Emitter of the most recently connected session.
	pub fn current_emitter(&self) -> Option<EventEmitter> {
		self.shared.script.lock().current.clone()
	}

	pub fn connects(&self) -> usize {
		self.shared.script.lock().connects
	}

	pub fn start_calls(&self) -> usize {
		self.shared.script.lock().start_calls
	}

	pub fn stop_calls(&self) -> usize {
		self.shared.script.lock().stop_calls
	}

	pub fn voice_chat_starts(&self) -> usize {
		self.shared.script.lock().voice_chat_starts
	}

	pub fn voice_chat_closes(&self) -> usize {
		self.shared.script.lock().voice_chat_closes
	}

	/// Remote sessions connected and not yet stopped.
	pub fn live_sessions(&self) -> usize {
		self.shared.script.lock().live
	}

	/// Highest number of simultaneously live remote sessions observed.
	pub fn max_live_sessions(&self) -> usize {
		self.shared.script.lock().max_live
	}

	/// Tokens passed to `connect`, in order.
	pub fn tokens(&self) -> Vec<String> {
		self.shared.script.lock().tokens.clone()
	}

	/// Base paths passed to `connect`, in order.
	pub fn base_paths(&self) -> Vec<Option<String>> {
		self.shared.script.lock().base_paths.clone()
	}

	/// Utterances submitted through `speak`, in order.
	pub fn spoken(&self) -> Vec<SpeakRequest> {
		self.shared.script.lock().spoken.clone()
	}

	/// Start configurations received, in order.
	pub fn start_configs(&self) -> Vec<StartConfig> {
		self.shared.script.lock().configs.clone()
	}

	/// Waits until at least `n` remote starts have begun.
	pub async fn wait_for_start_calls(&self, n: usize) {
		self.wait_until(|script| script.start_calls >= n).await;
	}

	/// Waits until at least `n` connects have begun.
	pub async fn wait_for_connects(&self, n: usize) {
		self.wait_until(|script| script.connects >= n).await;
	}

	async fn wait_until(&self, reached: impl Fn(&Script) -> bool) {
		loop {
			let notified = self.shared.progressed.notified();
			if reached(&*self.shared.script.lock()) {
				return;
			}
			notified.await;
		}
	}
}

#[derive(Default)]
struct SurfaceState {
	bound: Option<MediaStream>,
	blocked_plays: usize,
	bind_calls: usize,
	unbind_calls: usize,
	play_calls: usize,
}

/// Playback surface that records calls and can refuse autoplay.
#[derive(Default)]
pub struct FakeSurface {
	state: Mutex<SurfaceState>,
}

impl FakeSurface {
	pub fn new() -> Self {
		Self::default()
	}

	/// Refuses the next `n` play attempts as an autoplay policy would.
	pub fn block_autoplay(&self, n: usize) {
		self.state.lock().blocked_plays = n;
	}

	pub fn bound(&self) -> Option<MediaStream> {
		self.state.lock().bound.clone()
	}

	pub fn bind_calls(&self) -> usize {
		self.state.lock().bind_calls
	}

	pub fn unbind_calls(&self) -> usize {
		self.state.lock().unbind_calls
	}

	pub fn play_calls(&self) -> usize {
		self.state.lock().play_calls
	}
}

impl PlaybackSurface for FakeSurface {
	fn bind(&self, stream: &MediaStream) {
		let mut state = self.state.lock();
		state.bind_calls += 1;
		state.bound = Some(stream.clone());
	}

	fn unbind(&self) {
		let mut state = self.state.lock();
		state.unbind_calls += 1;
		state.bound = None;
	}

	fn play(&self) -> std::result::Result<(), PlaybackError> {
		let mut state = self.state.lock();
		state.play_calls += 1;
		if state.bound.is_none() {
			return Err(PlaybackError::Failed("no stream bound".to_string()));
		}
		if state.blocked_plays > 0 {
			state.blocked_plays -= 1;
			return Err(PlaybackError::NotAllowed("play() requires a user gesture".to_string()));
		}
		Ok(())
	}
}

/// Token source returning a fixed token, or always failing.
pub struct StaticTokenSource {
	token: std::result::Result<String, String>,
	fetches: AtomicUsize,
}

impl StaticTokenSource {
	pub fn new(token: impl Into<String>) -> Self {
		Self {
			token: Ok(token.into()),
			fetches: AtomicUsize::new(0),
		}
	}

	/// A source whose every fetch fails with [`Error::Auth`].
	pub fn rejecting(reason: impl Into<String>) -> Self {
		Self {
			token: Err(reason.into()),
			fetches: AtomicUsize::new(0),
		}
	}

	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TokenSource for StaticTokenSource {
	async fn fetch(&self) -> Result<String> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		match &self.token {
			Ok(token) => Ok(token.clone()),
			Err(reason) => Err(Error::Auth(reason.clone())),
		}
	}
}
