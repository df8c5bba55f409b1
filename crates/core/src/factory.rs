//! Session handle factory.
//!
//! A [`SessionHandle`] is the orchestrator's exclusive capability over one
//! remote session. The factory hands out at most one live handle at a time; a
//! handle stays live until [`SessionHandle::release`] has stopped the remote
//! session.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use avatar_protocol::{EventKind, SpeakRequest, StartConfig, VoiceChatOptions};
use tracing::{debug, info, warn};

use crate::client::{ConnectRequest, RemoteSession, SessionConnector};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};

/// Identity of a handle, unique per factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
	pub(crate) fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for HandleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "handle-{}", self.0)
	}
}

#[derive(Default)]
struct Counters {
	live: AtomicUsize,
	created: AtomicUsize,
	released: AtomicUsize,
}

/// Occupies the factory's single live-handle slot until freed or dropped.
struct LiveSlot {
	counters: Arc<Counters>,
	freed: AtomicBool,
}

impl LiveSlot {
	fn free(&self) {
		if !self.freed.swap(true, Ordering::SeqCst) {
			self.counters.live.fetch_sub(1, Ordering::SeqCst);
			self.counters.released.fetch_add(1, Ordering::SeqCst);
		}
	}
}

impl Drop for LiveSlot {
	fn drop(&mut self) {
		self.free();
	}
}

/// Exclusive capability over one remote session.
pub struct SessionHandle {
	id: HandleId,
	remote: Arc<dyn RemoteSession>,
	bus: Arc<EventBus>,
	slot: LiveSlot,
	released: AtomicBool,
}

impl SessionHandle {
	pub fn id(&self) -> HandleId {
		self.id
	}

	/// The handle's event registry.
	pub fn events(&self) -> &EventBus {
		&self.bus
	}

	/// Registers a listener on this handle.
	pub fn on<F>(&self, kind: EventKind, listener: F)
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		self.bus.on(kind, listener);
	}

	/// Negotiates the remote session.
	///
	/// A rejected token stays [`Error::Auth`]; every other failure is reported
	/// as [`Error::Negotiation`].
	pub async fn start(&self, config: &StartConfig) -> Result<()> {
		debug!(target = "avatar.session", handle = %self.id, avatar = %config.avatar_name, "starting remote session");
		self.remote.start(config).await.map_err(|err| match err {
			Error::Auth(msg) => Error::Auth(msg),
			Error::Negotiation(msg) => Error::Negotiation(msg),
			other => Error::Negotiation(other.to_string()),
		})
	}

	pub async fn speak(&self, request: &SpeakRequest) -> Result<()> {
		self.remote.speak(request).await
	}

	pub async fn start_voice_chat(&self, options: &VoiceChatOptions) -> Result<()> {
		self.remote.start_voice_chat(options).await
	}

	pub async fn close_voice_chat(&self) -> Result<()> {
		self.remote.close_voice_chat().await
	}

	pub fn is_released(&self) -> bool {
		self.released.load(Ordering::SeqCst)
	}

	/// Stops the remote session and frees the factory slot. Idempotent.
	///
	/// The event bus is closed first so nothing from this session reaches the
	/// store once release has begun. A failing remote stop is logged; the slot
	/// is freed regardless.
	pub async fn release(&self) {
		if self.released.swap(true, Ordering::SeqCst) {
			return;
		}

		self.bus.close();
		if let Err(err) = self.remote.stop().await {
			warn!(target = "avatar.session", handle = %self.id, error = %err, "remote stop failed during release");
		}
		self.slot.free();
		debug!(target = "avatar.session", handle = %self.id, "session handle released");
	}
}

impl Drop for SessionHandle {
	fn drop(&mut self) {
		if self.is_released() {
			return;
		}

		warn!(target = "avatar.session", handle = %self.id, "session handle dropped without release");
		self.bus.close();
		if let Ok(runtime) = tokio::runtime::Handle::try_current() {
			let remote = Arc::clone(&self.remote);
			let id = self.id;
			runtime.spawn(async move {
				if let Err(err) = remote.stop().await {
					warn!(target = "avatar.session", handle = %id, error = %err, "background stop failed");
				}
			});
		}
	}
}

impl fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionHandle")
			.field("id", &self.id)
			.field("released", &self.is_released())
			.finish_non_exhaustive()
	}
}

/// Creates session handles through a [`SessionConnector`].
pub struct HandleFactory {
	connector: Arc<dyn SessionConnector>,
	base_path: Option<String>,
	counters: Arc<Counters>,
	next_id: AtomicU64,
}

impl HandleFactory {
	pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
		Self {
			connector,
			base_path: None,
			counters: Arc::new(Counters::default()),
			next_id: AtomicU64::new(1),
		}
	}

	/// Points every created session at `base_path` instead of the
	/// connector's default API endpoint.
	pub fn with_base_path(mut self, base_path: Option<String>) -> Self {
		self.base_path = base_path;
		self
	}

	pub fn base_path(&self) -> Option<&str> {
		self.base_path.as_deref()
	}

	/// Creates a handle bound to `token`.
	///
	/// # Errors
	///
	/// * [`Error::Auth`] when the token is empty or the service rejects it
	/// * [`Error::Negotiation`] when the service cannot create the session
	/// * [`Error::Invariant`] while another handle from this factory is live
	pub async fn create(&self, token: &str) -> Result<SessionHandle> {
		if token.trim().is_empty() {
			return Err(Error::Auth("access token is empty".to_string()));
		}

		if self
			.counters
			.live
			.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Err(Error::Invariant(
				"a session handle is already live; stop the previous session first".to_string(),
			));
		}
		let slot = LiveSlot {
			counters: Arc::clone(&self.counters),
			freed: AtomicBool::new(false),
		};

		let id = HandleId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
		let bus = EventBus::new(id);
		let request = ConnectRequest {
			token: token.to_string(),
			base_path: self.base_path.clone(),
		};
		let remote = match self.connector.connect(&request, bus.emitter()).await {
			Ok(remote) => remote,
			Err(err) => {
				bus.close();
				return Err(match err {
					Error::Auth(msg) => Error::Auth(msg),
					Error::Negotiation(msg) => Error::Negotiation(msg),
					other => Error::Negotiation(other.to_string()),
				});
			}
		};

		self.counters.created.fetch_add(1, Ordering::SeqCst);
		info!(target = "avatar.session", handle = %id, "session handle created");
		Ok(SessionHandle {
			id,
			remote,
			bus,
			slot,
			released: AtomicBool::new(false),
		})
	}

	/// Handles created and not yet released. Never exceeds one.
	pub fn live_handles(&self) -> usize {
		self.counters.live.load(Ordering::SeqCst)
	}

	/// Handles successfully created.
	pub fn created(&self) -> usize {
		self.counters.created.load(Ordering::SeqCst)
	}

	/// Slots freed, including those of failed creations.
	pub fn released(&self) -> usize {
		self.counters.released.load(Ordering::SeqCst)
	}
}
