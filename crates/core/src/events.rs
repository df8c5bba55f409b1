//! Typed event registry for session handles.
//!
//! Every handle owns an [`EventBus`]. Listeners are registered per
//! [`EventKind`] and run in registration order. The connector gets an
//! [`EventEmitter`] for the same bus; once the handle is released the bus is
//! closed and late events are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use avatar_protocol::{ConnectionQuality, EventKind};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::client::MediaStream;
use crate::factory::HandleId;

/// An event emitted by a session handle, with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
	StreamReady(MediaStream),
	StreamDisconnected,
	AvatarStartTalking(Value),
	AvatarStopTalking(Value),
	UserStart(Value),
	UserStop(Value),
	UserTalkingMessage(String),
	AvatarTalkingMessage(String),
	UserEndMessage(Value),
	AvatarEndMessage(Value),
	ConnectionQualityChanged(ConnectionQuality),
}

impl SessionEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			SessionEvent::StreamReady(_) => EventKind::StreamReady,
			SessionEvent::StreamDisconnected => EventKind::StreamDisconnected,
			SessionEvent::AvatarStartTalking(_) => EventKind::AvatarStartTalking,
			SessionEvent::AvatarStopTalking(_) => EventKind::AvatarStopTalking,
			SessionEvent::UserStart(_) => EventKind::UserStart,
			SessionEvent::UserStop(_) => EventKind::UserStop,
			SessionEvent::UserTalkingMessage(_) => EventKind::UserTalkingMessage,
			SessionEvent::AvatarTalkingMessage(_) => EventKind::AvatarTalkingMessage,
			SessionEvent::UserEndMessage(_) => EventKind::UserEndMessage,
			SessionEvent::AvatarEndMessage(_) => EventKind::AvatarEndMessage,
			SessionEvent::ConnectionQualityChanged(_) => EventKind::ConnectionQualityChanged,
		}
	}

	/// Builds an event from a JSON event detail.
	///
	/// Talking messages read `detail.message`; quality reads either a bare
	/// string or `detail.quality`. `stream-ready` carries a media object rather
	/// than JSON and cannot be built here.
	pub fn from_detail(kind: EventKind, detail: Value) -> Option<Self> {
		let event = match kind {
			EventKind::StreamReady => return None,
			EventKind::StreamDisconnected => SessionEvent::StreamDisconnected,
			EventKind::AvatarStartTalking => SessionEvent::AvatarStartTalking(detail),
			EventKind::AvatarStopTalking => SessionEvent::AvatarStopTalking(detail),
			EventKind::UserStart => SessionEvent::UserStart(detail),
			EventKind::UserStop => SessionEvent::UserStop(detail),
			EventKind::UserTalkingMessage => SessionEvent::UserTalkingMessage(message_text(&detail)),
			EventKind::AvatarTalkingMessage => SessionEvent::AvatarTalkingMessage(message_text(&detail)),
			EventKind::UserEndMessage => SessionEvent::UserEndMessage(detail),
			EventKind::AvatarEndMessage => SessionEvent::AvatarEndMessage(detail),
			EventKind::ConnectionQualityChanged => {
				let raw = detail.as_str().or_else(|| detail["quality"].as_str()).unwrap_or_default();
				SessionEvent::ConnectionQualityChanged(ConnectionQuality::from_wire(raw))
			}
		};
		Some(event)
	}
}

fn message_text(detail: &Value) -> String {
	detail["message"].as_str().or_else(|| detail.as_str()).unwrap_or_default().to_string()
}

/// Callback invoked for matching events.
pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Per-handle listener registry.
pub struct EventBus {
	handle: HandleId,
	listeners: Mutex<Vec<(EventKind, Listener)>>,
	closed: AtomicBool,
}

impl EventBus {
	pub(crate) fn new(handle: HandleId) -> Arc<Self> {
		Arc::new(Self {
			handle,
			listeners: Mutex::new(Vec::new()),
			closed: AtomicBool::new(false),
		})
	}

	/// Registers `listener` for `kind`.
	pub fn on<F>(&self, kind: EventKind, listener: F)
	where
		F: Fn(&SessionEvent) + Send + Sync + 'static,
	{
		self.add_listener(kind, Arc::new(listener));
	}

	/// Registers an already shared listener for `kind`.
	pub fn add_listener(&self, kind: EventKind, listener: Listener) {
		self.listeners.lock().push((kind, listener));
	}

	/// Number of listeners registered for `kind`.
	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.listeners.lock().iter().filter(|(k, _)| *k == kind).count()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Stops delivery and drops every listener.
	pub(crate) fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.listeners.lock().clear();
	}

	pub(crate) fn emitter(self: &Arc<Self>) -> EventEmitter {
		EventEmitter { bus: Arc::clone(self) }
	}

	fn dispatch(&self, event: &SessionEvent) -> usize {
		let kind = event.kind();
		if self.is_closed() {
			debug!(target = "avatar.events", handle = %self.handle, event = %kind, "dropping event for released handle");
			return 0;
		}

		// Listeners may call back into the store, so they run outside the lock.
		let matching: Vec<Listener> = self
			.listeners
			.lock()
			.iter()
			.filter(|(k, _)| *k == kind)
			.map(|(_, listener)| Arc::clone(listener))
			.collect();

		trace!(target = "avatar.events", handle = %self.handle, event = %kind, listeners = matching.len(), "dispatching event");
		for listener in &matching {
			listener(event);
		}
		matching.len()
	}
}

/// Sending side of a handle's event bus, given to the connector.
#[derive(Clone)]
pub struct EventEmitter {
	bus: Arc<EventBus>,
}

impl EventEmitter {
	/// Delivers `event` to its listeners; returns how many ran.
	pub fn emit(&self, event: SessionEvent) -> usize {
		self.bus.dispatch(&event)
	}

	pub fn handle_id(&self) -> HandleId {
		self.bus.handle
	}

	pub fn is_closed(&self) -> bool {
		self.bus.is_closed()
	}
}
