//! Conversation transcript assembled from talking-message events.
//!
//! The service streams each utterance as chunks (`*-talking-message`) and
//! closes it with an end message (`*-end-message`). Chunks from the same
//! sender are appended to that sender's open message.

use std::sync::Arc;

use avatar_protocol::EventKind;
use parking_lot::Mutex;

use crate::events::SessionEvent;
use crate::orchestrator::SessionOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
	User,
	Avatar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
	pub id: u64,
	pub sender: MessageSender,
	pub text: String,
	/// Set once the sender's end message arrived.
	pub complete: bool,
}

#[derive(Default)]
struct Transcript {
	messages: Vec<HistoryMessage>,
	next_id: u64,
}

impl Transcript {
	fn open_mut(&mut self, sender: MessageSender) -> Option<&mut HistoryMessage> {
		self.messages
			.iter_mut()
			.rev()
			.find(|m| m.sender == sender && !m.complete)
	}

	fn append(&mut self, sender: MessageSender, chunk: &str) {
		if let Some(last) = self.messages.last_mut() {
			if last.sender == sender && !last.complete {
				last.text.push_str(chunk);
				return;
			}
		}
		// Another sender spoke in between: close the previous open message.
		if let Some(open) = self.open_mut(sender) {
			open.complete = true;
		}
		self.next_id += 1;
		self.messages.push(HistoryMessage {
			id: self.next_id,
			sender,
			text: chunk.to_string(),
			complete: false,
		});
	}

	fn close(&mut self, sender: MessageSender) {
		if let Some(open) = self.open_mut(sender) {
			open.complete = true;
		}
	}
}

/// Shared, cloneable transcript of the conversation.
#[derive(Clone, Default)]
pub struct MessageHistory {
	transcript: Arc<Mutex<Transcript>>,
}

impl MessageHistory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds one event; returns whether it touched the transcript.
	pub fn apply(&self, event: &SessionEvent) -> bool {
		let mut transcript = self.transcript.lock();
		match event {
			SessionEvent::UserTalkingMessage(chunk) => transcript.append(MessageSender::User, chunk),
			SessionEvent::AvatarTalkingMessage(chunk) => transcript.append(MessageSender::Avatar, chunk),
			SessionEvent::UserEndMessage(_) => transcript.close(MessageSender::User),
			SessionEvent::AvatarEndMessage(_) => transcript.close(MessageSender::Avatar),
			_ => return false,
		}
		true
	}

	/// Follows every session started by `orchestrator`.
	pub fn register(&self, orchestrator: &SessionOrchestrator) {
		for kind in [
			EventKind::UserTalkingMessage,
			EventKind::AvatarTalkingMessage,
			EventKind::UserEndMessage,
			EventKind::AvatarEndMessage,
		] {
			let history = self.clone();
			orchestrator.on(kind, move |event| {
				history.apply(event);
			});
		}
	}

	pub fn messages(&self) -> Vec<HistoryMessage> {
		self.transcript.lock().messages.clone()
	}

	pub fn len(&self) -> usize {
		self.transcript.lock().messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.transcript.lock().messages.clear();
	}
}
