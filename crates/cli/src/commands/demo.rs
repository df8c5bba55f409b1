//! Scripted session against the in-process fake service.
//!
//! Exercises the whole lifecycle without a network: token, negotiation,
//! stream attach (optionally through a blocked autoplay and a retry), voice
//! chat, a short scripted conversation, and teardown.

use std::sync::Arc;
use std::time::Duration;

use avatar::testing::{FakeConnector, FakeSurface, StaticTokenSource};
use avatar::{
	ClientConfig, MediaStream, MessageHistory, MessageSender, PlaybackOutcome, SessionEvent, SessionOrchestrator,
	StartOptions, StartOutcome, VoiceChatState,
};
use avatar_protocol::{ConnectionQuality, SpeakRequest, VoiceChatOptions};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cli::DemoArgs;
use crate::error::Result;

const DEMO_TOKEN: &str = "demo-token";
const DEMO_STREAM: &str = "demo-stream";
const PREAMBLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
	pub sender: &'static str,
	pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoReport {
	pub avatar: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub base_path: Option<String>,
	pub handle: Option<String>,
	/// Lifecycle states observed: before start, after start, after stop.
	pub states: Vec<String>,
	pub voice_chat: bool,
	pub quality: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub playback_blocked: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub playback_retried: Option<bool>,
	pub spoken: Vec<String>,
	pub transcript: Vec<TranscriptLine>,
	pub remote_stops: usize,
	pub live_handles: usize,
}

pub async fn run_demo(config: &ClientConfig, args: &DemoArgs) -> Result<DemoReport> {
	let connector = FakeConnector::new();
	let controller = connector.controller();
	let surface = Arc::new(FakeSurface::new());
	if args.block_autoplay {
		surface.block_autoplay(1);
	}
	let mut builder = SessionOrchestrator::builder()
		.tokens(StaticTokenSource::new(DEMO_TOKEN))
		.connector(connector)
		.surface(surface);
	if let Some(base_path) = &config.base_path {
		builder = builder.base_path(base_path.clone());
	}
	let orchestrator = builder.build()?;
	let history = MessageHistory::new();
	history.register(&orchestrator);

	let mut start = config.start.clone();
	if let Some(avatar) = &args.avatar {
		start.avatar_name = avatar.clone();
	}
	let preamble = args.preamble.clone().or_else(|| config.greeting().map(str::to_string));
	let mut options = StartOptions::default().with_ready_timeout(Duration::from_secs(5));
	if let Some(preamble) = &preamble {
		options = options.with_preamble(preamble.clone());
	}
	if args.voice_chat {
		options = options.with_voice_chat(VoiceChatOptions::default());
	}

	let mut states = vec![orchestrator.state().to_string()];
	controller.emit_stream_on_start(MediaStream::audio_video(DEMO_STREAM));
	info!(target = "avatar.cli", avatar = %start.avatar_name, "starting demo session");
	let avatar = start.avatar_name.clone();
	let handle = match orchestrator.start_session(start, options).await? {
		StartOutcome::Started(id) => Some(id.to_string()),
		StartOutcome::Cancelled => None,
	};
	states.push(orchestrator.state().to_string());

	let playback_blocked = orchestrator.snapshot().playback_blocked.map(|blocked| blocked.reason);
	let playback_retried = playback_blocked
		.as_ref()
		.map(|_| orchestrator.retry_playback() == PlaybackOutcome::Playing);

	controller.emit(SessionEvent::ConnectionQualityChanged(ConnectionQuality::Good));
	for text in &args.say {
		controller.emit(SessionEvent::UserTalkingMessage(text.clone()));
		controller.emit(SessionEvent::UserEndMessage(json!({})));
		orchestrator.speak(SpeakRequest::talk(text.clone())).await?;
		controller.emit(SessionEvent::AvatarTalkingMessage(format!("You said: {text}")));
		controller.emit(SessionEvent::AvatarEndMessage(json!({})));
	}

	if preamble.is_some() {
		let deadline = tokio::time::Instant::now() + PREAMBLE_WAIT;
		while controller.spoken().len() <= args.say.len() && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	let snapshot = orchestrator.snapshot();
	orchestrator.stop_session().await;
	states.push(orchestrator.state().to_string());

	Ok(DemoReport {
		avatar,
		base_path: controller.base_paths().into_iter().flatten().next(),
		handle,
		states,
		voice_chat: snapshot.voice_chat == VoiceChatState::On,
		quality: snapshot.quality.to_string(),
		playback_blocked,
		playback_retried,
		spoken: controller.spoken().into_iter().map(|request| request.text).collect(),
		transcript: history
			.messages()
			.into_iter()
			.map(|message| TranscriptLine {
				sender: match message.sender {
					MessageSender::User => "user",
					MessageSender::Avatar => "avatar",
				},
				text: message.text,
			})
			.collect(),
		remote_stops: controller.stop_calls(),
		live_handles: orchestrator.live_handles(),
	})
}
