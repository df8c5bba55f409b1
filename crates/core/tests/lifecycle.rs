//! Session lifecycle tests against the in-memory service.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use avatar::media::PLAYBACK_BLOCKED_HINT;
use avatar::protocol::{ConnectionQuality, EventKind, SpeakRequest, StartConfig, VoiceChatOptions};
use avatar::testing::{FakeConnector, FakeController, FakeSurface, StaticTokenSource};
use avatar::{
	Error, FailureKind, MediaStream, MessageHistory, MessageSender, PlaybackError, PlaybackOutcome, PlaybackSurface,
	SessionEvent, SessionOrchestrator, SessionSnapshot, SessionState, StartOptions, StartOutcome, Transition,
	VoiceChatState,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
	orchestrator: SessionOrchestrator,
	controller: FakeController,
	surface: Arc<FakeSurface>,
	tokens: Arc<StaticTokenSource>,
}

fn harness_with(tokens: StaticTokenSource) -> Harness {
	let connector = FakeConnector::new();
	let controller = connector.controller();
	let surface = Arc::new(FakeSurface::new());
	let tokens = Arc::new(tokens);
	let orchestrator = SessionOrchestrator::builder()
		.shared_tokens(tokens.clone())
		.connector(connector)
		.surface(surface.clone())
		.build()
		.unwrap();
	Harness {
		orchestrator,
		controller,
		surface,
		tokens,
	}
}

fn harness() -> Harness {
	harness_with(StaticTokenSource::new("tok_123"))
}

fn config() -> StartConfig {
	StartConfig::new("Ann_Therapist_public")
}

async fn start(h: &Harness) -> StartOutcome {
	h.orchestrator.start_session(config(), StartOptions::default()).await.unwrap()
}

async fn connected(h: &Harness) -> MediaStream {
	let stream = MediaStream::audio_video("stream-1");
	h.controller.emit_stream_on_start(stream.clone());
	assert!(matches!(start(h).await, StartOutcome::Started(_)));
	assert_eq!(h.orchestrator.state(), SessionState::Connected);
	stream
}

fn assert_reset(snapshot: &SessionSnapshot) {
	assert_eq!(snapshot.state, SessionState::Inactive);
	assert!(snapshot.handle.is_none());
	assert!(snapshot.stream.is_none());
	assert_eq!(snapshot.voice_chat, VoiceChatState::Off);
	assert_eq!(snapshot.quality, ConnectionQuality::Unknown);
	assert!(snapshot.playback_blocked.is_none());
}

#[tokio::test]
async fn token_then_stream_ready_connects() {
	let h = harness();
	let outcome = start(&h).await;
	let StartOutcome::Started(id) = outcome else {
		panic!("expected a started session, got {outcome:?}");
	};
	assert_eq!(h.orchestrator.state(), SessionState::Connecting);
	assert_eq!(h.controller.tokens(), ["tok_123"]);

	let stream = MediaStream::audio_video("S");
	h.controller.emit_stream_ready(stream.clone());

	let snapshot = h.orchestrator.snapshot();
	assert_eq!(snapshot.state, SessionState::Connected);
	assert_eq!(snapshot.handle, Some(id));
	assert_eq!(snapshot.stream, Some(stream.clone()));
	assert_eq!(snapshot.voice_chat, VoiceChatState::Off);
	assert_eq!(snapshot.pending, None);
	assert_eq!(h.surface.bound(), Some(stream));
	assert_eq!(h.surface.play_calls(), 1);
}

#[tokio::test]
async fn empty_token_is_an_auth_failure() {
	let h = harness_with(StaticTokenSource::new(""));
	let err = h
		.orchestrator
		.start_session(config(), StartOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Auth(_)));
	assert_eq!(h.controller.connects(), 0);

	let snapshot = h.orchestrator.snapshot();
	assert_reset(&snapshot);
	assert_eq!(snapshot.failure.as_ref().map(|f| f.kind), Some(FailureKind::Auth));
	assert!(snapshot.can_start());

	assert!(h.orchestrator.dismiss_failure());
	assert!(h.orchestrator.snapshot().failure.is_none());
	assert!(!h.orchestrator.dismiss_failure());
}

#[tokio::test]
async fn token_endpoint_failure_leaves_session_inactive() {
	let h = harness_with(StaticTokenSource::rejecting("endpoint returned 500"));
	let err = h
		.orchestrator
		.start_session(config(), StartOptions::default())
		.await
		.unwrap_err();
	assert!(err.is_retryable());
	assert_eq!(h.tokens.fetches(), 1);
	assert_reset(&h.orchestrator.snapshot());
	assert_eq!(h.orchestrator.live_handles(), 0);
}

#[tokio::test]
async fn disconnect_forces_voice_chat_off() {
	let h = harness();
	connected(&h).await;
	h.orchestrator.start_voice_chat(VoiceChatOptions::default()).await.unwrap();
	assert_eq!(h.orchestrator.snapshot().voice_chat, VoiceChatState::On);

	h.controller.disconnect();
	assert_reset(&h.orchestrator.snapshot());
	assert!(h.surface.bound().is_none());

	assert!(h.orchestrator.wait_for_idle(WAIT).await);
	assert_eq!(h.controller.stop_calls(), 1);
	assert_eq!(h.orchestrator.live_handles(), 0);
	assert!(h.orchestrator.snapshot().failure.is_none());
}

#[tokio::test]
async fn blocked_autoplay_keeps_session_and_recovers_on_retry() {
	let h = harness();
	h.surface.block_autoplay(1);
	connected(&h).await;

	let snapshot = h.orchestrator.snapshot();
	assert_eq!(snapshot.state, SessionState::Connected);
	let blocked = snapshot.playback_blocked.expect("playback should be blocked");
	assert_eq!(blocked.hint(), PLAYBACK_BLOCKED_HINT);

	assert_eq!(h.orchestrator.retry_playback(), PlaybackOutcome::Playing);
	let snapshot = h.orchestrator.snapshot();
	assert_eq!(snapshot.state, SessionState::Connected);
	assert!(snapshot.playback_blocked.is_none());
}

#[tokio::test]
async fn retry_without_session_is_unbound() {
	let h = harness();
	assert_eq!(h.orchestrator.retry_playback(), PlaybackOutcome::Unbound);
}

#[tokio::test]
async fn never_more_than_one_live_session() {
	let h = harness();
	h.controller.emit_stream_on_start(MediaStream::audio_video("s"));

	for _ in 0..5 {
		assert!(matches!(start(&h).await, StartOutcome::Started(_)));
		assert!(h.orchestrator.live_handles() <= 1);
		let err = h
			.orchestrator
			.start_session(config(), StartOptions::default())
			.await
			.unwrap_err();
		assert!(err.is_contract_violation());
		h.orchestrator.stop_session().await;
		assert_eq!(h.orchestrator.live_handles(), 0);
	}

	assert_eq!(h.controller.max_live_sessions(), 1);
	assert_eq!(h.controller.connects(), 5);
	assert_eq!(h.controller.stop_calls(), 5);
}

#[tokio::test]
async fn concurrent_start_is_busy() {
	let h = harness();
	let gate = h.controller.hold_next_start();
	let first = tokio::spawn({
		let orchestrator = h.orchestrator.clone();
		async move { orchestrator.start_session(config(), StartOptions::default()).await }
	});
	h.controller.wait_for_start_calls(1).await;

	let err = h
		.orchestrator
		.start_session(config(), StartOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Busy { pending: Transition::Start }));
	assert_eq!(h.orchestrator.snapshot().pending, Some(Transition::Start));

	gate.open();
	let outcome = first.await.unwrap().unwrap();
	assert!(matches!(outcome, StartOutcome::Started(_)));
	assert_eq!(h.controller.connects(), 1);
}

#[tokio::test]
async fn stop_when_inactive_is_a_no_op() {
	let h = harness();
	h.orchestrator.stop_session().await;
	h.orchestrator.stop_session().await;
	assert_eq!(h.controller.stop_calls(), 0);
	assert_eq!(h.orchestrator.snapshot(), SessionSnapshot::default());
}

#[tokio::test]
async fn repeated_stop_releases_once() {
	let h = harness();
	connected(&h).await;
	h.orchestrator.stop_session().await;
	h.orchestrator.stop_session().await;
	assert_eq!(h.controller.stop_calls(), 1);
	assert_reset(&h.orchestrator.snapshot());
	assert_eq!(h.surface.bound(), None);
}

#[tokio::test]
async fn listeners_registered_before_start_see_synchronous_stream_ready() {
	let h = harness();
	let seen = Arc::new(AtomicUsize::new(0));
	h.orchestrator.on(EventKind::StreamReady, {
		let seen = seen.clone();
		move |event| {
			assert!(matches!(event, SessionEvent::StreamReady(_)));
			seen.fetch_add(1, Ordering::SeqCst);
		}
	});

	connected(&h).await;
	assert_eq!(seen.load(Ordering::SeqCst), 1);

	// Persistent observers follow the next session too.
	h.orchestrator.stop_session().await;
	connected(&h).await;
	assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn late_start_after_stop_does_not_repopulate() {
	let h = harness();
	h.controller.emit_stream_on_start(MediaStream::audio_video("late"));
	let gate = h.controller.hold_next_start();
	let pending = tokio::spawn({
		let orchestrator = h.orchestrator.clone();
		async move { orchestrator.start_session(config(), StartOptions::default()).await }
	});
	h.controller.wait_for_start_calls(1).await;
	assert_eq!(h.orchestrator.state(), SessionState::Connecting);

	h.orchestrator.stop_session().await;
	gate.open();

	assert_eq!(pending.await.unwrap().unwrap(), StartOutcome::Cancelled);
	assert_reset(&h.orchestrator.snapshot());
	assert_eq!(h.orchestrator.live_handles(), 0);
	assert_eq!(h.controller.max_live_sessions(), 1);
	assert!(h.surface.bound().is_none());

	// The orchestrator is reusable afterwards.
	assert!(h.orchestrator.wait_for_idle(WAIT).await);
	connected(&h).await;
}

#[tokio::test]
async fn negotiation_failure_releases_the_handle() {
	let h = harness();
	h.controller.fail_next_start(Error::Negotiation("service refused the session".into()));

	let err = h
		.orchestrator
		.start_session(config(), StartOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Negotiation(_)));
	let snapshot = h.orchestrator.snapshot();
	assert_reset(&snapshot);
	assert_eq!(snapshot.failure.map(|f| f.kind), Some(FailureKind::Negotiation));
	assert_eq!(h.controller.stop_calls(), 1);
	assert_eq!(h.orchestrator.live_handles(), 0);

	// A retry clears the failure and succeeds.
	connected(&h).await;
	assert!(h.orchestrator.snapshot().failure.is_none());
}

#[tokio::test]
async fn rejected_connect_is_reported_as_auth() {
	let h = harness();
	h.controller.reject_next_connect(Error::Auth("token expired".into()));
	let err = h
		.orchestrator
		.start_session(config(), StartOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Auth(_)));
	assert_eq!(h.controller.connects(), 1);
	assert_eq!(h.controller.start_calls(), 0);
	assert_eq!(h.orchestrator.live_handles(), 0);
}

#[tokio::test]
async fn speak_requires_a_connected_session() {
	let h = harness();
	let err = h.orchestrator.speak(SpeakRequest::talk("hello")).await.unwrap_err();
	assert!(matches!(err, Error::Invariant(_)));

	connected(&h).await;
	h.orchestrator.speak(SpeakRequest::talk("hello")).await.unwrap();
	assert_eq!(h.controller.spoken(), [SpeakRequest::talk("hello")]);
}

#[tokio::test]
async fn preamble_is_spoken_once_stream_is_ready() {
	let h = harness();
	h.controller.emit_stream_on_start(MediaStream::audio_video("s"));
	h.orchestrator
		.start_session(config(), StartOptions::default().with_preamble("Hello! How can I help?"))
		.await
		.unwrap();

	for _ in 0..50 {
		if !h.controller.spoken().is_empty() {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert_eq!(h.controller.spoken(), [SpeakRequest::repeat_async("Hello! How can I help?")]);
}

#[tokio::test]
async fn voice_chat_requires_connected_and_is_idempotent() {
	let h = harness();
	let err = h
		.orchestrator
		.start_voice_chat(VoiceChatOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Invariant(_)));

	connected(&h).await;
	h.orchestrator.start_voice_chat(VoiceChatOptions::default()).await.unwrap();
	h.orchestrator.start_voice_chat(VoiceChatOptions::default()).await.unwrap();
	assert_eq!(h.controller.voice_chat_starts(), 1);

	h.orchestrator.stop_voice_chat().await.unwrap();
	h.orchestrator.stop_voice_chat().await.unwrap();
	assert_eq!(h.controller.voice_chat_closes(), 1);
	assert_eq!(h.orchestrator.snapshot().voice_chat, VoiceChatState::Off);
}

#[tokio::test]
async fn failed_voice_chat_stays_off() {
	let h = harness();
	connected(&h).await;
	h.controller.fail_next_voice_chat(Error::Task("microphone unavailable".into()));

	let err = h
		.orchestrator
		.start_voice_chat(VoiceChatOptions::default())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Task(_)));
	let snapshot = h.orchestrator.snapshot();
	assert_eq!(snapshot.voice_chat, VoiceChatState::Off);
	assert_eq!(snapshot.state, SessionState::Connected);
	assert_eq!(snapshot.pending, None);
}

#[tokio::test]
async fn start_option_opens_voice_chat_after_ready() {
	let h = harness();
	h.controller.emit_stream_on_start(MediaStream::audio_video("s"));
	let options = StartOptions::default().with_voice_chat(VoiceChatOptions { use_silence_prompt: true });
	h.orchestrator.start_session(config(), options).await.unwrap();

	assert_eq!(h.orchestrator.snapshot().voice_chat, VoiceChatState::On);
	assert_eq!(h.controller.voice_chat_starts(), 1);
}

#[tokio::test]
async fn voice_chat_option_gives_up_when_stream_never_arrives() {
	let h = harness();
	let options = StartOptions::default()
		.with_voice_chat(VoiceChatOptions::default())
		.with_ready_timeout(Duration::from_millis(50));
	let outcome = h.orchestrator.start_session(config(), options).await.unwrap();

	assert!(matches!(outcome, StartOutcome::Started(_)));
	assert_eq!(h.orchestrator.state(), SessionState::Connecting);
	assert_eq!(h.controller.voice_chat_starts(), 0);
}

#[tokio::test]
async fn quality_follows_last_event_and_resets() {
	let h = harness();
	connected(&h).await;
	assert_eq!(h.orchestrator.snapshot().quality, ConnectionQuality::Unknown);

	h.controller.emit(SessionEvent::ConnectionQualityChanged(ConnectionQuality::Bad));
	h.controller.emit(SessionEvent::ConnectionQualityChanged(ConnectionQuality::Good));
	assert_eq!(h.orchestrator.snapshot().quality, ConnectionQuality::Good);

	h.orchestrator.stop_session().await;
	assert_eq!(h.orchestrator.snapshot().quality, ConnectionQuality::Unknown);

	// Events from the released handle no longer reach anyone.
	assert_eq!(h.controller.emit(SessionEvent::ConnectionQualityChanged(ConnectionQuality::Bad)), 0);
	assert_eq!(h.orchestrator.snapshot().quality, ConnectionQuality::Unknown);
}

#[tokio::test]
async fn dropping_the_scope_tears_down() {
	let h = harness();
	{
		let scope = h.orchestrator.scope();
		h.controller.emit_stream_on_start(MediaStream::audio_video("s"));
		scope.start_session(config(), StartOptions::default()).await.unwrap();
		assert_eq!(scope.state(), SessionState::Connected);
	}

	assert_reset(&h.orchestrator.snapshot());
	assert!(h.orchestrator.wait_for_idle(WAIT).await);
	assert_eq!(h.controller.stop_calls(), 1);
	assert_eq!(h.orchestrator.live_handles(), 0);
}

#[tokio::test]
async fn closing_the_scope_waits_for_release() {
	let h = harness();
	let scope = h.orchestrator.scope();
	h.controller.emit_stream_on_start(MediaStream::audio_video("s"));
	scope.start_session(config(), StartOptions::default()).await.unwrap();

	scope.close().await;
	assert_eq!(h.controller.stop_calls(), 1);
	assert_eq!(h.orchestrator.snapshot().pending, None);
}

#[tokio::test]
async fn restart_after_disconnect_waits_for_release() {
	let h = harness();
	connected(&h).await;
	h.controller.disconnect();

	assert!(h.orchestrator.wait_for_idle(WAIT).await);
	connected(&h).await;
	assert_eq!(h.controller.connects(), 2);
	assert_eq!(h.tokens.fetches(), 2);
	assert_eq!(h.controller.max_live_sessions(), 1);
}

#[tokio::test]
async fn attach_needs_an_active_handle() {
	let h = harness();
	let err = h.orchestrator.attach(EventKind::UserStart, |_| {}).unwrap_err();
	assert!(matches!(err, Error::Invariant(_)));

	connected(&h).await;
	let seen = Arc::new(AtomicUsize::new(0));
	h.orchestrator
		.attach(EventKind::UserStart, {
			let seen = seen.clone();
			move |_| {
				seen.fetch_add(1, Ordering::SeqCst);
			}
		})
		.unwrap();
	h.controller.emit(SessionEvent::UserStart(serde_json::json!({})));
	assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn history_collects_the_transcript() {
	let h = harness();
	let history = MessageHistory::new();
	history.register(&h.orchestrator);
	connected(&h).await;

	h.controller.emit(SessionEvent::UserTalkingMessage("How are ".into()));
	h.controller.emit(SessionEvent::UserTalkingMessage("you?".into()));
	h.controller.emit(SessionEvent::UserEndMessage(serde_json::json!({})));
	h.controller.emit(SessionEvent::AvatarTalkingMessage("Great, thanks.".into()));
	h.controller.emit(SessionEvent::AvatarEndMessage(serde_json::json!({})));

	let messages = history.messages();
	assert_eq!(messages.len(), 2);
	assert_eq!(messages[0].sender, MessageSender::User);
	assert_eq!(messages[0].text, "How are you?");
	assert_eq!(messages[1].sender, MessageSender::Avatar);
	assert!(messages.iter().all(|m| m.complete));
}

#[tokio::test]
async fn subscribers_observe_connecting_then_connected() {
	let h = harness();
	let mut rx = h.orchestrator.subscribe();
	start(&h).await;
	assert_eq!(rx.borrow_and_update().state, SessionState::Connecting);

	h.controller.emit_stream_ready(MediaStream::audio_video("s"));
	assert!(rx.has_changed().unwrap());
	assert_eq!(rx.borrow_and_update().state, SessionState::Connected);
	assert!(h.orchestrator.wait_for_state(SessionState::Connected, WAIT).await);
}

#[tokio::test]
async fn stop_during_connect_releases_the_late_handle() {
	let h = harness();
	let gate = h.controller.hold_next_connect();
	let pending = tokio::spawn({
		let orchestrator = h.orchestrator.clone();
		async move { orchestrator.start_session(config(), StartOptions::default()).await }
	});
	h.controller.wait_for_connects(1).await;
	assert_eq!(h.orchestrator.snapshot().pending, Some(Transition::Start));

	h.orchestrator.stop_session().await;
	gate.open();

	assert_eq!(pending.await.unwrap().unwrap(), StartOutcome::Cancelled);
	assert_eq!(h.orchestrator.live_handles(), 0);
	assert_eq!(h.controller.live_sessions(), 0);
	assert_eq!(h.controller.stop_calls(), 1);
	assert_eq!(h.controller.start_calls(), 0);
	let snapshot = h.orchestrator.snapshot();
	assert_reset(&snapshot);
	assert!(snapshot.failure.is_none());
	assert!(snapshot.can_start());
}

#[tokio::test]
async fn failure_after_stop_is_not_reported() {
	let h = harness();
	h.controller.reject_next_connect(Error::Negotiation("service unavailable".into()));
	let gate = h.controller.hold_next_connect();
	let pending = tokio::spawn({
		let orchestrator = h.orchestrator.clone();
		async move { orchestrator.start_session(config(), StartOptions::default()).await }
	});
	h.controller.wait_for_connects(1).await;

	h.orchestrator.stop_session().await;
	gate.open();

	assert_eq!(pending.await.unwrap().unwrap(), StartOutcome::Cancelled);
	let snapshot = h.orchestrator.snapshot();
	assert!(snapshot.failure.is_none());
	assert!(snapshot.can_start());
	assert_eq!(h.orchestrator.live_handles(), 0);
}

#[tokio::test]
async fn base_path_is_passed_to_the_connector() {
	let connector = FakeConnector::new();
	let controller = connector.controller();
	let orchestrator = SessionOrchestrator::builder()
		.tokens(StaticTokenSource::new("tok"))
		.connector(connector)
		.base_path("https://api.example.test")
		.build()
		.unwrap();

	orchestrator.start_session(config(), StartOptions::default()).await.unwrap();
	assert_eq!(controller.base_paths(), [Some("https://api.example.test".to_string())]);
	orchestrator.stop_session().await;
}

/// Surface whose `bind` takes long enough for a stop to overlap it.
#[derive(Default)]
struct SlowSurface {
	bound: Mutex<Option<MediaStream>>,
}

impl PlaybackSurface for SlowSurface {
	fn bind(&self, stream: &MediaStream) {
		std::thread::sleep(Duration::from_millis(200));
		*self.bound.lock() = Some(stream.clone());
	}

	fn unbind(&self) {
		*self.bound.lock() = None;
	}

	fn play(&self) -> Result<(), PlaybackError> {
		Ok(())
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_during_slow_attach_leaves_surface_unbound() {
	let connector = FakeConnector::new();
	let controller = connector.controller();
	let surface = Arc::new(SlowSurface::default());
	let orchestrator = SessionOrchestrator::builder()
		.tokens(StaticTokenSource::new("tok"))
		.connector(connector)
		.surface(surface.clone())
		.build()
		.unwrap();
	assert!(matches!(start_with(&orchestrator).await, StartOutcome::Started(_)));

	let ready = tokio::task::spawn_blocking({
		let controller = controller.clone();
		move || controller.emit_stream_ready(MediaStream::audio_video("S"))
	});
	tokio::time::sleep(Duration::from_millis(50)).await;
	orchestrator.stop_session().await;
	ready.await.unwrap();

	let snapshot = orchestrator.snapshot();
	assert_eq!(snapshot.state, SessionState::Inactive);
	assert!(snapshot.stream.is_none());
	assert!(surface.bound.lock().is_none(), "surface still bound after stop");

	// Stream-ready arriving after the stop is dropped by the closed bus.
	assert_eq!(controller.emit_stream_ready(MediaStream::audio_video("S")), 0);
	assert!(surface.bound.lock().is_none());
}

async fn start_with(orchestrator: &SessionOrchestrator) -> StartOutcome {
	orchestrator.start_session(config(), StartOptions::default()).await.unwrap()
}
