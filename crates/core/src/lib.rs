//! Lifecycle orchestration for realtime streaming avatar sessions.
//!
//! [`SessionOrchestrator`] takes a session from `Inactive` through token
//! acquisition and negotiation to a live stream bound to a playback surface,
//! optionally opens a voice-chat channel, and tears everything down on stop,
//! disconnect or scope exit. The remote service is reached through the
//! [`SessionConnector`] and [`RemoteSession`] traits; [`testing`] provides an
//! in-memory implementation.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod history;
pub mod media;
pub mod orchestrator;
pub mod quality;
pub mod store;
pub mod testing;
pub mod token;

pub use client::{ConnectRequest, MediaStream, RemoteSession, SessionConnector, TrackKind};
pub use config::ClientConfig;
pub use error::{Error, Result, Transition};
pub use events::{EventBus, EventEmitter, Listener, SessionEvent};
pub use factory::{HandleFactory, HandleId, SessionHandle};
pub use history::{HistoryMessage, MessageHistory, MessageSender};
pub use media::{MediaAttachment, PlaybackBlocked, PlaybackError, PlaybackOutcome, PlaybackSurface};
pub use orchestrator::{OrchestratorBuilder, SessionOrchestrator, SessionScope, StartOptions, StartOutcome};
pub use quality::QualityMonitor;
pub use store::{FailureKind, LifecycleStore, SessionFailure, SessionSnapshot, SessionState, VoiceChatState};
pub use token::{HttpTokenSource, TokenSource};

pub use avatar_protocol as protocol;
