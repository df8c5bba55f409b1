//! Declarative configuration supplied once per session start.

use serde::{Deserialize, Serialize};

/// Language tag used when the configuration does not name one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Rendering quality tier requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarQuality {
	Low,
	#[default]
	Medium,
	High,
}

/// Emotional tone applied by the voice synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceEmotion {
	#[default]
	Excited,
	Serious,
	Friendly,
	Soothing,
	Broadcaster,
}

/// Speech synthesis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceModel {
	#[default]
	#[serde(rename = "eleven_flash_v2_5")]
	ElevenFlashV25,
	ElevenMultilingualV2,
}

/// Transport used by the voice-chat sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceChatTransport {
	#[default]
	Websocket,
	Livekit,
}

/// Speech-to-text provider used for user speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
	#[default]
	Deepgram,
	Gladia,
}

/// Voice parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
	/// Speaking rate multiplier, 1.0 is the natural rate.
	#[serde(default = "default_rate")]
	pub rate: f32,
	#[serde(default)]
	pub emotion: VoiceEmotion,
	#[serde(default)]
	pub model: VoiceModel,
	/// Explicit voice identifier overriding the avatar's own voice.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub voice_id: Option<String>,
}

impl Default for VoiceSettings {
	fn default() -> Self {
		Self {
			rate: default_rate(),
			emotion: VoiceEmotion::default(),
			model: VoiceModel::default(),
			voice_id: None,
		}
	}
}

fn default_rate() -> f32 {
	1.0
}

/// Speech-to-text settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SttSettings {
	#[serde(default)]
	pub provider: SttProvider,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confidence: Option<f32>,
}

/// Immutable description of a session to start.
///
/// Serializes with the camelCase keys the service expects:
///
/// ```json
/// {
///   "quality": "medium",
///   "avatarName": "Ann_Therapist_public",
///   "voice": { "rate": 1.5, "emotion": "excited", "model": "eleven_flash_v2_5" },
///   "language": "en",
///   "voiceChatTransport": "websocket",
///   "sttSettings": { "provider": "deepgram" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
	#[serde(default)]
	pub quality: AvatarQuality,
	pub avatar_name: String,
	/// Knowledge base the avatar answers from. Omitted when not configured.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub knowledge_id: Option<String>,
	#[serde(default)]
	pub voice: VoiceSettings,
	#[serde(default = "default_language")]
	pub language: String,
	#[serde(default)]
	pub voice_chat_transport: VoiceChatTransport,
	#[serde(default)]
	pub stt_settings: SttSettings,
}

fn default_language() -> String {
	DEFAULT_LANGUAGE.to_string()
}

impl StartConfig {
	/// Creates a configuration for `avatar_name` with default settings.
	pub fn new(avatar_name: impl Into<String>) -> Self {
		Self {
			quality: AvatarQuality::default(),
			avatar_name: avatar_name.into(),
			knowledge_id: None,
			voice: VoiceSettings::default(),
			language: default_language(),
			voice_chat_transport: VoiceChatTransport::default(),
			stt_settings: SttSettings::default(),
		}
	}

	/// Sets the quality tier.
	pub fn with_quality(mut self, quality: AvatarQuality) -> Self {
		self.quality = quality;
		self
	}

	/// Sets or clears the knowledge base identifier.
	pub fn with_knowledge_id(mut self, knowledge_id: Option<String>) -> Self {
		self.knowledge_id = knowledge_id;
		self
	}

	/// Sets the voice parameters.
	pub fn with_voice(mut self, voice: VoiceSettings) -> Self {
		self.voice = voice;
		self
	}

	/// Sets the target language tag.
	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = language.into();
		self
	}

	/// Sets the voice-chat transport.
	pub fn with_transport(mut self, transport: VoiceChatTransport) -> Self {
		self.voice_chat_transport = transport;
		self
	}

	/// Sets the speech-to-text provider.
	pub fn with_stt_provider(mut self, provider: SttProvider) -> Self {
		self.stt_settings.provider = provider;
		self
	}
}

/// Options for opening the voice-chat sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceChatOptions {
	/// Let the service prompt the user after a stretch of silence.
	#[serde(default)]
	pub use_silence_prompt: bool,
}
