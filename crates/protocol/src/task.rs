//! Spoken utterance tasks.

use serde::{Deserialize, Serialize};

/// How the avatar treats the submitted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
	/// Speak the text verbatim.
	#[default]
	Repeat,
	/// Treat the text as user input and speak a generated response.
	Talk,
}

/// When the speak call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
	/// Resolve once the utterance has been spoken.
	#[default]
	Sync,
	/// Resolve as soon as the task is accepted.
	Async,
}

/// A spoken utterance task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
	pub text: String,
	#[serde(default)]
	pub task_type: TaskType,
	#[serde(default)]
	pub task_mode: TaskMode,
}

impl SpeakRequest {
	/// Verbatim utterance that does not block the caller.
	pub fn repeat_async(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			task_type: TaskType::Repeat,
			task_mode: TaskMode::Async,
		}
	}

	/// Conversational turn answered by the avatar.
	pub fn talk(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			task_type: TaskType::Talk,
			task_mode: TaskMode::Sync,
		}
	}
}
