use std::path::Path;
use std::process::Command;

use serde_json::{Value, json};
use tempfile::TempDir;

const ENV_VARS: [&str; 3] = ["AVATAR_TOKEN_URL", "AVATAR_BASE_API_URL", "AVATAR_KNOWLEDGE_BASE_ID"];

fn avatar_command(workdir: &Path) -> Command {
	let mut command = Command::new(env!("CARGO_BIN_EXE_avatar"));
	command.current_dir(workdir).env_remove("RUST_LOG");
	for var in ENV_VARS {
		command.env_remove(var);
	}
	command
}

fn run_json(command: &mut Command) -> (bool, Value, String) {
	let output = command.output().expect("failed to execute avatar");
	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(output.status.success(), parsed, stderr)
}

#[test]
fn config_show_merges_file_and_environment() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let file = tmp.path().join("avatar.json");
	std::fs::write(
		&file,
		json!({
			"start": { "avatarName": "Wayne_20240711", "quality": "high" },
			"preamble": "Hi there"
		})
		.to_string(),
	)
	.unwrap();

	let (success, json, stderr) = run_json(
		avatar_command(tmp.path())
			.args(["config", "show", "--config"])
			.arg(&file)
			.env("AVATAR_TOKEN_URL", "http://localhost:3000/api/get-access-token")
			.env("AVATAR_KNOWLEDGE_BASE_ID", "kb_7"),
	);
	assert!(success, "config show failed: {stderr}");
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "config show");
	assert_eq!(json["data"]["tokenUrl"], "http://localhost:3000/api/get-access-token");
	assert_eq!(json["data"]["start"]["avatarName"], "Wayne_20240711");
	assert_eq!(json["data"]["start"]["quality"], "high");
	assert_eq!(json["data"]["start"]["knowledgeId"], "kb_7");
	assert_eq!(json["data"]["preamble"], "Hi there");
}

#[test]
fn missing_config_file_fails_with_envelope() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, json, _) = run_json(avatar_command(tmp.path()).args(["config", "show", "--config", "nope.json"]));
	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}

#[test]
fn token_fetch_without_url_is_invalid_input() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, json, _) = run_json(avatar_command(tmp.path()).args(["token", "fetch"]));
	assert!(!success);
	assert_eq!(json["command"], "token fetch");
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}

#[test]
fn token_fetch_rejects_a_malformed_url() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, json, _) = run_json(avatar_command(tmp.path()).args(["token", "fetch", "--url", "not a url"]));
	assert!(!success);
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
	let message = json["error"]["message"].as_str().unwrap_or_default();
	assert!(message.starts_with("invalid input: --url"), "unexpected message: {message}");
}

#[test]
fn demo_passes_the_base_path_from_the_environment() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, json, stderr) = run_json(
		avatar_command(tmp.path())
			.arg("demo")
			.env("AVATAR_BASE_API_URL", "https://api.example.test"),
	);
	assert!(success, "demo failed: {stderr}");
	assert_eq!(json["data"]["basePath"], "https://api.example.test");
}

#[test]
fn demo_reports_a_full_lifecycle() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let (success, json, stderr) = run_json(avatar_command(tmp.path()).args([
		"demo",
		"--avatar",
		"Ann_Therapist_public",
		"--voice-chat",
		"--block-autoplay",
		"--say",
		"hello",
	]));
	assert!(success, "demo failed: {stderr}");
	let data = &json["data"];
	assert_eq!(data["avatar"], "Ann_Therapist_public");
	assert_eq!(data["states"], json!(["inactive", "connected", "inactive"]));
	assert_eq!(data["voiceChat"], true);
	assert_eq!(data["playbackRetried"], true);
	assert_eq!(data["remoteStops"], 1);
	assert_eq!(data["liveHandles"], 0);
	assert_eq!(data["transcript"][0]["sender"], "user");
}

#[test]
fn text_format_prints_plain_lines() {
	let tmp = TempDir::new().expect("temp dir should be created");
	let output = avatar_command(tmp.path())
		.args(["-f", "text", "demo"])
		.output()
		.expect("failed to execute avatar");
	assert!(output.status.success());
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("avatar: Ann_Therapist_public"), "unexpected output: {stdout}");
}
