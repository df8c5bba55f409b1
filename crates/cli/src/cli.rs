use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "avatar")]
#[command(about = "Streaming avatar sessions from the command line")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON configuration file; environment variables fill unset fields
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Json)]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Inspect the resolved configuration
	#[command(subcommand)]
	Config(ConfigCommand),

	/// Access-token operations
	#[command(subcommand)]
	Token(TokenCommand),

	/// Run a scripted session against the in-process fake service
	Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
	/// Print the configuration after applying the environment
	Show,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
	/// Request a token from the token endpoint
	Fetch {
		/// Token endpoint, overriding the configuration
		#[arg(long)]
		url: Option<String>,
	},
}

#[derive(Args, Debug, Default)]
pub struct DemoArgs {
	/// Avatar to start, overriding the configuration
	#[arg(long)]
	pub avatar: Option<String>,

	/// Greeting spoken once the stream is ready
	#[arg(long)]
	pub preamble: Option<String>,

	/// Open the voice-chat channel after connecting
	#[arg(long)]
	pub voice_chat: bool,

	/// Simulate an autoplay block that is cleared by a retry
	#[arg(long)]
	pub block_autoplay: bool,

	/// Utterances sent with `speak` while connected
	#[arg(long = "say", value_name = "TEXT")]
	pub say: Vec<String>,
}
