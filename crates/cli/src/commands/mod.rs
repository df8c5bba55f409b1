mod config;
mod demo;
mod token;

use avatar::ClientConfig;
use serde::Serialize;
use tracing::debug;

use crate::cli::{Cli, Commands, ConfigCommand, TokenCommand};
use crate::error::Result;
use crate::output::{ResultBuilder, print_result};

pub use demo::{DemoReport, run_demo};

/// Runs the parsed command and prints its result envelope.
///
/// A failed command still prints an envelope with `ok: false` before the
/// error is returned.
pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;
	let name = command_name(&cli.command);
	let outcome = match load_config(&cli) {
		Ok(config) => run(cli.command, config).await,
		Err(err) => Err(err),
	};

	match outcome {
		Ok(data) => {
			print_result(&ResultBuilder::new(name).data(data).build(), format)?;
			Ok(())
		}
		Err(err) => {
			let result = ResultBuilder::<()>::new(name).error(err.code(), err.to_string()).build();
			print_result(&result, format)?;
			Err(err)
		}
	}
}

async fn run(command: Commands, config: ClientConfig) -> Result<serde_json::Value> {
	match command {
		Commands::Config(ConfigCommand::Show) => to_value(config::show(&config)),
		Commands::Token(TokenCommand::Fetch { url }) => to_value(token::fetch(&config, url.as_deref()).await?),
		Commands::Demo(args) => to_value(demo::run_demo(&config, &args).await?),
	}
}

fn to_value<T: Serialize>(data: T) -> Result<serde_json::Value> {
	Ok(serde_json::to_value(data)?)
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
	let config = match &cli.config {
		Some(path) => {
			debug!(target = "avatar.cli", path = %path.display(), "loading configuration file");
			ClientConfig::load(path)?
		}
		None => ClientConfig::default(),
	};
	Ok(config.apply_env())
}

fn command_name(command: &Commands) -> &'static str {
	match command {
		Commands::Config(ConfigCommand::Show) => "config show",
		Commands::Token(TokenCommand::Fetch { .. }) => "token fetch",
		Commands::Demo(_) => "demo",
	}
}
