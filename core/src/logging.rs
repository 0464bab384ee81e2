use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::CoreConfig, Error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
	/// Used when `RUST_LOG` is unset, e.g. `info` or `yaba_core=debug,warn`
	pub default_directive: String,
	pub with_ansi: bool,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			default_directive: "info".to_string(),
			with_ansi: true,
		}
	}
}

impl From<&CoreConfig> for LoggingConfig {
	fn from(config: &CoreConfig) -> Self {
		Self {
			default_directive: config.log_level.clone(),
			..Default::default()
		}
	}
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), Error> {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&config.default_directive))
		.map_err(|e| Error::Logging(e.to_string()))?;

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_ansi(config.with_ansi).with_target(true))
		.try_init()
		.map_err(|e| Error::Logging(e.to_string()))
}
