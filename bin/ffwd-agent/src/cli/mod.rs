use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ffwd_config::{ConfigurationLoader, GenericConfiguration};
use ffwd_error::{ErrorContext as _, GenericError};

pub mod config;
pub mod run;

/// Configuration file read when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "ffwd.yaml";

/// Prefix for environment variable overrides, such as `FFWD_ASYNC_THREADS`.
pub const ENV_PREFIX: &str = "ffwd";

#[derive(Debug, Parser)]
#[command(
    name = "ffwd-agent",
    version = env!("FFWD_VERSION"),
    long_version = env!("FFWD_BUILD_DESC"),
    about = "Forwards metrics and events from sources to destinations."
)]
pub struct Cli {
    /// Path to the configuration file. Defaults to `ffwd.yaml`, which may be absent.
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Subcommand to run. Defaults to `run`.
    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Subcommand)]
pub enum Action {
    /// Runs the agent until interrupted.
    #[default]
    Run,

    /// Prints the resolved configuration as JSON.
    Config,
}

/// Loads the configuration file, then applies environment variable overrides.
///
/// An explicitly given file must exist. The default file is skipped when it cannot be read.
pub fn load_configuration(config_file: Option<&Path>) -> Result<GenericConfiguration, GenericError> {
    let loader = match config_file {
        Some(path) => ConfigurationLoader::default()
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?,
        None => ConfigurationLoader::default().try_from_yaml(DEFAULT_CONFIG_FILE),
    };

    Ok(loader.from_environment(ENV_PREFIX)?.into_generic())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["ffwd-agent"]).unwrap();
        assert_eq!(cli.config_file, None);
        assert_eq!(cli.action.unwrap_or_default(), Action::Run);
    }

    #[test]
    fn parses_config_subcommand() {
        let cli = Cli::try_parse_from(["ffwd-agent", "--config", "/etc/ffwd/ffwd.yaml", "config"]).unwrap();
        assert_eq!(cli.config_file, Some(PathBuf::from("/etc/ffwd/ffwd.yaml")));
        assert_eq!(cli.action, Some(Action::Config));
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");

        let error = load_configuration(Some(&missing)).unwrap_err();
        assert!(error.to_string().contains("missing.yaml"));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"shutdown_timeout_secs: 5\n").unwrap();

        let config = load_configuration(Some(file.path())).unwrap();
        assert_eq!(config.get_typed::<u64>("shutdown_timeout_secs").unwrap(), 5);
    }
}
