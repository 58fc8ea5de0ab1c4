use ffwd_components::agent::AgentConfiguration;
use ffwd_config::GenericConfiguration;
use ffwd_error::{ErrorContext as _, GenericError};

/// Handles the config subcommand.
pub fn handle_config_command(config: &GenericConfiguration) -> Result<(), GenericError> {
    println!("{}", render_configuration(config)?);
    Ok(())
}

fn render_configuration(config: &GenericConfiguration) -> Result<String, GenericError> {
    let agent_config = AgentConfiguration::from_configuration(config)?;
    serde_json::to_string_pretty(&agent_config).error_context("Failed to render configuration.")
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::Value;

    use super::*;
    use crate::cli::load_configuration;

    #[test]
    fn renders_defaults_and_plugins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"output:\n  plugins:\n    - type: broker\n      id: kafka\n").unwrap();

        let config = load_configuration(Some(file.path())).unwrap();
        let rendered: Value = serde_json::from_str(&render_configuration(&config).unwrap()).unwrap();

        assert_eq!(rendered["async_threads"], 4);
        assert_eq!(rendered["shutdown_timeout_secs"], 30);
        assert_eq!(rendered["output"]["plugins"][0]["type"], "broker");
        assert_eq!(rendered["output"]["plugins"][0]["id"], "kafka");
        assert_eq!(rendered["input"]["plugins"], Value::Array(Vec::new()));
    }
}
