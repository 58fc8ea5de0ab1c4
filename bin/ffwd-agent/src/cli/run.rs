use ffwd_components::agent::{Agent, AgentConfiguration};
use ffwd_config::GenericConfiguration;
use ffwd_error::GenericError;
use tracing::info;

/// Handles the run subcommand.
///
/// Blocks until the agent has been stopped.
pub fn handle_run_command(config: &GenericConfiguration) -> Result<(), GenericError> {
    let agent_config = AgentConfiguration::from_configuration(config)?;
    info!(
        async_threads = agent_config.async_threads,
        blocking_threads = agent_config.blocking_threads(),
        sinks = agent_config.output.plugins.len(),
        sources = agent_config.input.plugins.len(),
        "Loaded agent configuration."
    );

    Agent::default().run(&agent_config)
}
