//! Agent orchestration.
//!
//! Bring-up happens in two phases. [`Agent::bootstrap`] runs every module's setup hook to fill a [`PluginRegistry`],
//! independent of configuration. [`Agent::wire`] then builds every declared sink and source into an
//! [`AgentRuntime`], which starts both managers, waits for a stop signal, and stops both managers again.
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use ffwd_core::managers::{InputManager, OutputManager};
use ffwd_error::{ErrorContext as _, GenericError};
use tokio::{runtime::Handle, select, time::timeout};
use tracing::{debug, error, info, warn};

use crate::{
    modules::{CoreModule, Module},
    registry::{PluginRegistry, SinkContext, SourceContext},
};

mod config;
pub use self::config::{AgentConfiguration, PluginSetConfiguration};

mod signal;
pub use self::signal::shutdown_signal;

/// The agent.
///
/// Holds the modules whose setup hooks run during bootstrap. [`CoreModule`] is always included.
pub struct Agent {
    modules: Vec<Box<dyn Module>>,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            modules: vec![Box::new(CoreModule)],
        }
    }
}

impl Agent {
    /// Adds a module.
    pub fn with_module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Runs every module's setup hook, in the order the modules were added.
    ///
    /// # Errors
    ///
    /// If any module fails to set up, an error is returned.
    pub fn bootstrap(&self) -> Result<PluginRegistry, GenericError> {
        let mut registry = PluginRegistry::default();
        for module in &self.modules {
            module
                .setup(&mut registry)
                .with_error_context(|| format!("Failed to set up module '{}'.", module.name()))?;
            debug!(module = module.name(), "Module set up.");
        }
        Ok(registry)
    }

    /// Builds every configured sink and source.
    ///
    /// Sinks are built first, so that sources can be handed the [`OutputManager`] that fans out to all of them.
    ///
    /// # Errors
    ///
    /// If any plugin has an unknown type or invalid settings, an error is returned.
    pub fn wire(
        registry: &PluginRegistry, config: &AgentConfiguration, handle: &Handle,
    ) -> Result<AgentRuntime, GenericError> {
        let sink_context = SinkContext::new(
            handle.clone(),
            registry.connectors().clone(),
            config.connect_timeout(),
            config.send_timeout(),
        );
        let sinks = config
            .output
            .plugins
            .iter()
            .enumerate()
            .map(|(index, plugin)| registry.build_sink(&plugin.resolved_id(index), plugin, &sink_context))
            .collect::<Result<Vec<_>, _>>()?;
        let output = OutputManager::new(sinks);

        let source_context = SourceContext::new(handle.clone(), output.clone());
        let sources = config
            .input
            .plugins
            .iter()
            .enumerate()
            .map(|(index, plugin)| registry.build_source(&plugin.resolved_id(index), plugin, &source_context))
            .collect::<Result<Vec<_>, _>>()?;
        let input = InputManager::new(sources);

        info!(
            sinks = output.sinks().len(),
            sources = input.sources().len(),
            "Agent wired."
        );

        Ok(AgentRuntime::new(input, output, config.shutdown_timeout()))
    }

    /// Runs the agent until a stop signal is received.
    ///
    /// Builds the runtime from the configured pool sizes and blocks the calling thread until the stop sequence has
    /// completed.
    ///
    /// # Errors
    ///
    /// If the runtime cannot be built, or bootstrap or wiring fails, an error is returned. Plugin start and stop
    /// failures are logged and do not cause an error.
    pub fn run(&self, config: &AgentConfiguration) -> Result<(), GenericError> {
        config.validate()?;

        let runtime = build_runtime(config).error_context("Failed to build runtime.")?;
        let registry = self.bootstrap()?;
        let agent_runtime = Self::wire(&registry, config, runtime.handle())?;

        // Signal handlers are installed before any plugin starts.
        let signal = {
            let _entered = runtime.enter();
            shutdown_signal()
        };
        runtime.block_on(agent_runtime.run_until(signal));
        Ok(())
    }
}

fn build_runtime(config: &AgentConfiguration) -> std::io::Result<tokio::runtime::Runtime> {
    let thread_id = Arc::new(AtomicUsize::new(0));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(config.async_threads)
        .max_blocking_threads(config.blocking_threads())
        .thread_name_fn(move || {
            let new_thread_id = thread_id.fetch_add(1, Ordering::SeqCst);
            format!("ffwd-async-{:02}", new_thread_id)
        })
        .build()
}

/// A wired agent.
#[derive(Clone, Debug)]
pub struct AgentRuntime {
    input: InputManager,
    output: OutputManager,
    shutdown_timeout: Duration,
}

impl AgentRuntime {
    /// Creates a new `AgentRuntime`.
    pub fn new(input: InputManager, output: OutputManager, shutdown_timeout: Duration) -> Self {
        Self {
            input,
            output,
            shutdown_timeout,
        }
    }

    /// Returns the source manager.
    pub fn input(&self) -> &InputManager {
        &self.input
    }

    /// Returns the sink manager.
    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    /// Starts every sink and source concurrently.
    ///
    /// Failures are logged per manager. A plugin that failed to start does not prevent the others from running.
    pub async fn start(&self) {
        let started = Instant::now();
        let (output_result, input_result) = tokio::join!(self.output.start(), self.input.start());

        let mut healthy = true;
        if let Err(e) = output_result {
            error!(error = %e, "Failed to start output plugins.");
            healthy = false;
        }
        if let Err(e) = input_result {
            error!(error = %e, "Failed to start input plugins.");
            healthy = false;
        }

        let init_time_ms = started.elapsed().as_millis();
        if healthy {
            info!(init_time_ms, "Agent started.");
        } else {
            warn!(init_time_ms, "Agent started with failed plugins.");
        }
    }

    /// Stops every sink and source concurrently.
    ///
    /// Never fails: errors are logged, and if the stop sequence exceeds the shutdown timeout it is abandoned.
    pub async fn stop(&self) {
        let stopping = async {
            let (output_result, input_result) = tokio::join!(self.output.stop(), self.input.stop());
            if let Err(e) = output_result {
                error!(error = %e, "Failed to stop output plugins cleanly.");
            }
            if let Err(e) = input_result {
                error!(error = %e, "Failed to stop input plugins cleanly.");
            }
        };

        match timeout(self.shutdown_timeout, stopping).await {
            Ok(()) => info!("Agent stopped."),
            Err(_) => warn!(
                timeout = ?self.shutdown_timeout,
                "Timed out waiting for plugins to stop. Exiting anyway."
            ),
        }
    }

    /// Starts the agent, waits for `signal` to resolve, then stops the agent.
    ///
    /// `signal` is watched from the beginning. If it resolves while plugins are still starting, the start is abandoned
    /// and the agent is stopped straight away.
    pub async fn run_until<F: Future<Output = ()>>(&self, signal: F) {
        tokio::pin!(signal);

        select! {
            _ = self.start() => {
                info!("Agent running. Waiting for stop signal...");
                (&mut signal).await;
            }
            _ = &mut signal => warn!("Stop signal received while starting. Abandoning start."),
        }

        info!("Stopping agent...");
        self.stop().await;
    }
}
