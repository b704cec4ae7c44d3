//! Runtime wiring: buses, event store and tracking processors built from
//! configuration, plus the administration operations.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use relay_runtime::RelayRuntime;
//!
//! let runtime = RelayRuntime::builder()
//!     .config_file("config/relay.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.command_bus().subscribe("RedeemCard", "GiftCardHandler", redeem);
//!
//! let projection = runtime
//!     .processor_builder("gift-cards")
//!     .subscribe("CardRedeemed", "CardSummaryProjection", on_redeemed)
//!     .build()?;
//! runtime.register_processor(projection).await?;
//!
//! runtime.run().await?;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use relay_core::Segment;
use relay_framework::{InMemoryEventStore, SimpleCommandBus, SimpleQueryBus};
use relay_processor::{
    InMemoryTokenStore, TokenStore, TrackingEventProcessor, TrackingEventProcessorBuilder,
};
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::admin::{HandlerOverview, ProcessorReport};
use crate::config::{ConfigLoader, RelayConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The Relay runtime.
///
/// Owns one command bus, one query bus and one event store, all configured
/// from [`RelayConfig`], and the tracking processors registered with it.
pub struct RelayRuntime {
    config: RelayConfig,
    command_bus: SimpleCommandBus,
    query_bus: SimpleQueryBus,
    event_store: InMemoryEventStore,
    token_store: Arc<dyn TokenStore>,
    processors: Arc<RwLock<BTreeMap<String, TrackingEventProcessor>>>,
    running: Arc<RwLock<bool>>,
}

impl RelayRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, falling back to defaults if it cannot be loaded.
    pub fn new() -> Self {
        Self::builder().build().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            Self::assemble(RelayConfig::default())
        })
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Validates `config`, initializes logging from it and builds the buses.
    pub fn from_config(config: &RelayConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        Ok(Self::assemble(config.clone()))
    }

    fn assemble(config: RelayConfig) -> Self {
        logging::init_from_config(&config.logging);

        let command_bus = SimpleCommandBus::builder()
            .resolution(config.command_bus.duplicate_resolution)
            .spawn_handlers(config.command_bus.spawn_handlers)
            .build();
        let query_bus = SimpleQueryBus::with_handler_timeout(config.query_bus.handler_timeout());
        let event_store =
            InMemoryEventStore::with_suppression_refresh(config.event_store.suppression_refresh());
        let token_store: Arc<dyn TokenStore> =
            Arc::new(InMemoryTokenStore::new(config.token_store.claim_timeout()));

        info!(
            log_level = %config.logging.level,
            duplicate_resolution = %config.command_bus.duplicate_resolution,
            processors = config.processors.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            command_bus,
            query_bus,
            event_store,
            token_store,
            processors: Arc::new(RwLock::new(BTreeMap::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn command_bus(&self) -> &SimpleCommandBus {
        &self.command_bus
    }

    pub fn query_bus(&self) -> &SimpleQueryBus {
        &self.query_bus
    }

    /// The event store, used both to publish events and as the source of
    /// every processor.
    pub fn event_store(&self) -> &InMemoryEventStore {
        &self.event_store
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.token_store
    }

    // =========================================================================
    // Processors
    // =========================================================================

    /// Starts building processor `name` with its configured settings, the
    /// runtime's event store as source and the runtime's token store.
    pub fn processor_builder(&self, name: impl Into<String>) -> TrackingEventProcessorBuilder {
        let name = name.into();
        let config = self.config.processor(&name);
        TrackingEventProcessor::builder(name, Arc::new(self.event_store.clone()))
            .token_store(self.token_store.clone())
            .config(config)
    }

    /// Registers a processor, starting it right away if the runtime runs.
    pub async fn register_processor(&self, processor: TrackingEventProcessor) -> RuntimeResult<()> {
        let name = processor.name().to_string();
        {
            let mut processors = self.processors.write().await;
            if processors.contains_key(&name) {
                return Err(RuntimeError::ProcessorExists(name));
            }
            processors.insert(name.clone(), processor.clone());
        }
        info!(processor = %name, "Registered processor");

        if self.is_running().await {
            processor.start().await?;
        }
        Ok(())
    }

    /// Returns a handle to processor `name`.
    pub async fn processor(&self, name: &str) -> RuntimeResult<TrackingEventProcessor> {
        self.processors
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ProcessorNotFound(name.to_string()))
    }

    pub async fn processor_names(&self) -> Vec<String> {
        self.processors.read().await.keys().cloned().collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Starts every registered processor.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Runtime is already running");
                return Ok(());
            }
            *running = true;
        }

        info!("Starting Relay runtime");
        let processors: Vec<_> = self.processors.read().await.values().cloned().collect();
        for processor in processors {
            processor.start().await?;
        }
        info!("Runtime started");
        Ok(())
    }

    /// Stops every processor, releasing their segments.
    ///
    /// All processors are stopped even if one fails; the first failure is
    /// returned.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Runtime is not running");
                return Ok(());
            }
            *running = false;
        }

        info!("Stopping Relay runtime");
        let processors: Vec<_> = self.processors.read().await.values().cloned().collect();
        let mut result = Ok(());
        for processor in processors {
            if let Err(e) = processor.shutdown().await {
                error!(processor = processor.name(), error = %e, "Error during processor shutdown");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }
        info!("Runtime stopped");
        result
    }

    /// Runs until Ctrl+C (or SIGTERM on Unix) is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Relay runtime is now running. Press Ctrl+C to stop.");
        let signalled = Self::wait_for_shutdown().await;
        self.shutdown().await?;
        signalled
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.shutdown().await
    }

    async fn wait_for_shutdown() -> RuntimeResult<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
        }

        Ok(())
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Lists every registered command, query and event handler.
    pub async fn handlers(&self) -> HandlerOverview {
        let events = self
            .processors
            .read()
            .await
            .iter()
            .map(|(name, processor)| (name.clone(), processor.handlers()))
            .collect();

        HandlerOverview {
            commands: self.command_bus.handlers(),
            queries: self.query_bus.handlers(),
            events,
        }
    }

    /// Splits a segment of processor `name` owned by this instance.
    pub async fn split_segment(
        &self,
        name: &str,
        segment: u32,
    ) -> RuntimeResult<(Segment, Segment)> {
        let processor = self.processor(name).await?;
        let halves = processor.split_segment(segment).await?;
        info!(
            processor = name,
            kept = %halves.0,
            handed_off = %halves.1,
            "Split segment on request"
        );
        Ok(halves)
    }

    /// Merges a segment of processor `name` with its sibling.
    pub async fn merge_segment(&self, name: &str, segment: u32) -> RuntimeResult<Segment> {
        let processor = self.processor(name).await?;
        let merged = processor.merge_segment(segment).await?;
        info!(processor = name, %merged, "Merged segment on request");
        Ok(merged)
    }

    /// Releases a segment of processor `name` so another instance may claim it.
    pub async fn release_segment(&self, name: &str, segment: u32) -> RuntimeResult<()> {
        let processor = self.processor(name).await?;
        processor.release_segment(segment).await?;
        info!(processor = name, segment, "Released segment on request");
        Ok(())
    }

    /// Turns suppression of unhandled event types on or off for processor `name`.
    pub async fn set_blacklisting(&self, name: &str, enabled: bool) -> RuntimeResult<()> {
        self.processor(name).await?.set_blacklisting(enabled);
        Ok(())
    }

    /// Reports the segments processor `name` handles on this instance.
    pub async fn processor_status(&self, name: &str) -> RuntimeResult<ProcessorReport> {
        Ok(report(&self.processor(name).await?))
    }

    /// Reports every registered processor.
    pub async fn status(&self) -> Vec<ProcessorReport> {
        self.processors.read().await.values().map(report).collect()
    }
}

fn report(processor: &TrackingEventProcessor) -> ProcessorReport {
    ProcessorReport {
        name: processor.name().to_string(),
        owner: processor.owner().to_string(),
        running: processor.is_running(),
        blacklisting: processor.is_blacklisting(),
        segments: processor.status(),
    }
}

impl Default for RelayRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`RelayRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: RelayConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> RuntimeResult<RelayRuntime> {
        let config = self.config_loader.load()?;
        RelayRuntime::from_config(&config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
