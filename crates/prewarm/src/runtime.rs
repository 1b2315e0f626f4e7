//! Runtime wiring the prefetch manager, telemetry controller and flush loop

use crate::{PrewarmConfig, PrewarmError, Result};
use prewarm_core::{
    probe_store, Clock, FileStore, KeyValueStore, MemoryStore, NoopStore, SystemClock,
};
use prewarm_speculative::{
    AnchorHost, ContainerId, DocumentHead, Environment, FetchExecutor, HintExecutor,
    PrefetchExecutor, PrefetchManager, PrefetchStrategy,
};
use prewarm_telemetry::{
    ConsentService, DeliveryTransport, FlushHandle, FlushOrchestrator, HttpTransport,
    MemoryConsent, PageVisibility, TelemetryController,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Name of the page-level event requesting an anchor re-scan
pub const REFRESH_EVENT: &str = "prewarm:refresh";

/// Request to re-scan a container for opt-in anchors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSignal {
    /// Container to scan
    pub container: ContainerId,
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self {
            container: ContainerId::DOCUMENT,
        }
    }
}

/// Builder for [`PrewarmRuntime`]
pub struct RuntimeBuilder {
    config: PrewarmConfig,
    document_url: Url,
    host: Option<Arc<dyn AnchorHost>>,
    head: Option<Arc<dyn DocumentHead>>,
    executor: Option<Arc<dyn PrefetchExecutor>>,
    consent: Option<Arc<dyn ConsentService>>,
    transport: Option<Arc<dyn DeliveryTransport>>,
    durable: Option<Arc<dyn KeyValueStore>>,
    session: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    environment: Environment,
}

impl RuntimeBuilder {
    /// Document binding (required)
    pub fn host(mut self, host: Arc<dyn AnchorHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Document head, required by the hint strategy
    pub fn head(mut self, head: Arc<dyn DocumentHead>) -> Self {
        self.head = Some(head);
        self
    }

    /// Replace the strategy-derived executor
    pub fn executor(mut self, executor: Arc<dyn PrefetchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Consent manager; every service is denied when unset
    pub fn consent(mut self, consent: Arc<dyn ConsentService>) -> Self {
        self.consent = Some(consent);
        self
    }

    /// Delivery transport; built from the configured endpoint when unset
    pub fn transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Durable store; derived from the storage config when unset
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Per-session store; in-memory when unset
    pub fn session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session = Some(store);
        self
    }

    /// Time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initial environment
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Start every component and scan the document once
    pub async fn start(self) -> Result<PrewarmRuntime> {
        let host = self
            .host
            .ok_or_else(|| PrewarmError::Config("anchor host not set".into()))?;

        let durable = match self.durable {
            Some(store) => store,
            None => match &self.config.storage.durable_dir {
                Some(dir) => match FileStore::open(dir) {
                    Ok(store) => Arc::new(store) as Arc<dyn KeyValueStore>,
                    Err(e) => {
                        warn!(
                            "Durable store at {} unavailable, continuing in memory: {}",
                            dir.display(),
                            e
                        );
                        Arc::new(NoopStore)
                    }
                },
                None => Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
            },
        };
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);

        let durable = probe_store(durable, "durable");
        let session = probe_store(session, "session");

        let telemetry = Arc::new(
            TelemetryController::new(
                self.config.telemetry.clone(),
                durable,
                session,
                self.clock.clone(),
            )
            .with_base_url(self.document_url.clone()),
        );

        let executor: Arc<dyn PrefetchExecutor> = match self.executor {
            Some(executor) => executor,
            None => match self.config.manager.strategy {
                PrefetchStrategy::Hint => {
                    let head = self.head.ok_or_else(|| {
                        PrewarmError::Config("hint strategy requires a document head".into())
                    })?;
                    Arc::new(HintExecutor::new(head))
                }
                PrefetchStrategy::Fetch => Arc::new(FetchExecutor::new(self.config.fetch.clone())?),
            },
        };

        let manager = PrefetchManager::builder(self.config.manager.clone(), self.document_url)
            .host(host)
            .executor(executor)
            .recorder(telemetry.clone())
            .environment(self.environment)
            .build()?;

        let transport = match self.transport {
            Some(transport) => Some(transport),
            None => match &self.config.transport.endpoint {
                Some(endpoint) => Some(Arc::new(HttpTransport::new(
                    endpoint.clone(),
                    self.config.transport.timeout_ms,
                )?) as Arc<dyn DeliveryTransport>),
                None => None,
            },
        };

        let (visibility, visibility_rx) = watch::channel(PageVisibility::Visible);
        let (orchestrator, flush_handle) = match transport {
            Some(transport) => {
                let consent = self
                    .consent
                    .unwrap_or_else(|| Arc::new(MemoryConsent::new()) as Arc<dyn ConsentService>);
                let orchestrator = FlushOrchestrator::new(
                    self.config.flush.clone(),
                    telemetry.clone(),
                    transport,
                    consent,
                    visibility_rx,
                );
                let handle = orchestrator.acquire();
                (Some(orchestrator), Some(handle))
            }
            None => {
                warn!("No telemetry endpoint configured, delivery disabled");
                (None, None)
            }
        };

        let registered = manager.register_anchors_within(ContainerId::DOCUMENT).await;

        let (refresh, refresh_rx) = broadcast::channel(16);
        let refresh_task = tokio::spawn(listen_for_refresh(manager.clone(), refresh_rx));

        info!(
            "Prewarm runtime started ({} anchors registered, telemetry {})",
            registered,
            if orchestrator.is_some() { "enabled" } else { "disabled" }
        );

        Ok(PrewarmRuntime {
            manager,
            telemetry,
            orchestrator,
            flush_handle,
            visibility,
            refresh,
            refresh_task,
        })
    }
}

async fn listen_for_refresh(manager: PrefetchManager, mut rx: broadcast::Receiver<RefreshSignal>) {
    loop {
        match rx.recv().await {
            Ok(signal) => {
                let registered = manager.register_anchors_within(signal.container).await;
                debug!("Refresh registered {} anchors", registered);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Refresh lagged by {}, rescanning document", skipped);
                manager.register_anchors_within(ContainerId::DOCUMENT).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Running prewarm engine
pub struct PrewarmRuntime {
    manager: PrefetchManager,
    telemetry: Arc<TelemetryController>,
    orchestrator: Option<FlushOrchestrator>,
    flush_handle: Option<FlushHandle>,
    visibility: watch::Sender<PageVisibility>,
    refresh: broadcast::Sender<RefreshSignal>,
    refresh_task: JoinHandle<()>,
}

impl PrewarmRuntime {
    /// Start building a runtime for the document at `document_url`
    pub fn builder(config: PrewarmConfig, document_url: Url) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            document_url,
            host: None,
            head: None,
            executor: None,
            consent: None,
            transport: None,
            durable: None,
            session: None,
            clock: Arc::new(SystemClock),
            environment: Environment::default(),
        }
    }

    /// Prefetch manager
    pub fn manager(&self) -> &PrefetchManager {
        &self.manager
    }

    /// Telemetry controller
    pub fn telemetry(&self) -> &Arc<TelemetryController> {
        &self.telemetry
    }

    /// Flush orchestrator, when delivery is enabled
    pub fn orchestrator(&self) -> Option<&FlushOrchestrator> {
        self.orchestrator.as_ref()
    }

    /// Sender for [`REFRESH_EVENT`] signals
    pub fn refresh_sender(&self) -> broadcast::Sender<RefreshSignal> {
        self.refresh.clone()
    }

    /// Ask for a re-scan of `container`
    pub fn refresh(&self, container: ContainerId) {
        if self.refresh.send(RefreshSignal { container }).is_err() {
            debug!("Refresh listener gone, ignoring {}", REFRESH_EVENT);
        }
    }

    /// Report a page visibility change
    pub fn set_page_visibility(&self, visibility: PageVisibility) {
        self.visibility.send_replace(visibility);
    }

    /// Tear everything down, attempting one last flush
    pub async fn shutdown(mut self) {
        self.refresh_task.abort();
        self.manager.destroy().await;

        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.flush_now().await;
        }
        drop(self.flush_handle.take());

        info!("Prewarm runtime stopped");
    }
}
