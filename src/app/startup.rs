use super::WildwatchService;
use crate::alert::{AlertDispatcher, AlertThrottle, HttpNotifier, Notifier};
use crate::camera::{DefaultFrameSourceFactory, FrameSourceFactory};
use crate::config::WildwatchConfig;
use crate::detection::{Classifier, HttpClassifier};
use crate::error::{Result, WildwatchError};
use crate::events::{EventBus, WildwatchEvent};
use crate::pipeline::PipelineContext;
use crate::recorder::{DefaultWriterFactory, VideoWriterFactory};
use crate::registry::{CameraId, CameraRegistry, CameraState};
use crate::storage::{EventStore, JsonlEventStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Assembles a [`WildwatchService`]. Collaborators not supplied are built
/// from configuration.
pub struct WildwatchServiceBuilder {
    config: WildwatchConfig,
    classifier: Option<Arc<dyn Classifier>>,
    notifier: Option<Arc<dyn Notifier>>,
    store: Option<Arc<dyn EventStore>>,
    writer_factory: Option<Arc<dyn VideoWriterFactory>>,
    source_factory: Option<Arc<dyn FrameSourceFactory>>,
}

impl WildwatchServiceBuilder {
    pub fn new(config: WildwatchConfig) -> Self {
        Self {
            config,
            classifier: None,
            notifier: None,
            store: None,
            writer_factory: None,
            source_factory: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_writer_factory(mut self, factory: Arc<dyn VideoWriterFactory>) -> Self {
        self.writer_factory = Some(factory);
        self
    }

    pub fn with_source_factory(mut self, factory: Arc<dyn FrameSourceFactory>) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub async fn build(self) -> Result<WildwatchService> {
        let config = self.config;
        config.validate()?;

        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(HttpClassifier::new(&config.classifier)?),
        };

        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(HttpNotifier::new(&config.notifier).map_err(|e| {
                WildwatchError::component("notifier", &format!("Failed to build client: {}", e))
            })?),
        };

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonlEventStore::open(&config.storage).await?),
        };

        let writer_factory = self
            .writer_factory
            .unwrap_or_else(|| Arc::new(DefaultWriterFactory));
        let source_factory = self
            .source_factory
            .unwrap_or_else(|| Arc::new(DefaultFrameSourceFactory));

        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(
            config.alerts.cooldown_seconds,
        )));

        let dispatcher = Arc::new(AlertDispatcher::new(
            &config.alerts,
            config.contacts.clone(),
            throttle,
            notifier,
            Arc::clone(&store),
            Arc::clone(&event_bus),
        ));

        let context = Arc::new(PipelineContext::new(
            &config,
            classifier,
            Arc::clone(&dispatcher),
            Arc::clone(&store),
            Arc::clone(&event_bus),
            writer_factory,
        )?);

        let config = Arc::new(config);
        let registry = Arc::new(CameraRegistry::new(
            Arc::clone(&config),
            Arc::clone(&context),
            source_factory,
        ));

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        info!(
            "Wildwatch service assembled ({} configured cameras)",
            config.cameras.len()
        );

        Ok(WildwatchService {
            config,
            registry,
            context,
            store,
            event_bus,
            dispatcher,
            image_counter: Default::default(),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }
}

impl WildwatchService {
    pub fn builder(config: WildwatchConfig) -> WildwatchServiceBuilder {
        WildwatchServiceBuilder::new(config)
    }

    /// Start every camera marked `autostart` plus `extra`.
    ///
    /// A camera that fails to open is reported and skipped; the others
    /// still start.
    pub async fn start(&self, extra: &[CameraId]) -> Vec<CameraState> {
        let mut ids: Vec<CameraId> = self
            .config
            .cameras
            .iter()
            .filter(|entry| entry.autostart)
            .map(|entry| entry.id)
            .collect();
        for id in extra {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }

        if ids.is_empty() {
            info!("No cameras configured to start");
        }

        let mut started = Vec::with_capacity(ids.len());
        for id in ids {
            match self.registry.start(id).await {
                Ok(state) => started.push(state),
                Err(e) => {
                    error!("Failed to start camera {}: {}", id, e);
                    let _ = self
                        .event_bus
                        .publish(WildwatchEvent::SystemError {
                            component: format!("camera_{}", id),
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }

        info!("Started {} cameras", started.len());
        started
    }
}
