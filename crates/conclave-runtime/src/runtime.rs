//! The executive: wires configuration, the object store, the service
//! registry, the group transport, and the shutdown sequencer into one
//! running node.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use conclave_core::engine::{MembershipChange, NodeId};
use conclave_core::error::ExitReason;
use conclave_core::header::{HEADER_LEN, RoutingHeader};
use conclave_core::resolver::EngineResolver;
use conclave_core::store::{ObjectStore, ROOT, Value};

use crate::config::ExecConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RuntimeError, RuntimeResult, TransportError};
use crate::logging;
use crate::registry::ServiceRegistry;
use crate::shutdown::{ShutdownSequencer, ShutdownState};
use crate::transport::{Delivery, GroupId, Guarantee, LoopbackTransport, Transport};

/// One running cluster node.
pub struct Executive {
    config: ExecConfig,
    store: Arc<ObjectStore>,
    registry: Arc<ServiceRegistry>,
    transport: Arc<LoopbackTransport>,
    sequencer: Arc<ShutdownSequencer>,
    // Consumed by the delivery task on start.
    delivery: Mutex<Option<(Dispatcher, UnboundedReceiver<Delivery>)>>,
}

impl Executive {
    /// Builds an executive from configuration and an engine resolver.
    ///
    /// Seeds the object store from the config (the `defaultservices` flag
    /// and any configured engine records), then constructs the registry,
    /// transport, dispatcher, and sequencer. No engine is linked yet; that
    /// happens in [`Executive::start`].
    pub fn new(config: ExecConfig, resolver: Arc<dyn EngineResolver>) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let store = Arc::new(ObjectStore::new());
        Self::seed_store(&store, &config).map_err(RuntimeError::Service)?;

        let registry = Arc::new(ServiceRegistry::new(resolver, store.clone())?);
        let (transport, rx) = LoopbackTransport::channel(NodeId(config.nodeid));
        let transport = Arc::new(transport);
        let dispatcher =
            Dispatcher::with_max_message_size(registry.clone(), config.max_message_size);
        let sequencer = Arc::new(ShutdownSequencer::new(
            registry.clone(),
            transport.clone() as Arc<dyn Transport>,
        ));

        Ok(Self {
            config,
            store,
            registry,
            transport,
            sequencer,
            delivery: Mutex::new(Some((dispatcher, rx))),
        })
    }

    fn seed_store(
        store: &ObjectStore,
        config: &ExecConfig,
    ) -> Result<(), conclave_core::error::ServiceError> {
        let system = store.create(ROOT, "system")?;
        let flag = if config.default_services { "yes" } else { "no" };
        store.key_set(system, "defaultservices", Value::Str(flag.to_string()))?;

        for engine in &config.engines {
            let record = store.create(ROOT, "service")?;
            store.key_set(record, "name", Value::Str(engine.name.clone()))?;
            store.key_set(record, "ver", Value::U32(engine.ver))?;
        }
        Ok(())
    }

    /// Joins the group, links the configured and default engines, and
    /// spawns the delivery task.
    pub async fn start(&self) -> RuntimeResult<()> {
        self.transport
            .join(&GroupId(self.config.group.clone()))
            .await
            .map_err(RuntimeError::Transport)?;

        self.registry.defaults_link_and_init();

        let Some((mut dispatcher, mut rx)) = self.delivery.lock().take() else {
            warn!("delivery task already started");
            return Ok(());
        };
        tokio::spawn(async move {
            // The stream ends when the transport is finalized.
            while let Some(delivery) = rx.recv().await {
                let fragments: Vec<&[u8]> =
                    delivery.fragments.iter().map(Vec::as_slice).collect();
                dispatcher.deliver(&fragments, delivery.nodeid, delivery.foreign_endian);
            }
        });

        info!(
            group = %self.config.group,
            nodeid = self.config.nodeid,
            engines = self.registry.loaded_ids().len(),
            "executive started"
        );
        Ok(())
    }

    /// Multicasts one message to `function_id` of `service_id`.
    pub async fn multicast(
        &self,
        service_id: u16,
        function_id: u16,
        body: &[u8],
        guarantee: Guarantee,
    ) -> Result<(), TransportError> {
        let size = HEADER_LEN + body.len();
        let mut buf = vec![0u8; size];
        RoutingHeader::new(service_id, function_id, size as u32).write_to(&mut buf);
        buf[HEADER_LEN..].copy_from_slice(body);

        self.registry.bump_tx(service_id, function_id);
        self.transport.mcast(&[buf], guarantee).await
    }

    /// Requests shutdown; teardown runs deferred on the scheduler.
    pub fn request_shutdown(&self) {
        self.sequencer.request_shutdown();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ShutdownState {
        self.sequencer.state()
    }

    /// Fans a membership change out to the loaded engines.
    pub fn confchg(&self, change: &MembershipChange) {
        self.registry.confchg(change);
    }

    /// Triggers the diagnostic dump across all loaded engines.
    pub fn dump(&self) {
        self.registry.dump();
    }

    /// The engine registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The introspection store.
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Runs until a termination signal arrives and the shutdown sequence
    /// completes.
    ///
    /// `SIGINT`, `SIGTERM`, and `SIGQUIT` request shutdown; `SIGUSR2`
    /// triggers the diagnostic dump.
    pub async fn run(&self) -> RuntimeResult<ExitReason> {
        self.start().await?;
        let done = self.sequencer.done();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let signals = (
                signal(SignalKind::quit()),
                signal(SignalKind::terminate()),
                signal(SignalKind::user_defined2()),
            );
            if let (Ok(mut quit), Ok(mut term), Ok(mut usr2)) = signals {
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => self.request_shutdown(),
                        _ = quit.recv() => self.request_shutdown(),
                        _ = term.recv() => self.request_shutdown(),
                        _ = usr2.recv() => self.dump(),
                        _ = done.cancelled() => break,
                    }
                }
                return Ok(ExitReason::Shutdown);
            }
            warn!("unix signal registration failed, handling SIGINT only");
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => self.request_shutdown(),
                _ = done.cancelled() => break,
            }
        }
        Ok(ExitReason::Shutdown)
    }

    /// Runs until the given future resolves, then shuts down cleanly.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<ExitReason>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        let done = self.sequencer.done();
        tokio::select! {
            () = shutdown => self.request_shutdown(),
            _ = done.cancelled() => {}
        }
        done.cancelled().await;
        Ok(ExitReason::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::engine::ServiceEngine;
    use conclave_core::resolver::StaticResolver;
    use parking_lot::Mutex;

    use crate::config::EngineRef;

    #[tokio::test(start_paused = true)]
    async fn executive_round_trip() {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let resolver = Arc::new(StaticResolver::new());
        let log = events.clone();
        resolver.register(
            "conclave_probe",
            0,
            Arc::new(move || {
                let on_message = log.clone();
                let on_exit = log.clone();
                ServiceEngine::builder(7, "conclave_probe")
                    .function(move |_header, msg, nodeid| {
                        let body = String::from_utf8_lossy(&msg[HEADER_LEN..]).into_owned();
                        on_message.lock().push(format!("rx {body} from {nodeid}"));
                    })
                    .exec_exit(move || on_exit.lock().push("exec_exit".into()))
                    .build()
            }),
        );

        let config = ExecConfig {
            default_services: false,
            engines: vec![EngineRef {
                name: "conclave_probe".into(),
                ver: 0,
            }],
            nodeid: 42,
            ..ExecConfig::default()
        };
        let executive = Executive::new(config, resolver.clone()).unwrap();

        executive.start().await.unwrap();
        assert_eq!(executive.registry().loaded_ids(), vec![7]);

        executive
            .multicast(7, 0, b"hello ring", Guarantee::Agreed)
            .await
            .unwrap();
        // Let the delivery task run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(*events.lock(), vec!["rx hello ring from 42".to_string()]);
        assert_eq!(executive.registry().counter(7, 0, "tx"), Some(1));
        assert_eq!(executive.registry().counter(7, 0, "rx"), Some(1));

        executive.request_shutdown();
        executive.sequencer.done().cancelled().await;
        assert_eq!(executive.state(), ShutdownState::Exiting);
        assert_eq!(events.lock().last().unwrap(), "exec_exit");
        assert_eq!(resolver.live_handles(), 0);

        let refused = executive.multicast(7, 0, b"late", Guarantee::Agreed).await;
        assert!(matches!(refused, Err(TransportError::Finalized)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_performs_a_clean_shutdown() {
        let resolver = Arc::new(StaticResolver::new());
        resolver.register(
            "conclave_probe",
            0,
            Arc::new(|| ServiceEngine::builder(3, "conclave_probe").build()),
        );

        let config = ExecConfig {
            default_services: false,
            engines: vec![EngineRef {
                name: "conclave_probe".into(),
                ver: 0,
            }],
            ..ExecConfig::default()
        };
        let executive = Executive::new(config, resolver).unwrap();

        let reason = executive.run_until(async {}).await.unwrap();
        assert_eq!(reason, ExitReason::Shutdown);
        assert!(executive.registry().loaded_ids().is_empty());
    }
}
