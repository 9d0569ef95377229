//! Inbound message dispatch.
//!
//! The dispatcher sits on the delivery path of the group transport: every
//! multicast the node receives passes through [`Dispatcher::deliver`]
//! exactly once. The single-fragment, native-order path borrows the
//! delivered bytes directly and allocates nothing; multi-fragment or
//! foreign-order payloads are coalesced into a scratch buffer preallocated
//! at construction.
//!
//! A message addressed to an unloaded service id is dropped silently; that
//! is the normal partial-startup/shutdown race, not an error. An oversized
//! coalesced message or a foreign-order message whose function registered
//! no endian converter is a contract defect and aborts.

use std::sync::Arc;

use tracing::{debug, trace};

use conclave_core::engine::NodeId;
use conclave_core::header::{HEADER_LEN, RoutingHeader};

use crate::registry::{Route, ServiceRegistry};

/// Default upper bound on one coalesced message.
pub const MESSAGE_SIZE_MAX: usize = 1024 * 1024;

/// Routes delivered payloads to registered engine handlers.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    scratch: Vec<u8>,
}

impl Dispatcher {
    /// Creates a dispatcher with the default [`MESSAGE_SIZE_MAX`] bound.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_max_message_size(registry, MESSAGE_SIZE_MAX)
    }

    /// Creates a dispatcher with an explicit maximum message size.
    pub fn with_max_message_size(registry: Arc<ServiceRegistry>, max_message_size: usize) -> Self {
        Self {
            registry,
            scratch: vec![0u8; max_message_size],
        }
    }

    /// Routes one delivered payload, invoking exactly one handler or none.
    ///
    /// # Panics
    ///
    /// Panics when the coalesced fragments exceed the maximum message size,
    /// when a foreign-order message resolves to a function without an
    /// endian converter, or when the function id is past the engine's
    /// table. All three are fatal contract violations by the transport or
    /// the engine author.
    pub fn deliver(&mut self, fragments: &[&[u8]], nodeid: NodeId, foreign_endian: bool) {
        if fragments.is_empty() {
            return;
        }
        if fragments.len() == 1 && !foreign_endian {
            let msg = fragments[0];
            let Some(header) = RoutingHeader::read_from(msg) else {
                debug!(len = msg.len(), "dropping undersized message");
                return;
            };
            self.invoke(header, msg, nodeid);
            return;
        }

        // Coalesce into the scratch buffer; the protocol guarantees
        // messages never exceed the bound.
        let mut len = 0usize;
        for fragment in fragments {
            assert!(
                len + fragment.len() <= self.scratch.len(),
                "coalesced message exceeds the maximum message size ({})",
                self.scratch.len()
            );
            self.scratch[len..len + fragment.len()].copy_from_slice(fragment);
            len += fragment.len();
        }

        let Some(mut header) = RoutingHeader::read_from(&self.scratch[..len]) else {
            debug!(len, "dropping undersized message");
            return;
        };

        if foreign_endian {
            header.swab();
            header.write_to(&mut self.scratch[..HEADER_LEN]);
            match self
                .registry
                .route(header.service_id(), header.function_id())
            {
                Route::Unloaded => {
                    trace!(
                        service = header.service_id(),
                        "message for unloaded service dropped"
                    );
                }
                Route::NoSuchFunction { engine, table_len } => {
                    panic!(
                        "engine '{engine}' has no function {} (table length {table_len})",
                        header.function_id()
                    );
                }
                Route::Function {
                    handler,
                    endian_convert,
                } => {
                    let Some(convert) = endian_convert else {
                        panic!(
                            "function ({}, {}) received foreign-order traffic without an endian converter",
                            header.service_id(),
                            header.function_id()
                        );
                    };
                    convert(&mut self.scratch[..len]);
                    self.registry
                        .bump_rx(header.service_id(), header.function_id());
                    handler(&header, &self.scratch[..len], nodeid);
                }
            }
            return;
        }

        let msg = &self.scratch[..len];
        self.invoke(header, msg, nodeid);
    }

    fn invoke(&self, header: RoutingHeader, msg: &[u8], nodeid: NodeId) {
        match self
            .registry
            .route(header.service_id(), header.function_id())
        {
            Route::Unloaded => {
                trace!(
                    service = header.service_id(),
                    "message for unloaded service dropped"
                );
            }
            Route::NoSuchFunction { engine, table_len } => {
                panic!(
                    "engine '{engine}' has no function {} (table length {table_len})",
                    header.function_id()
                );
            }
            Route::Function { handler, .. } => {
                self.registry
                    .bump_rx(header.service_id(), header.function_id());
                handler(&header, msg, nodeid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::engine::ServiceEngine;
    use conclave_core::header::pack_id;
    use conclave_core::resolver::{EngineResolver, StaticResolver};
    use conclave_core::store::ObjectStore;
    use parking_lot::Mutex;

    type Received = Arc<Mutex<Vec<(u16, u16, Vec<u8>, NodeId)>>>;

    fn setup() -> (Arc<StaticResolver>, Arc<ServiceRegistry>) {
        let resolver = Arc::new(StaticResolver::new());
        let store = Arc::new(ObjectStore::new());
        let registry = Arc::new(
            ServiceRegistry::new(resolver.clone() as Arc<dyn EngineResolver>, store).unwrap(),
        );
        (resolver, registry)
    }

    /// Registers an engine whose handlers record their own identity and the
    /// full message bytes.
    fn recording_engine(
        resolver: &StaticResolver,
        name: &'static str,
        id: u16,
        functions: usize,
        with_converter: bool,
        received: Received,
    ) {
        resolver.register(
            name,
            0,
            Arc::new(move || {
                let mut builder = ServiceEngine::builder(id, name);
                for fn_idx in 0..functions as u16 {
                    let received = received.clone();
                    let handler = move |header: &RoutingHeader, msg: &[u8], nodeid: NodeId| {
                        received.lock().push((id, fn_idx, msg.to_vec(), nodeid));
                        assert_eq!(header.service_id(), id);
                        assert_eq!(header.function_id(), fn_idx);
                    };
                    builder = if with_converter {
                        builder.function_with_converter(handler, |_msg: &mut [u8]| {})
                    } else {
                        builder.function(handler)
                    };
                }
                builder.build()
            }),
        );
    }

    fn message(service_id: u16, function_id: u16, body: &[u8]) -> Vec<u8> {
        let mut msg = vec![0u8; HEADER_LEN + body.len()];
        RoutingHeader::new(service_id, function_id, msg.len() as u32).write_to(&mut msg);
        msg[HEADER_LEN..].copy_from_slice(body);
        msg
    }

    #[test]
    fn routes_to_exactly_one_handler() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 3, false, received.clone());
        recording_engine(&resolver, "conclave_quorum", 6, 2, false, received.clone());
        registry.link("conclave_cpg", 0).unwrap();
        registry.link("conclave_quorum", 0).unwrap();

        let mut dispatcher = Dispatcher::new(registry);
        let msg = message(2, 1, b"payload");
        dispatcher.deliver(&[&msg], NodeId(7), false);

        let calls = received.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 2);
        assert_eq!(calls[0].1, 1);
        assert_eq!(calls[0].2, msg);
        assert_eq!(calls[0].3, NodeId(7));
    }

    #[test]
    fn unknown_service_is_a_silent_idempotent_drop() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 1, false, received.clone());
        registry.link("conclave_cpg", 0).unwrap();

        let mut dispatcher = Dispatcher::new(registry.clone());
        let msg = message(9, 0, b"nobody home");
        for _ in 0..3 {
            dispatcher.deliver(&[&msg], NodeId(1), false);
        }

        assert!(received.lock().is_empty());
        assert_eq!(registry.loaded_ids(), vec![2]);
        assert_eq!(registry.counter(2, 0, "rx"), Some(0));
    }

    #[test]
    fn fragments_coalesce_identically_to_a_single_buffer() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 1, false, received.clone());
        registry.link("conclave_cpg", 0).unwrap();

        let body: Vec<u8> = (0..4188u32).map(|i| (i % 251) as u8).collect();
        let msg = message(2, 0, &body);
        assert_eq!(msg.len(), 4196);

        let mut dispatcher = Dispatcher::with_max_message_size(registry, 65536);
        // Fragment lengths 4, 100, 4092 summing to the declared size.
        dispatcher.deliver(&[&msg[..4], &msg[4..104], &msg[104..]], NodeId(3), false);
        dispatcher.deliver(&[&msg], NodeId(3), false);

        let calls = received.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].2, msg);
        assert_eq!(calls[0].2, calls[1].2);
    }

    #[test]
    #[should_panic(expected = "maximum message size")]
    fn oversized_coalesce_aborts() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 1, false, received);
        registry.link("conclave_cpg", 0).unwrap();

        let mut dispatcher = Dispatcher::with_max_message_size(registry, 16);
        let msg = message(2, 0, &[0u8; 32]);
        dispatcher.deliver(&[&msg[..8], &msg[8..]], NodeId(1), false);
    }

    #[test]
    fn foreign_order_header_is_swapped_exactly_once() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cfg", 3, 3, true, received.clone());
        registry.link("conclave_cfg", 0).unwrap();

        // Build the message as a sender of the opposite byte order would:
        // both header fields byte-swapped relative to us.
        let body = b"remote state";
        let size = (HEADER_LEN + body.len()) as u32;
        let mut msg = vec![0u8; size as usize];
        let foreign = RoutingHeader {
            id: pack_id(3, 2).swap_bytes(),
            size: size.swap_bytes(),
        };
        foreign.write_to(&mut msg);
        msg[HEADER_LEN..].copy_from_slice(body);

        let mut dispatcher = Dispatcher::new(registry);
        dispatcher.deliver(&[&msg], NodeId(5), true);

        let calls = received.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 3);
        assert_eq!(calls[0].1, 2);
        // The stored message carries the corrected header bytes.
        let corrected = RoutingHeader::read_from(&calls[0].2).unwrap();
        assert_eq!(corrected.id, pack_id(3, 2));
        assert_eq!(corrected.size, size);
        assert_eq!(&calls[0].2[HEADER_LEN..], body);
    }

    #[test]
    #[should_panic(expected = "endian converter")]
    fn foreign_order_without_a_converter_aborts() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 1, false, received);
        registry.link("conclave_cpg", 0).unwrap();

        let size = HEADER_LEN as u32;
        let mut msg = vec![0u8; HEADER_LEN];
        RoutingHeader {
            id: pack_id(2, 0).swap_bytes(),
            size: size.swap_bytes(),
        }
        .write_to(&mut msg);

        let mut dispatcher = Dispatcher::new(registry);
        dispatcher.deliver(&[&msg], NodeId(1), true);
    }

    #[test]
    fn rx_counter_tracks_dispatches() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 2, false, received);
        registry.link("conclave_cpg", 0).unwrap();

        let mut dispatcher = Dispatcher::new(registry.clone());
        let msg = message(2, 1, b"x");
        dispatcher.deliver(&[&msg], NodeId(1), false);
        dispatcher.deliver(&[&msg], NodeId(1), false);

        assert_eq!(registry.counter(2, 1, "rx"), Some(2));
        assert_eq!(registry.counter(2, 0, "rx"), Some(0));
        assert_eq!(registry.counter(2, 1, "tx"), Some(0));
    }

    #[test]
    fn undersized_message_is_dropped() {
        let (resolver, registry) = setup();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        recording_engine(&resolver, "conclave_cpg", 2, 1, false, received.clone());
        registry.link("conclave_cpg", 0).unwrap();

        let mut dispatcher = Dispatcher::new(registry);
        dispatcher.deliver(&[&[0u8; 3][..]], NodeId(1), false);
        assert!(received.lock().is_empty());
    }
}
