// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server and server-factory boundary contracts, plus the channel server.
//!
//! Concrete network listeners (HTTP, stdio loops) live outside the core;
//! they implement [`Server`] and are produced by a [`ServerFactory`]
//! registered under the factory id the transport configuration names.  The
//! in-process [`ChannelServer`] is the reference implementation and the
//! workhorse of the integration tests.

use crate::{Dispatcher, TransportKind};
use csh_capability::Capability;
use csh_core::{RequestEnvelope, ResponseEntity, StatusCategory};
use csh_error::{CshError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A running transport endpoint serving one capability.
///
/// Every transition is idempotent.  `start` must return promptly; accept
/// loops run in the background.  `stop` attempts a graceful drain before
/// forced termination.
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    /// Prepare resources (bind sockets, allocate channels).
    async fn init(&self) -> Result<()>;

    /// Begin accepting requests.  Returns promptly.
    async fn start(&self) -> Result<()>;

    /// Stop accepting requests and drain.
    async fn stop(&self) -> Result<()>;

    /// The transport kind this server speaks.
    fn kind(&self) -> TransportKind;

    /// Returns `true` while the server accepts requests.
    fn is_running(&self) -> bool;
}

/// Produces servers for one transport factory id.
pub trait ServerFactory: Send + Sync {
    /// Factory identifier referenced from transport configuration.
    fn id(&self) -> &str;

    /// Create a server for one capability on one binding.
    ///
    /// # Errors
    ///
    /// A *configuration* error when the binding is unsupported.
    fn create(
        &self,
        capability: Arc<Capability>,
        binding: TransportKind,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Arc<dyn Server>>;
}

// ---------------------------------------------------------------------------
// ChannelServer
// ---------------------------------------------------------------------------

type ChannelRequest = (RequestEnvelope, oneshot::Sender<ResponseEntity>);

/// Client half of a [`ChannelServer`].
#[derive(Clone)]
pub struct ChannelClient {
    tx: mpsc::Sender<ChannelRequest>,
}

impl ChannelClient {
    /// Send one envelope and await its response.
    ///
    /// # Errors
    ///
    /// A *connection* error when the server has stopped.
    pub async fn call(&self, envelope: RequestEnvelope) -> Result<ResponseEntity> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((envelope, reply_tx))
            .await
            .map_err(|_| CshError::connection("channel server is not accepting requests"))?;
        reply_rx
            .await
            .map_err(|_| CshError::connection("channel server dropped the request"))
    }
}

/// In-process server: envelopes arrive over an mpsc channel and responses
/// return over per-request oneshots.
pub struct ChannelServer {
    capability: String,
    kind: TransportKind,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<ChannelHub>,
    running: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<ChannelRequest>>>,
}

impl ChannelServer {
    /// Create a stopped server for one capability.
    #[must_use]
    pub fn new(
        capability: &Capability,
        kind: TransportKind,
        dispatcher: Arc<Dispatcher>,
        hub: Arc<ChannelHub>,
    ) -> Self {
        Self {
            capability: capability.name().to_string(),
            kind,
            dispatcher,
            hub,
            running: AtomicBool::new(false),
            sender: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Server for ChannelServer {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (tx, mut rx) = mpsc::channel::<ChannelRequest>(64);
        *self.sender.lock().expect("sender lock poisoned") = Some(tx.clone());
        self.hub.attach(&self.capability, ChannelClient { tx });

        let dispatcher = Arc::clone(&self.dispatcher);
        let capability = self.capability.clone();
        tokio::spawn(async move {
            debug!(target: "csh.server", capability = %capability, "channel server accepting");
            while let Some((envelope, reply)) = rx.recv().await {
                let entity = dispatcher.dispatch(envelope).await;
                if reply.send(entity).is_err() {
                    warn!(target: "csh.server", capability = %capability, "caller went away");
                }
            }
            debug!(target: "csh.server", capability = %capability, "channel server drained");
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender closes the accept loop; in-flight requests
        // still get their replies (graceful drain).
        self.hub.detach(&self.capability);
        self.sender.lock().expect("sender lock poisoned").take();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ChannelHub and factory
// ---------------------------------------------------------------------------

/// Registry of live [`ChannelClient`]s, keyed by capability name.
///
/// Shared between a [`ChannelServerFactory`] and the test code that wants
/// to call the servers it produced.
#[derive(Default)]
pub struct ChannelHub {
    clients: RwLock<BTreeMap<String, ChannelClient>>,
}

impl ChannelHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, capability: &str, client: ChannelClient) {
        self.clients
            .write()
            .expect("hub lock poisoned")
            .insert(capability.to_string(), client);
    }

    fn detach(&self, capability: &str) {
        self.clients
            .write()
            .expect("hub lock poisoned")
            .remove(capability);
    }

    /// Client for the named capability, while its server is running.
    #[must_use]
    pub fn client(&self, capability: &str) -> Option<ChannelClient> {
        self.clients
            .read()
            .expect("hub lock poisoned")
            .get(capability)
            .cloned()
    }
}

/// Factory id of the channel server.
pub const CHANNEL_SERVER: &str = "channel";

/// Produces [`ChannelServer`]s and exposes their clients through a shared
/// [`ChannelHub`].
pub struct ChannelServerFactory {
    hub: Arc<ChannelHub>,
}

impl ChannelServerFactory {
    /// Create a factory around the given hub.
    #[must_use]
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self { hub }
    }

    /// The hub this factory attaches clients to.
    #[must_use]
    pub fn hub(&self) -> Arc<ChannelHub> {
        Arc::clone(&self.hub)
    }
}

impl ServerFactory for ChannelServerFactory {
    fn id(&self) -> &str {
        CHANNEL_SERVER
    }

    fn create(
        &self,
        capability: Arc<Capability>,
        binding: TransportKind,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Arc<dyn Server>> {
        Ok(Arc::new(ChannelServer::new(
            &capability,
            binding,
            dispatcher,
            Arc::clone(&self.hub),
        )))
    }
}

/// Map a response status to the wire-level HTTP code, as a convenience for
/// HTTP-speaking servers.
#[must_use]
pub fn http_status_of(entity: &ResponseEntity) -> u16 {
    match entity {
        ResponseEntity::Ok { .. } => StatusCategory::Success.http_status(),
        ResponseEntity::Error { status, .. } => status.http_status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_follows_category() {
        let ok = ResponseEntity::ok(Default::default(), Default::default());
        assert_eq!(http_status_of(&ok), 200);
        let err = ResponseEntity::error(StatusCategory::BadRequest, "nope");
        assert_eq!(http_status_of(&err), 400);
        let err = ResponseEntity::error(StatusCategory::ServiceUnavailable, "later");
        assert_eq!(http_status_of(&err), 503);
    }

    #[test]
    fn hub_attach_detach_round_trips() {
        let hub = ChannelHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.attach("blog", ChannelClient { tx });
        assert!(hub.client("blog").is_some());
        hub.detach("blog");
        assert!(hub.client("blog").is_none());
    }
}
