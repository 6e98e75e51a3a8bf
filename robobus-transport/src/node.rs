//! The public node handle.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use robobus_core::{Endpoint, NetworkProvider, NodeId, TokioNetworkProvider, Value};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::address::AddressTable;
use crate::config::NodeConfig;
use crate::error::BusError;
use crate::link::{LinkDirection, PeerHandle};
use crate::message::Message;
use crate::registry::{validate_topic, Publication, SubscriptionId, TopicPattern};
use crate::router::{RequestHandler, Router};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Handle returned by [`Node::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    pattern: TopicPattern,
}

impl SubscriptionHandle {
    /// Registry identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Pattern subscribed to.
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }
}

/// Handle of a [`Node::publish_every`] task.
#[derive(Debug, Clone)]
pub struct PeriodicHandle {
    abort: AbortHandle,
}

impl PeriodicHandle {
    /// Stop publishing.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Non-owning handle to a [`Node`].
///
/// Handlers that need their own node should capture one of these: a captured
/// [`Node`] clone is owned by the node's own tables and keeps it alive, so it
/// then only shuts down on an explicit [`Node::close`].
#[derive(Debug, Clone)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

impl WeakNode {
    /// The node, if any clone of it is still alive.
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

/// One participant on the bus.
///
/// Cheap to clone; clones share the same links, subscriptions and pending
/// requests. The node shuts down on [`close`](Self::close) or when the last
/// clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use robobus_transport::{Node, NodeConfig};
/// use robobus_core::Endpoint;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), robobus_transport::BusError> {
/// let arm = Node::new("arm", NodeConfig::default());
/// let bound = arm.bind(&Endpoint::tcp("127.0.0.1", 0)).await?;
/// arm.set_request_handler(|req: robobus_transport::Request| async move {
///     Ok::<_, robobus_transport::HandlerError>(json!({ "moved": req.body }))
/// });
///
/// let planner = Node::new("planner", NodeConfig::default());
/// let peer = planner.connect(&bound).await?;
/// let reply = planner.request(&peer, json!({ "joint": "elbow", "angle": 0.5 })).await?;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    config: NodeConfig,
    provider: Arc<dyn NetworkProvider>,
    router: Arc<Router>,
    addresses: AddressTable,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    periodic: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl Node {
    /// Create a node using Tokio networking.
    ///
    /// `name` is a human-readable prefix of the generated [`NodeId`].
    pub fn new(name: &str, config: NodeConfig) -> Self {
        Self::with_provider(name, config, Arc::new(TokioNetworkProvider::new()))
    }

    /// Create a node on a custom network provider.
    pub fn with_provider(
        name: &str,
        config: NodeConfig,
        provider: Arc<dyn NetworkProvider>,
    ) -> Self {
        let id = NodeId::generate(name);
        let router = Arc::new(Router::new(id.clone(), &config));
        let addresses = config.peers.iter().cloned().collect();

        tracing::debug!("node {} created", id);
        Self {
            inner: Arc::new(NodeInner {
                id,
                config,
                provider,
                router,
                addresses,
                listeners: Mutex::new(Vec::new()),
                periodic: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// This node's identity.
    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    /// Non-owning handle for use inside handlers.
    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Configuration the node was built with.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Named peer endpoints.
    pub fn addresses(&self) -> &AddressTable {
        &self.inner.addresses
    }

    /// Accept inbound links on `endpoint`.
    ///
    /// Returns the bound endpoint, with the real port when binding TCP port 0.
    /// Any number of peers may connect; each becomes its own link.
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<Endpoint, BusError> {
        self.ensure_open()?;
        let listener = self.inner.provider.bind(endpoint).await?;
        let local = listener.local_endpoint()?;

        let router = self.inner.router.clone();
        let label = local.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        match router.add_link(stream, remote, LinkDirection::Inbound).await {
                            Ok(_) => {}
                            Err(BusError::Closed) => break,
                            Err(e) => tracing::warn!("{}: rejected inbound link: {}", label, e),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("{}: accept failed: {}", label, e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        });

        let mut listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if self.inner.closed.load(Ordering::Acquire) {
            task.abort();
            return Err(BusError::Closed);
        }
        listeners.push(task);

        tracing::info!("node {} listening on {}", self.inner.id, local);
        Ok(local)
    }

    /// Open a link to `endpoint`.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<PeerHandle, BusError> {
        self.ensure_open()?;
        let timeout = self.inner.config.connect_timeout;
        let stream = match tokio::time::timeout(timeout, self.inner.provider.connect(endpoint)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(BusError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", endpoint, timeout),
                )))
            }
        };

        self.inner
            .router
            .add_link(stream, endpoint.to_string(), LinkDirection::Outbound)
            .await
    }

    /// Open a link to a peer from the address table.
    pub async fn connect_named(&self, name: &str) -> Result<PeerHandle, BusError> {
        let endpoint = self
            .inner
            .addresses
            .resolve(name)
            .ok_or_else(|| BusError::UnknownAddress(name.to_string()))?;
        self.connect(&endpoint).await
    }

    /// Publish `body` on `topic`.
    ///
    /// Local subscribers receive the value directly; remote peers get one
    /// frame per interested link.
    pub async fn publish(&self, topic: &str, body: Value) -> Result<(), BusError> {
        self.ensure_open()?;
        validate_topic(topic)?;
        self.inner.router.publish(topic, body).await
    }

    /// Publish `producer()` on `topic` every `period`.
    ///
    /// The first publication happens immediately. The task stops when the
    /// handle is cancelled or the node closes.
    pub fn publish_every<F>(
        &self,
        topic: &str,
        period: Duration,
        mut producer: F,
    ) -> Result<PeriodicHandle, BusError>
    where
        F: FnMut() -> Value + Send + 'static,
    {
        self.ensure_open()?;
        validate_topic(topic)?;

        let weak: Weak<NodeInner> = Arc::downgrade(&self.inner);
        let topic = topic.to_string();
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let node = Node { inner };
                match node.publish(&topic, producer()).await {
                    Ok(()) => {}
                    Err(BusError::Closed) => break,
                    Err(e) => tracing::warn!("periodic publish on {} failed: {}", topic, e),
                }
            }
        });

        let abort = task.abort_handle();
        let mut periodic = self.inner.periodic.lock().unwrap_or_else(|e| e.into_inner());
        periodic.retain(|handle| !handle.is_finished());
        periodic.push(abort.clone());
        Ok(PeriodicHandle { abort })
    }

    /// Call `handler` for every publication matching `pattern`.
    ///
    /// See [`TopicPattern::parse`] for the pattern syntax. Deliveries to one
    /// subscription happen in arrival order, one at a time.
    ///
    /// The handler runs on the receiving link's task: keep it short, and do
    /// not unsubscribe it or publish locally to a topic it matches from
    /// inside the call. Closing the node from inside is fine.
    ///
    /// A handler that captures a [`Node`] clone keeps this node alive until
    /// [`close`](Self::close); capture [`downgrade`](Self::downgrade) instead.
    pub async fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<SubscriptionHandle, BusError>
    where
        F: FnMut(Publication) + Send + 'static,
    {
        self.ensure_open()?;
        validate_topic(pattern)?;

        let pattern = TopicPattern::parse(pattern);
        let router = &self.inner.router;
        let id = router.registry().subscribe(pattern.clone(), Box::new(handler));
        tracing::debug!("node {} subscribed {} to {}", self.inner.id, id, pattern);

        router.announce_interest().await;
        Ok(SubscriptionHandle { id, pattern })
    }

    /// Subscribe with a queue the caller drains instead of a callback.
    pub async fn subscribe_queue(
        &self,
        pattern: &str,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<Publication>), BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .subscribe(pattern, move |publication| {
                let _ = tx.send(publication);
            })
            .await?;
        Ok((handle, rx))
    }

    /// Remove a subscription.
    ///
    /// Once this returns the handler is never called again. Returns `false` if
    /// it was already gone.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let router = &self.inner.router;
        let removed = router.registry().unsubscribe(handle.id);
        if removed && !self.is_closed() {
            router.announce_interest().await;
        }
        removed
    }

    /// Install the handler answering requests. Replaces any previous one.
    ///
    /// As with [`subscribe`](Self::subscribe), a handler holding a [`Node`]
    /// clone keeps the node alive; hold a [`WeakNode`] instead.
    pub fn set_request_handler(&self, handler: impl RequestHandler) {
        self.inner.router.set_handler(Some(Arc::new(handler)));
    }

    /// Remove the request handler; requests are then refused with
    /// [`RemoteErrorKind::NoHandler`](crate::RemoteErrorKind::NoHandler).
    pub fn clear_request_handler(&self) {
        self.inner.router.set_handler(None);
    }

    /// Send a request over `peer` and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `Timeout` when no reply arrives within `timeout`
    /// - `Remote` when the peer refused or had no handler
    /// - `LinkClosed` when the link goes away first
    /// - `Cancelled` when this node closes first
    ///
    /// There is no other way to cancel an in-flight call; dropping the future
    /// only stops waiting locally.
    pub async fn call(
        &self,
        peer: &PeerHandle,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BusError> {
        self.ensure_open()?;
        let router = &self.inner.router;
        let tracker = router.tracker();

        let deadline = deadline_after(timeout);
        let cid = tracker.next_correlation_id();
        let pending = tracker.register(cid.clone(), deadline, Some(peer.link_id))?;

        let frame = router.encode(Message::Request {
            cid,
            from: self.inner.id.clone(),
            body: payload,
        })?;

        match tokio::time::timeout_at(deadline, router.send_to(peer.link_id, frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(BusError::Timeout(timeout)),
        }

        pending.wait().await
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn request(&self, peer: &PeerHandle, payload: Value) -> Result<Value, BusError> {
        self.call(peer, payload, self.inner.config.request_timeout)
            .await
    }

    /// Live links, ordered by link id.
    pub fn peers(&self) -> Vec<PeerHandle> {
        self.inner.router.peers()
    }

    /// Fresh handle for the link to node `id`.
    pub fn peer(&self, id: &NodeId) -> Result<PeerHandle, BusError> {
        self.inner
            .router
            .peers()
            .into_iter()
            .find(|peer| peer.remote() == Some(id))
            .ok_or_else(|| BusError::UnknownPeer(id.to_string()))
    }

    /// Refresh a handle, e.g. to learn the remote identity.
    pub fn refresh(&self, peer: &PeerHandle) -> Option<PeerHandle> {
        self.inner.router.peer(peer.link_id)
    }

    /// Patterns the peer last announced, `None` if it has not announced yet.
    pub fn peer_interest(&self, peer: &PeerHandle) -> Option<Vec<TopicPattern>> {
        self.inner.router.peer_interest(peer.link_id)
    }

    /// Close one link. Its pending requests fail with `LinkClosed`.
    pub fn disconnect(&self, peer: &PeerHandle) -> bool {
        self.inner.router.disconnect(peer.link_id)
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.router.tracker().len()
    }

    /// Shut the node down.
    ///
    /// Stops accepting, resolves every pending request with `Cancelled`,
    /// closes every link and drops every subscription. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl NodeInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for task in self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }
        for task in self
            .periodic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }

        let cancelled = self.router.tracker().cancel_all();
        self.router.close();
        self.router.registry().clear();

        tracing::info!("node {} closed, {} requests cancelled", self.id, cancelled);
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("router", &self.inner.router)
            .finish()
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        // Far enough to never fire in practice.
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}
