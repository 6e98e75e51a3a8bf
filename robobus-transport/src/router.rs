//! Link ownership and message demultiplexing.
//!
//! The router owns every live link of a node together with the subscription
//! registry, the request tracker and the request handler. Inbound frames are
//! decoded and dispatched by kind:
//!
//! - `pub` goes to the subscription registry (or updates link interest for
//!   the reserved [`INTEREST_TOPIC`])
//! - `req` runs the request handler on its own task and writes the reply back
//!   over the originating link
//! - `rep` resolves the matching pending request, or is discarded

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use robobus_core::{BoxedStream, MessageCodec, NodeId, Value};
use tokio::sync::{mpsc, Semaphore};

use crate::config::NodeConfig;
use crate::error::{BusError, HandlerError, RemoteError};
use crate::link::{self, LinkDirection, LinkError, LinkId, LinkResult, LinkTasks, PeerHandle};
use crate::message::{
    CorrelationId, InterestAnnouncement, Message, ReplyOutcome, INTEREST_TOPIC, RESERVED_PREFIX,
};
use crate::registry::{Publication, SubscriptionRegistry, TopicPattern};
use crate::tracker::RequestTracker;
use crate::wire::{encode_frame, WireError};

/// An inbound request as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Calling node.
    pub from: NodeId,
    /// Correlation id the reply will carry.
    pub cid: CorrelationId,
    /// Request payload.
    pub body: Value,
}

/// Answers requests addressed to a node.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = Result<Value,
/// HandlerError>>`, so an async closure is enough:
///
/// ```rust
/// use robobus_transport::{HandlerError, Request, RequestHandler};
/// use serde_json::json;
///
/// fn assert_handler(_: impl RequestHandler) {}
///
/// assert_handler(|req: Request| async move {
///     match req.body["n"].as_i64() {
///         Some(n) => Ok(json!({ "n": n + 1 })),
///         None => Err(HandlerError::new("missing n")),
///     }
/// });
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the reply payload, or refuse.
    async fn handle(&self, request: Request) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: Request) -> Result<Value, HandlerError> {
        (self)(request).await
    }
}

struct LinkEntry {
    sender: mpsc::Sender<Vec<u8>>,
    label: String,
    direction: LinkDirection,
    remote: Option<NodeId>,
    // None until the peer announces; treated as interested in everything.
    interest: Option<(u64, Vec<TopicPattern>)>,
    tasks: Option<LinkTasks>,
}

impl LinkEntry {
    fn interested_in(&self, topic: &str) -> bool {
        self.interest
            .as_ref()
            .map_or(true, |(_, patterns)| patterns.iter().any(|p| p.matches(topic)))
    }

    fn handle(&self, id: LinkId) -> PeerHandle {
        PeerHandle {
            link_id: id,
            label: self.label.clone(),
            direction: self.direction,
            remote: self.remote.clone(),
        }
    }
}

/// Routing state of one node.
pub(crate) struct Router {
    local_id: NodeId,
    codec: Arc<dyn MessageCodec>,
    max_frame_size: usize,
    send_queue_capacity: usize,
    next_link_id: AtomicU64,
    closed: AtomicBool,
    links: RwLock<HashMap<LinkId, LinkEntry>>,
    registry: SubscriptionRegistry,
    tracker: Arc<RequestTracker>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    // One permit per inbound request being handled.
    handler_permits: Arc<Semaphore>,
    max_concurrent_handlers: usize,
}

impl Router {
    pub(crate) fn new(local_id: NodeId, config: &NodeConfig) -> Self {
        Self {
            local_id,
            codec: config.codec.build(),
            max_frame_size: config.max_frame_size,
            send_queue_capacity: config.send_queue_capacity.max(1),
            next_link_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            links: RwLock::new(HashMap::new()),
            registry: SubscriptionRegistry::new(),
            tracker: Arc::new(RequestTracker::new(config.max_pending_requests)),
            handler: RwLock::new(None),
            handler_permits: Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1))),
            max_concurrent_handlers: config.max_concurrent_handlers.max(1),
        }
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub(crate) fn set_handler(&self, handler: Option<Arc<dyn RequestHandler>>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Register a stream as a new link and start its tasks.
    pub(crate) async fn add_link(
        self: &Arc<Self>,
        stream: BoxedStream,
        label: String,
        direction: LinkDirection,
    ) -> Result<PeerHandle, BusError> {
        let id = LinkId(self.next_link_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.send_queue_capacity);

        {
            let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
            if self.closed.load(Ordering::Acquire) {
                return Err(BusError::Closed);
            }
            links.insert(
                id,
                LinkEntry {
                    sender,
                    label: label.clone(),
                    direction,
                    remote: None,
                    interest: None,
                    tasks: None,
                },
            );
        }

        let tasks = link::spawn_link(self.clone(), id, stream, receiver, self.max_frame_size);
        {
            let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
            match links.get_mut(&id) {
                Some(entry) => entry.tasks = Some(tasks),
                // Torn down before the tasks were attached.
                None => tasks.abort(),
            }
        }

        tracing::info!("{}: {} link established with {}", id, direction, label);

        match self.interest_frame() {
            Ok(frame) => {
                let _ = self.send_to(id, frame).await;
            }
            Err(e) => tracing::warn!("{}: failed to encode interest announcement: {}", id, e),
        }

        Ok(PeerHandle {
            link_id: id,
            label,
            direction,
            remote: None,
        })
    }

    /// Encode and frame a message.
    pub(crate) fn encode(&self, message: Message) -> Result<Vec<u8>, BusError> {
        let bytes = self.codec.encode(&message.into_value())?;
        Ok(encode_frame(&bytes, self.max_frame_size)?)
    }

    /// Queue a frame on one link, waiting under backpressure.
    pub(crate) async fn send_to(&self, id: LinkId, frame: Vec<u8>) -> Result<(), BusError> {
        let sender = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links
                .get(&id)
                .map(|entry| entry.sender.clone())
                .ok_or(BusError::LinkClosed)?
        };
        sender.send(frame).await.map_err(|_| BusError::LinkClosed)
    }

    /// Deliver locally and write to every interested link.
    pub(crate) async fn publish(&self, topic: &str, body: Value) -> Result<(), BusError> {
        let targets: Vec<(LinkId, mpsc::Sender<Vec<u8>>)> = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links
                .iter()
                .filter(|(_, entry)| entry.interested_in(topic))
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect()
        };

        let frame = if targets.is_empty() {
            None
        } else {
            Some(self.encode(Message::Publish {
                topic: topic.to_string(),
                from: self.local_id.clone(),
                body: body.clone(),
            })?)
        };

        let delivered = self.registry.dispatch(&Publication {
            topic: topic.to_string(),
            from: self.local_id.clone(),
            body,
        });

        let mut written = 0;
        if let Some(frame) = frame {
            for (id, sender) in targets {
                if sender.send(frame.clone()).await.is_ok() {
                    written += 1;
                } else {
                    tracing::debug!("{}: link gone while publishing {}", id, topic);
                }
            }
        }

        tracing::debug!(
            "published {}: {} local deliveries, {} links",
            topic,
            delivered,
            written
        );
        Ok(())
    }

    fn interest_frame(&self) -> Result<Vec<u8>, BusError> {
        let (version, patterns) = self.registry.interest();
        let body = serde_json::to_value(InterestAnnouncement { version, patterns }).map_err(|e| {
            BusError::Decode {
                message: e.to_string(),
            }
        })?;
        self.encode(Message::Publish {
            topic: INTEREST_TOPIC.to_string(),
            from: self.local_id.clone(),
            body,
        })
    }

    /// Tell every link about the current pattern set.
    pub(crate) async fn announce_interest(&self) {
        let frame = match self.interest_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("failed to encode interest announcement: {}", e);
                return;
            }
        };

        let senders: Vec<mpsc::Sender<Vec<u8>>> = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links.values().map(|entry| entry.sender.clone()).collect()
        };
        for sender in senders {
            let _ = sender.send(frame.clone()).await;
        }
    }

    /// Dispatch one inbound frame. Errors tear the link down.
    pub(crate) fn handle_frame(self: &Arc<Self>, id: LinkId, frame: &[u8]) -> LinkResult<()> {
        let value = self
            .codec
            .decode(frame)
            .map_err(|e| LinkError::Decode(e.to_string()))?;
        let message = Message::from_value(value).map_err(|e| LinkError::Decode(e.to_string()))?;

        tracing::debug!("{}: {} from {}", id, message.kind(), message.sender());
        self.learn_remote(id, message.sender());

        match message {
            Message::Publish { topic, from, body } => {
                if topic == INTEREST_TOPIC {
                    self.update_interest(id, body);
                } else if topic.starts_with(RESERVED_PREFIX) {
                    tracing::debug!("{}: ignoring reserved topic {}", id, topic);
                } else {
                    self.registry.dispatch(&Publication { topic, from, body });
                }
            }
            Message::Request { cid, from, body } => {
                self.spawn_request(id, Request { from, cid, body });
            }
            Message::Reply { cid, body, .. } => {
                let result = match ReplyOutcome::from_value(body) {
                    Ok(outcome) => outcome.into_result().map_err(BusError::Remote),
                    Err(e) => Err(e.into()),
                };
                if !self.tracker.resolve_from(id, &cid, result) {
                    tracing::warn!(
                        "{}: discarding reply {} with no pending request on this link",
                        id,
                        cid
                    );
                }
            }
        }
        Ok(())
    }

    fn learn_remote(&self, id: LinkId, from: &NodeId) {
        let unknown = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links.get(&id).is_some_and(|entry| entry.remote.is_none())
        };
        if unknown {
            let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = links.get_mut(&id) {
                if entry.remote.is_none() {
                    tracing::info!("{}: peer is {}", id, from);
                    entry.remote = Some(from.clone());
                }
            }
        }
    }

    fn update_interest(&self, id: LinkId, body: Value) {
        let announcement: InterestAnnouncement = match serde_json::from_value(body) {
            Ok(announcement) => announcement,
            Err(e) => {
                tracing::warn!("{}: ignoring malformed interest announcement: {}", id, e);
                return;
            }
        };

        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = links.get_mut(&id) {
            let newer = entry
                .interest
                .as_ref()
                .map_or(true, |(version, _)| announcement.version > *version);
            if newer {
                tracing::debug!(
                    "{}: interest v{} {:?}",
                    id,
                    announcement.version,
                    announcement.patterns
                );
                let patterns = announcement
                    .patterns
                    .iter()
                    .map(|p| TopicPattern::parse(p))
                    .collect();
                entry.interest = Some((announcement.version, patterns));
            }
        }
    }

    fn spawn_request(self: &Arc<Self>, id: LinkId, request: Request) {
        let permit = match self.handler_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.refuse_overloaded(id, request.cid);
                return;
            }
        };

        let router = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let cid = request.cid.clone();
            let handler = router
                .handler
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();

            let outcome = match handler {
                None => ReplyOutcome::Err(RemoteError::no_handler()),
                Some(handler) => {
                    match tokio::spawn(async move { handler.handle(request).await }).await {
                        Ok(Ok(value)) => ReplyOutcome::Ok(value),
                        Ok(Err(e)) => ReplyOutcome::Err(e.into()),
                        Err(join) => {
                            tracing::warn!("{}: request handler for {} failed: {}", id, cid, join);
                            ReplyOutcome::Err(RemoteError::handler_failed("handler panicked"))
                        }
                    }
                }
            };

            router.send_reply(id, cid, outcome).await;
        });
    }

    /// Answer `Overloaded` without spawning; dropped if the link queue is full.
    fn refuse_overloaded(&self, id: LinkId, cid: CorrelationId) {
        tracing::warn!(
            "{}: refusing request {}, {} handlers already running",
            id,
            cid,
            self.max_concurrent_handlers
        );
        let outcome = ReplyOutcome::Err(RemoteError::overloaded(self.max_concurrent_handlers));
        let frame = match self.encode(Message::Reply {
            cid: cid.clone(),
            from: self.local_id.clone(),
            body: outcome.into_value(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("{}: failed to encode refusal {}: {}", id, cid, e);
                return;
            }
        };

        let sender = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links.get(&id).map(|entry| entry.sender.clone())
        };
        if let Some(sender) = sender {
            if sender.try_send(frame).is_err() {
                tracing::debug!("{}: refusal {} dropped, send queue full", id, cid);
            }
        }
    }

    async fn send_reply(&self, id: LinkId, cid: CorrelationId, outcome: ReplyOutcome) {
        let reply = |body| Message::Reply {
            cid: cid.clone(),
            from: self.local_id.clone(),
            body,
        };

        let frame = match self.encode(reply(outcome.into_value())) {
            Ok(frame) => frame,
            Err(BusError::FrameTooLarge { size, max }) => {
                tracing::warn!("{}: reply {} too large ({} > {})", id, cid, size, max);
                let refusal = ReplyOutcome::Err(RemoteError::handler_failed(
                    WireError::FrameTooLarge { size, max }.to_string(),
                ));
                match self.encode(reply(refusal.into_value())) {
                    Ok(frame) => frame,
                    Err(_) => return,
                }
            }
            Err(e) => {
                tracing::warn!("{}: failed to encode reply {}: {}", id, cid, e);
                return;
            }
        };

        if let Err(e) = self.send_to(id, frame).await {
            tracing::debug!("{}: reply {} not sent: {}", id, cid, e);
        }
    }

    /// Called by link tasks when the link ends.
    pub(crate) fn link_terminated(&self, id: LinkId, reason: LinkError) {
        if let Some(entry) = self.remove_link(id) {
            match reason {
                LinkError::Closed => {
                    tracing::info!("{}: link with {} closed by peer", id, entry.label)
                }
                other => tracing::warn!(
                    "{}: tearing down link with {}: {}",
                    id,
                    entry.label,
                    other
                ),
            }
        }
    }

    /// Drop a link from the tables, stop its tasks and fail its requests.
    ///
    /// Only the first caller gets `Some`.
    fn remove_link(&self, id: LinkId) -> Option<LinkEntry> {
        let entry = self
            .links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)?;

        if let Some(tasks) = &entry.tasks {
            tasks.abort();
        }
        let failed = self.tracker.fail_link(id);
        if failed > 0 {
            tracing::debug!("{}: failed {} pending requests", id, failed);
        }
        Some(entry)
    }

    /// Close one link locally.
    pub(crate) fn disconnect(&self, id: LinkId) -> bool {
        match self.remove_link(id) {
            Some(entry) => {
                tracing::info!("{}: disconnected from {}", id, entry.label);
                true
            }
            None => false,
        }
    }

    /// Close every link and refuse new ones.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<LinkId> = {
            let links = self.links.read().unwrap_or_else(|e| e.into_inner());
            links.keys().copied().collect()
        };
        for id in ids {
            self.disconnect(id);
        }
        self.set_handler(None);
    }

    /// Handles of every live link, ordered by link id.
    pub(crate) fn peers(&self) -> Vec<PeerHandle> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<PeerHandle> = links.iter().map(|(id, e)| e.handle(*id)).collect();
        peers.sort_by_key(|p| p.link_id);
        peers
    }

    pub(crate) fn peer(&self, id: LinkId) -> Option<PeerHandle> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        links.get(&id).map(|entry| entry.handle(id))
    }

    /// Patterns the peer on `id` last announced, `None` before any announcement.
    pub(crate) fn peer_interest(&self, id: LinkId) -> Option<Vec<TopicPattern>> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        links
            .get(&id)
            .and_then(|entry| entry.interest.as_ref())
            .map(|(_, patterns)| patterns.clone())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner()).len();
        f.debug_struct("Router")
            .field("local_id", &self.local_id)
            .field("links", &links)
            .field("registry", &self.registry)
            .field("tracker", &self.tracker)
            .finish()
    }
}
