//! Topic patterns and the subscription registry.
//!
//! Patterns come in three forms, matched by the pure function
//! [`TopicPattern::matches`]:
//!
//! | Text | Pattern | Matches |
//! |------|---------|---------|
//! | `arm/joint` | `Exact` | `arm/joint` only |
//! | `arm/#` | `Prefix("arm")` | `arm`, `arm/joint`, `arm/joint/elbow` |
//! | `arm/*/temp` | `Glob` | `*` any run of characters, `?` exactly one |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use robobus_core::{NodeId, Value};

use crate::error::BusError;
use crate::message::RESERVED_PREFIX;

/// Topic matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Exactly this topic.
    Exact(String),
    /// This topic and every `/`-separated sub-topic. Empty matches everything.
    Prefix(String),
    /// Shell-style glob over the whole topic.
    Glob(String),
}

impl TopicPattern {
    /// Parse the textual form.
    ///
    /// `a/b/#` (or a bare `#`) is a prefix, text containing `*` or `?` is a
    /// glob, anything else is exact.
    pub fn parse(text: &str) -> Self {
        if text == "#" {
            TopicPattern::Prefix(String::new())
        } else if let Some(prefix) = text.strip_suffix("/#") {
            TopicPattern::Prefix(prefix.to_string())
        } else if text.contains(['*', '?']) {
            TopicPattern::Glob(text.to_string())
        } else {
            TopicPattern::Exact(text.to_string())
        }
    }

    /// Whether `topic` matches.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(exact) => exact == topic,
            TopicPattern::Prefix(prefix) => {
                prefix.is_empty()
                    || topic
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            }
            TopicPattern::Glob(glob) => {
                let pattern: Vec<char> = glob.chars().collect();
                let text: Vec<char> = topic.chars().collect();
                glob_match(&pattern, &text)
            }
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicPattern::Exact(text) | TopicPattern::Glob(text) => f.write_str(text),
            TopicPattern::Prefix(prefix) if prefix.is_empty() => f.write_str("#"),
            TopicPattern::Prefix(prefix) => write!(f, "{}/#", prefix),
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(text: &str) -> Self {
        TopicPattern::parse(text)
    }
}

/// Glob matching over characters with backtracking on the last `*`.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Reject empty and reserved topics.
pub(crate) fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() {
        return Err(BusError::InvalidTopic {
            topic: topic.to_string(),
            reason: "empty",
        });
    }
    if topic.starts_with(RESERVED_PREFIX) {
        return Err(BusError::InvalidTopic {
            topic: topic.to_string(),
            reason: "reserved prefix",
        });
    }
    Ok(())
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Topic it was published on.
    pub topic: String,
    /// Publishing node.
    pub from: NodeId,
    /// Published value.
    pub body: Value,
}

/// Subscriber callback.
pub type Handler = Box<dyn FnMut(Publication) + Send>;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Slot {
    pattern: TopicPattern,
    // Set by `clear`, which must not wait on a handler that is running.
    dead: AtomicBool,
    // None once unsubscribed. Held for the whole handler call.
    handler: Mutex<Option<Handler>>,
}

/// Topic-pattern to handler bindings.
///
/// Dispatch snapshots the matching slots under a read lock and calls each
/// handler under its own slot lock. [`unsubscribe`](Self::unsubscribe) takes
/// that slot lock before returning, so once it returns the handler is never
/// called again.
///
/// A handler must not unsubscribe itself, or publish locally to a topic it
/// matches, from inside its own call: both wait on the slot lock it holds.
/// [`clear`](Self::clear) does not, so closing the node from a handler is fine.
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    // Bumped under the write lock on every change of the pattern set.
    version: AtomicU64,
    slots: RwLock<BTreeMap<SubscriptionId, Arc<Slot>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            version: AtomicU64::new(0),
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Bind a handler to a pattern.
    pub fn subscribe(&self, pattern: TopicPattern, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot {
            pattern,
            dead: AtomicBool::new(false),
            handler: Mutex::new(Some(handler)),
        });

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(id, slot);
        self.version.fetch_add(1, Ordering::AcqRel);
        id
    }

    /// Remove a subscription.
    ///
    /// Blocks until an in-flight delivery to this handler finishes. Returns
    /// `false` if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let slot = {
            let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
            let slot = slots.remove(&id);
            if slot.is_some() {
                self.version.fetch_add(1, Ordering::AcqRel);
            }
            slot
        };

        match slot {
            Some(slot) => {
                slot.handler
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                true
            }
            None => false,
        }
    }

    /// Deliver a publication to every matching subscription.
    ///
    /// Returns the number of handlers called.
    pub fn dispatch(&self, publication: &Publication) -> usize {
        let matching: Vec<Arc<Slot>> = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            slots
                .values()
                .filter(|slot| slot.pattern.matches(&publication.topic))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for slot in matching {
            let mut handler = slot.handler.lock().unwrap_or_else(|e| e.into_inner());
            if slot.dead.load(Ordering::Acquire) {
                continue;
            }
            // Unsubscribed between snapshot and lock: skip.
            if let Some(handler) = handler.as_mut() {
                handler(publication.clone());
                delivered += 1;
            }
        }
        delivered
    }

    /// Current pattern set in textual form, deduplicated, with its version.
    pub fn interest(&self) -> (u64, Vec<String>) {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut patterns: Vec<String> = slots.values().map(|s| s.pattern.to_string()).collect();
        patterns.sort();
        patterns.dedup();
        (self.version.load(Ordering::Acquire), patterns)
    }

    /// Remove every subscription.
    ///
    /// Unlike [`unsubscribe`](Self::unsubscribe) this never waits for a
    /// running handler, so it may be reached from inside one (a handler
    /// closing its node). A handler already running finishes its current
    /// call; no further call starts once this returns. Its box is dropped
    /// with the last in-flight delivery.
    pub fn clear(&self) {
        let drained: Vec<Arc<Slot>> = {
            let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
            self.version.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *slots).into_values().collect()
        };
        for slot in drained {
            slot.dead.store(true, Ordering::Release);
            if let Ok(mut handler) = slot.handler.try_lock() {
                handler.take();
            }
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}
