//! Topic bus for repository change events.
//!
//! Subscribers register against a topic (everything, the registry, or one
//! list) and receive freshly projected state values after each persisted
//! mutation. A panicking handler is isolated and logged; it never aborts
//! delivery to the remaining handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use synclist_crdt::{ListSummary, TaskView};

/// A projected state value delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// The registry changed; carries the full visible list collection.
    Registry { lists: Vec<ListSummary> },
    /// One list changed; carries its full visible projection.
    List {
        list_id: String,
        title: String,
        tasks: Vec<TaskView>,
    },
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    All,
    Registry,
    List(String),
}

impl Topic {
    fn matches(&self, event: &ChangeEvent) -> bool {
        match (self, event) {
            (Topic::All, _) => true,
            (Topic::Registry, ChangeEvent::Registry { .. }) => true,
            (Topic::List(id), ChangeEvent::List { list_id, .. }) => id == list_id,
            _ => false,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&ChangeEvent) + Send>;

#[derive(Default)]
pub struct ChangeBus {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Topic, Handler)>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.push((id, topic, handler));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.handlers.retain(|(handler_id, _, _)| *handler_id != id);
    }

    /// Deliver an event to every matching subscriber.
    pub fn emit(&self, event: &ChangeEvent) {
        for (id, topic, handler) in &self.handlers {
            if !topic.matches(event) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::warn!("change subscriber {id:?} panicked; continuing fan-out");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
