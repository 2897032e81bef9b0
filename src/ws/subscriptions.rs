//! Declared topic subscriptions and the server-acknowledged projection.
//!
//! The declared set is the caller's intent and survives reconnects. The
//! acknowledged set only mirrors `subscribed`/`unsubscribed` replies and is
//! dropped whenever the socket closes; it is rebuilt by re-issuing a
//! `subscribe` for every declared topic after authentication.
//!
//! Acknowledgements are matched by topic string alone, in arrival order. A
//! quick subscribe/unsubscribe pair on the same topic ends in whichever state
//! the server replied with last.

use indexmap::IndexSet;
use tokio::sync::watch;

pub type TopicSet = IndexSet<String>;

#[derive(Debug)]
pub struct SubscriptionRegistry {
    declared: TopicSet,
    acknowledged: watch::Sender<TopicSet>,
}

impl SubscriptionRegistry {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (acknowledged, _) = watch::channel(TopicSet::new());
        Self {
            declared: initial.into_iter().map(Into::into).collect(),
            acknowledged,
        }
    }

    /// Record intent to observe `topic`. Returns `false` if already declared.
    pub fn declare(&mut self, topic: &str) -> bool {
        self.declared.insert(topic.to_string())
    }

    /// Drop intent for `topic`, keeping the order of the rest.
    pub fn withdraw(&mut self, topic: &str) -> bool {
        self.declared.shift_remove(topic)
    }

    pub fn is_declared(&self, topic: &str) -> bool {
        self.declared.contains(topic)
    }

    /// Declared topics in declaration order.
    pub fn declared(&self) -> Vec<String> {
        self.declared.iter().cloned().collect()
    }

    pub fn acknowledge(&self, topic: &str) -> bool {
        self.acknowledged.send_if_modified(|set| set.insert(topic.to_string()))
    }

    pub fn release(&self, topic: &str) -> bool {
        self.acknowledged.send_if_modified(|set| set.shift_remove(topic))
    }

    pub fn clear_acknowledged(&self) {
        self.acknowledged.send_if_modified(|set| {
            let had_any = !set.is_empty();
            set.clear();
            had_any
        });
    }

    pub fn is_acknowledged(&self, topic: &str) -> bool {
        self.acknowledged.borrow().contains(topic)
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.borrow().iter().cloned().collect()
    }

    pub fn watch(&self) -> watch::Receiver<TopicSet> {
        self.acknowledged.subscribe()
    }

    /// Every topic the client knows about: declared first, then acknowledged
    /// topics the caller never declared.
    pub fn tracked(&self) -> Vec<String> {
        let acknowledged = self.acknowledged.borrow();
        self.declared
            .iter()
            .chain(acknowledged.iter().filter(|t| !self.declared.contains(*t)))
            .cloned()
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}
