//! Connection registry and topic index.
//!
//! Both maps live behind a single lock and are kept as mirror images: a
//! topic exists in the index iff its subscriber set is non-empty, and every
//! connection ID in a subscriber set appears in the registry with that topic
//! in its subscription set. All mutation goes through the methods here —
//! the raw maps are never exposed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use pulse_core::{ConnectionId, SubjectId, Topic};

use super::connection::ClientConnection;
use super::publisher::PublisherHandle;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An ID collision on admit. Cannot happen when IDs come from
    /// [`ConnectionId::for_subject`].
    #[error("connection {0} already admitted")]
    AlreadyAdmitted(ConnectionId),

    /// The connection is not (or no longer) in the registry.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
}

struct ConnectionEntry {
    conn: Arc<ClientConnection>,
    topics: HashSet<Topic>,
    publisher: Option<PublisherHandle>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

/// The authoritative set of open connections and their subscriptions.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    /// Mirrors `connections.len()` for lock-free count queries.
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Admit a connection with empty subscription and timer sets.
    ///
    /// Fails only on an ID collision, which ID construction rules out.
    pub async fn admit(&self, conn: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut st = self.state.write().await;
        if st.connections.contains_key(&conn.id) {
            return Err(RegistryError::AlreadyAdmitted(conn.id.clone()));
        }
        let _ = st.connections.insert(
            conn.id.clone(),
            ConnectionEntry {
                conn,
                topics: HashSet::new(),
                publisher: None,
            },
        );
        let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Look up a connection by ID.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.state
            .read()
            .await
            .connections
            .get(id)
            .map(|e| e.conn.clone())
    }

    /// Current number of admitted connections.
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Number of distinct subjects with at least one open connection.
    pub async fn subject_count(&self) -> usize {
        let st = self.state.read().await;
        st.connections
            .values()
            .map(|e| e.conn.subject.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Number of topics with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.state.read().await.topics.len()
    }

    /// Topics with at least one subscriber.
    pub async fn topics(&self) -> Vec<Topic> {
        self.state.read().await.topics.keys().cloned().collect()
    }

    /// Subscribe a connection to a topic. Idempotent.
    pub async fn subscribe(&self, id: &ConnectionId, topic: Topic) -> Result<(), RegistryError> {
        let mut st = self.state.write().await;
        let entry = st
            .connections
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let _ = entry.topics.insert(topic.clone());
        let _ = st.topics.entry(topic).or_default().insert(id.clone());
        Ok(())
    }

    /// Unsubscribe a connection from a topic, deleting the topic entry if
    /// its subscriber set becomes empty. Idempotent.
    pub async fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<(), RegistryError> {
        let mut st = self.state.write().await;
        let entry = st
            .connections
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let _ = entry.topics.remove(topic);
        if let Some(subscribers) = st.topics.get_mut(topic) {
            let _ = subscribers.remove(id);
            if subscribers.is_empty() {
                let _ = st.topics.remove(topic);
            }
        }
        Ok(())
    }

    /// Consistent snapshot of a topic's subscribers (possibly empty).
    pub async fn subscribers_of(&self, topic: &Topic) -> Vec<Arc<ClientConnection>> {
        let st = self.state.read().await;
        st.topics
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| st.connections.get(id).map(|e| e.conn.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the connection currently subscribes to the topic.
    pub async fn is_subscribed(&self, id: &ConnectionId, topic: &Topic) -> bool {
        let st = self.state.read().await;
        st.connections
            .get(id)
            .is_some_and(|e| e.topics.contains(topic))
    }

    /// Topics the connection currently subscribes to.
    pub async fn subscriptions_of(&self, id: &ConnectionId) -> Vec<Topic> {
        let st = self.state.read().await;
        st.connections
            .get(id)
            .map(|e| e.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Store the connection's metrics-publisher handle, returning the
    /// replaced one so the caller can cancel it.
    ///
    /// If the connection is gone the handle is cancelled here and an error
    /// returned — the registry never leaks a live timer for a dead
    /// connection.
    pub async fn set_publisher(
        &self,
        id: &ConnectionId,
        handle: PublisherHandle,
    ) -> Result<Option<PublisherHandle>, RegistryError> {
        let mut st = self.state.write().await;
        match st.connections.get_mut(id) {
            Some(entry) => Ok(entry.publisher.replace(handle)),
            None => {
                handle.cancel();
                Err(RegistryError::NotFound(id.clone()))
            }
        }
    }

    /// Whether the connection currently owns a publisher.
    pub async fn has_publisher(&self, id: &ConnectionId) -> bool {
        let st = self.state.read().await;
        st.connections
            .get(id)
            .is_some_and(|e| e.publisher.is_some())
    }

    /// Tear a connection down: cancel its owned timer, remove it from every
    /// topic it subscribed to (deleting topics left empty), and remove it
    /// from the registry.
    ///
    /// Idempotent — tearing down an absent connection is a no-op returning
    /// `false`.
    pub async fn teardown(&self, id: &ConnectionId) -> bool {
        let mut st = self.state.write().await;
        let Some(entry) = st.connections.remove(id) else {
            return false;
        };
        if let Some(handle) = entry.publisher {
            handle.cancel();
        }
        for topic in &entry.topics {
            if let Some(subscribers) = st.topics.get_mut(topic) {
                let _ = subscribers.remove(id);
                if subscribers.is_empty() {
                    let _ = st.topics.remove(topic);
                }
            }
        }
        let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        debug!(conn_id = %id, "connection torn down");
        true
    }

    /// IDs of all open connections (shutdown sweep).
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.read().await.connections.keys().cloned().collect()
    }

    /// Whether the subject has at least one open connection.
    pub async fn is_subject_connected(&self, subject: &SubjectId) -> bool {
        let st = self.state.read().await;
        st.connections.values().any(|e| e.conn.subject == *subject)
    }

    /// All open connections belonging to a subject.
    pub async fn connections_for_subject(
        &self,
        subject: &SubjectId,
    ) -> Vec<Arc<ClientConnection>> {
        let st = self.state.read().await;
        st.connections
            .values()
            .filter(|e| e.conn.subject == *subject)
            .map(|e| e.conn.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
