use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::packet::Conversation;

/// Pairs a request with its response: the conversation plus the request's
/// acknowledgement number, which the response carries as its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub conversation: Conversation,
    pub correlation: u32,
}

impl ConnectionIdentity {
    pub fn new(conversation: Conversation, correlation: u32) -> Self {
        Self {
            conversation,
            correlation,
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.conversation, self.correlation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub label: String,
    pub sent_at_us: i64,
}

/// Shard-local table of requests waiting for a response.
///
/// Entries are grouped per conversation so a connection teardown can drop
/// all of its outstanding requests at once.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<Conversation, HashMap<u32, PendingRequest>>,
    len: usize,
    ttl_us: i64,
    evicted: u64,
}

impl Correlator {
    pub fn new(ttl_us: i64) -> Self {
        Self {
            ttl_us,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries dropped by teardown or expiry so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Remember a request. The first request seen for an identity wins; later
    /// ones sharing the correlation number are ignored and `false` is returned.
    pub fn record(&mut self, identity: ConnectionIdentity, label: String, sent_at_us: i64) -> bool {
        let requests = self.pending.entry(identity.conversation).or_default();
        if requests.contains_key(&identity.correlation) {
            debug!("Pending request already recorded for {}", identity);
            return false;
        }
        requests.insert(identity.correlation, PendingRequest { label, sent_at_us });
        self.len += 1;
        true
    }

    /// Remove and return the request answered by a response with this identity
    pub fn resolve(&mut self, identity: &ConnectionIdentity) -> Option<PendingRequest> {
        let requests = self.pending.get_mut(&identity.conversation)?;
        let request = requests.remove(&identity.correlation)?;
        if requests.is_empty() {
            self.pending.remove(&identity.conversation);
        }
        self.len -= 1;
        Some(request)
    }

    /// Drop every pending request of a closed or reset conversation
    pub fn evict_conversation(&mut self, conversation: &Conversation) -> usize {
        let removed = self
            .pending
            .remove(conversation)
            .map(|requests| requests.len())
            .unwrap_or(0);
        self.len -= removed;
        self.evicted += removed as u64;
        removed
    }

    /// Drop requests older than the TTL, measured against capture time `now_us`
    pub fn sweep_expired(&mut self, now_us: i64) -> usize {
        if self.ttl_us <= 0 {
            return 0;
        }
        let cutoff = now_us.saturating_sub(self.ttl_us);
        let mut removed = 0;

        self.pending.retain(|_, requests| {
            let before = requests.len();
            requests.retain(|_, request| request.sent_at_us >= cutoff);
            removed += before - requests.len();
            !requests.is_empty()
        });

        self.len -= removed;
        self.evicted += removed as u64;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(client_port: u16) -> Conversation {
        Conversation::new(
            format!("10.0.0.7:{client_port}").parse().unwrap(),
            "10.0.0.1:6379".parse().unwrap(),
        )
    }

    #[test]
    fn test_record_and_resolve() {
        let mut table = Correlator::new(0);
        let id = ConnectionIdentity::new(conversation(50000), 1000);

        assert!(table.record(id, "GET foo".into(), 10));
        assert_eq!(table.len(), 1);

        let request = table.resolve(&id).unwrap();
        assert_eq!(request.label, "GET foo");
        assert_eq!(request.sent_at_us, 10);
        assert!(table.is_empty());
        assert!(table.resolve(&id).is_none());
    }

    #[test]
    fn test_first_write_wins() {
        let mut table = Correlator::new(0);
        let id = ConnectionIdentity::new(conversation(50000), 7);

        assert!(table.record(id, "GET a".into(), 1));
        assert!(!table.record(id, "GET b".into(), 2));
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(&id).unwrap().label, "GET a");
    }

    #[test]
    fn test_identity_includes_endpoints() {
        let mut table = Correlator::new(0);
        table.record(ConnectionIdentity::new(conversation(50000), 7), "GET a".into(), 1);

        let other = ConnectionIdentity::new(conversation(50001), 7);
        assert!(table.resolve(&other).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_evict_conversation() {
        let mut table = Correlator::new(0);
        let conv = conversation(50000);
        table.record(ConnectionIdentity::new(conv, 1), "GET a".into(), 1);
        table.record(ConnectionIdentity::new(conv, 2), "GET b".into(), 2);
        table.record(ConnectionIdentity::new(conversation(50001), 1), "GET c".into(), 3);

        assert_eq!(table.evict_conversation(&conv), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.evicted(), 2);
        assert_eq!(table.evict_conversation(&conv), 0);
    }

    #[test]
    fn test_sweep_expired() {
        let mut table = Correlator::new(1_000);
        let conv = conversation(50000);
        table.record(ConnectionIdentity::new(conv, 1), "GET old".into(), 0);
        table.record(ConnectionIdentity::new(conv, 2), "GET new".into(), 5_000);

        assert_eq!(table.sweep_expired(5_500), 1);
        assert_eq!(table.len(), 1);
        assert!(table.resolve(&ConnectionIdentity::new(conv, 2)).is_some());
    }

    #[test]
    fn test_sweep_disabled_without_ttl() {
        let mut table = Correlator::new(0);
        table.record(ConnectionIdentity::new(conversation(1), 1), "GET a".into(), 0);
        assert_eq!(table.sweep_expired(i64::MAX), 0);
        assert_eq!(table.len(), 1);
    }
}
