//! Link broker: one-time codes that bind a Discord user to a Minecraft account.
//!
//! `link` in chat issues a ticket and sends its code by direct message; the
//! Minecraft plugin later calls `GET /link` with the player's UUID and the
//! code the player typed in game.

use crate::message::Identity;
use crate::store::UserStore;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use discraft_common::{Error, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Symbols a link code is drawn from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a link code.
pub const CODE_LENGTH: usize = 6;

const MAX_CODE_ATTEMPTS: usize = 16;

/// An outstanding link request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTicket {
    pub identity: Identity,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

impl LinkTicket {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= ttl)
    }
}

/// Issues and redeems link tickets.
///
/// At most one live ticket per user; codes are unique among stored tickets.
/// Lock order is tickets, then codes.
pub struct LinkBroker {
    tickets: DashMap<Identity, LinkTicket>,
    codes: DashMap<String, Identity>,
    store: Arc<dyn UserStore>,
    ttl: Duration,
}

impl LinkBroker {
    pub fn new(store: Arc<dyn UserStore>, ttl: Duration) -> Self {
        Self {
            tickets: DashMap::new(),
            codes: DashMap::new(),
            store,
            ttl,
        }
    }

    /// Issue a ticket for `identity`.
    ///
    /// Fails with `Conflict` while the user still has a live ticket; an expired
    /// one is replaced.
    pub fn begin_link(&self, identity: Identity) -> Result<LinkTicket> {
        let now = Utc::now();
        let entry = self.tickets.entry(identity);

        if let Entry::Occupied(existing) = &entry {
            let existing = existing.get();
            if !existing.is_expired(now, self.ttl) {
                return Err(Error::Conflict(format!("user {identity} is already linking")));
            }
            self.codes
                .remove_if(&existing.code, |_, owner| *owner == identity);
        }

        let code = self.reserve_code(identity)?;
        let ticket = LinkTicket {
            identity,
            code,
            created_at: now,
        };
        entry.insert(ticket.clone());

        tracing::info!(user = %identity, "Started account link");
        Ok(ticket)
    }

    /// Redeem `code` for the Minecraft account `minecraft_uuid`.
    ///
    /// The code is matched case-insensitively against live tickets. On a match
    /// the ticket is consumed and the link persisted; if persisting fails the
    /// ticket is put back. Returns `None`, without touching the store, when no
    /// live ticket matches.
    pub async fn complete_link(
        &self,
        minecraft_uuid: Uuid,
        code: &str,
    ) -> Result<Option<LinkTicket>> {
        let code = code.trim().to_uppercase();
        let now = Utc::now();

        let Some(identity) = self.codes.get(&code).map(|owner| *owner.value()) else {
            return Ok(None);
        };
        let ttl = self.ttl;
        let Some((_, ticket)) = self.tickets.remove_if(&identity, |_, ticket| {
            ticket.code == code && !ticket.is_expired(now, ttl)
        }) else {
            return Ok(None);
        };
        self.codes.remove_if(&code, |_, owner| *owner == identity);

        if let Err(e) = self.store.insert_link(identity, minecraft_uuid, now).await {
            tracing::warn!(user = %identity, error = %e, "Failed to persist account link");
            self.restore(ticket);
            return Err(e);
        }

        tracing::info!(user = %identity, minecraft_uuid = %minecraft_uuid, "Linked accounts");
        Ok(Some(ticket))
    }

    /// Whether `identity` holds a live ticket.
    pub fn is_linking(&self, identity: Identity) -> bool {
        self.ticket(identity).is_some()
    }

    /// The live ticket of `identity`, if any.
    pub fn ticket(&self, identity: Identity) -> Option<LinkTicket> {
        let now = Utc::now();
        self.tickets
            .get(&identity)
            .filter(|t| !t.is_expired(now, self.ttl))
            .map(|t| t.value().clone())
    }

    /// Drop tickets older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Identity> = self
            .tickets
            .iter()
            .filter(|t| t.is_expired(now, self.ttl))
            .map(|t| *t.key())
            .collect();

        let mut purged = 0;
        for identity in expired {
            let ttl = self.ttl;
            if let Some((_, ticket)) = self
                .tickets
                .remove_if(&identity, |_, t| t.is_expired(now, ttl))
            {
                self.codes
                    .remove_if(&ticket.code, |_, owner| *owner == identity);
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::debug!(purged, "Purged expired link tickets");
        }
        purged
    }

    /// Number of stored tickets, expired or not.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    fn reserve_code(&self, identity: Identity) -> Result<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(identity);
                return Ok(code);
            }
        }
        Err(Error::Conflict("could not allocate a unique link code".into()))
    }

    fn restore(&self, ticket: LinkTicket) {
        let identity = ticket.identity;
        let code = ticket.code.clone();
        if let Entry::Vacant(slot) = self.tickets.entry(identity) {
            slot.insert(ticket);
            self.codes.insert(code, identity);
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreCalls};
    use std::collections::HashSet;

    fn broker(store: Arc<MemoryStore>) -> LinkBroker {
        LinkBroker::new(store, Duration::from_secs(600))
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_second_begin_conflicts() {
        let broker = broker(Arc::new(MemoryStore::new()));
        broker.begin_link(Identity(1)).unwrap();
        let err = broker.begin_link(Identity(1)).unwrap_err();
        assert!(err.is_conflict());
        assert!(broker.is_linking(Identity(1)));
        assert!(!broker.is_linking(Identity(2)));
    }

    #[test]
    fn test_codes_unique_among_active() {
        let broker = broker(Arc::new(MemoryStore::new()));
        let codes: HashSet<String> = (0..500)
            .map(|i| broker.begin_link(Identity(i)).unwrap().code)
            .collect();
        assert_eq!(codes.len(), 500);
    }

    #[tokio::test]
    async fn test_unknown_code_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let broker = broker(store.clone());
        broker.begin_link(Identity(1)).unwrap();

        let result = broker.complete_link(Uuid::new_v4(), "??????").await.unwrap();
        assert!(result.is_none());
        assert_eq!(StoreCalls::get(&store.calls().insert_link), 0);
        assert!(broker.is_linking(Identity(1)));
    }

    #[tokio::test]
    async fn test_complete_consumes_ticket() {
        let store = Arc::new(MemoryStore::new());
        let broker = broker(store.clone());
        let ticket = broker.begin_link(Identity(3)).unwrap();
        let uuid = Uuid::new_v4();

        let linked = broker
            .complete_link(uuid, &ticket.code.to_lowercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.identity, Identity(3));
        assert!(!broker.is_linking(Identity(3)));
        assert!(broker.is_empty());

        let links = store.links(Identity(3)).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].minecraft_uuid, uuid);

        // Single use.
        assert!(broker.complete_link(uuid, &ticket.code).await.unwrap().is_none());
        // A new ticket can be started afterwards.
        assert!(broker.begin_link(Identity(3)).is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_restores_ticket() {
        let store = Arc::new(MemoryStore::new());
        let broker = broker(store.clone());
        let ticket = broker.begin_link(Identity(4)).unwrap();

        store.fail_next(1);
        assert!(broker.complete_link(Uuid::new_v4(), &ticket.code).await.is_err());
        assert_eq!(broker.ticket(Identity(4)), Some(ticket.clone()));

        assert!(broker
            .complete_link(Uuid::new_v4(), &ticket.code)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_tickets_replaced_and_purged() {
        let store = Arc::new(MemoryStore::new());
        let broker = LinkBroker::new(store.clone(), Duration::ZERO);

        let first = broker.begin_link(Identity(5)).unwrap();
        assert!(!broker.is_linking(Identity(5)));
        let second = broker.begin_link(Identity(5)).unwrap();
        assert_eq!(broker.len(), 1);

        assert!(broker.complete_link(Uuid::new_v4(), &first.code).await.unwrap().is_none());
        assert!(broker.complete_link(Uuid::new_v4(), &second.code).await.unwrap().is_none());
        assert_eq!(StoreCalls::get(&store.calls().insert_link), 0);

        assert_eq!(broker.purge_expired(Utc::now()), 1);
        assert!(broker.is_empty());
    }
}
