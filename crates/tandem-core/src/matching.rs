//! Match state machine.
//!
//! A match carries two status dimensions. The request dimension moves
//! `unknown -> requested -> accepted | declined`. The reveal dimension only
//! moves once the request has been accepted, and follows the same shape.
//!
//! Transitions on one match are serialized by a per-match async lock, so a
//! read-modify-write cycle never interleaves with another on the same id.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::events::{DomainEvent, MatchRequestChanged, MatchRevealed};
use crate::model::{now_millis, Conversation, Match, MatchStatus};
use crate::repository::{ConversationRepository, MatchRepository, RepositoryError};

/// Match service errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The requested transition is not allowed from the current status.
    #[error("Invalid match status transition: {from} -> {to}")]
    InvalidMatchStatus { from: MatchStatus, to: MatchStatus },

    /// A user tried to match with themselves.
    #[error("Cannot propose a match to self: {0}")]
    SelfMatch(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Check a request-status transition.
///
/// # Errors
///
/// Returns `InvalidMatchStatus` if `current -> next` is not allowed.
pub fn request_transition(current: MatchStatus, next: MatchStatus) -> Result<MatchStatus, MatchError> {
    let legal = match next {
        MatchStatus::Requested => current == MatchStatus::Unknown,
        MatchStatus::Accepted => current == MatchStatus::Requested,
        MatchStatus::Declined => true,
        MatchStatus::Unknown => false,
    };
    if legal {
        Ok(next)
    } else {
        Err(MatchError::InvalidMatchStatus { from: current, to: next })
    }
}

/// Check a reveal-status transition. Nothing moves until the request has
/// been accepted.
///
/// # Errors
///
/// Returns `InvalidMatchStatus` if the request is not accepted or
/// `current -> next` is not allowed.
pub fn reveal_transition(
    request: MatchStatus,
    current: MatchStatus,
    next: MatchStatus,
) -> Result<MatchStatus, MatchError> {
    let legal = request == MatchStatus::Accepted
        && match next {
            MatchStatus::Requested => current == MatchStatus::Unknown,
            MatchStatus::Accepted => current == MatchStatus::Requested,
            MatchStatus::Declined => current != MatchStatus::Unknown,
            MatchStatus::Unknown => false,
        };
    if legal {
        Ok(next)
    } else {
        Err(MatchError::InvalidMatchStatus { from: current, to: next })
    }
}

/// Drives match records through their request and reveal lifecycles.
#[derive(Clone)]
pub struct MatchService {
    matches: Arc<dyn MatchRepository>,
    conversations: Arc<dyn ConversationRepository>,
    bus: EventBus,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl MatchService {
    #[must_use]
    pub fn new(
        matches: Arc<dyn MatchRepository>,
        conversations: Arc<dyn ConversationRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            matches,
            conversations,
            bus,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn get_match_by_id(&self, match_id: &str) -> Result<Match, MatchError> {
        Ok(self.matches.get_match_by_id(match_id).await?)
    }

    /// Create a match in `requested` state from `from` to `to`.
    pub async fn propose(&self, from: &str, to: &str) -> Result<Match, MatchError> {
        if from == to {
            return Err(MatchError::SelfMatch(from.to_string()));
        }

        let mut record = Match::new(from, to);
        record.request_status = request_transition(record.request_status, MatchStatus::Requested)?;
        let record = self.matches.insert_match(record).await?;

        info!(match_id = %record.id, from = %from, to = %to, "Match proposed");
        self.bus
            .trigger(DomainEvent::MatchRequestChanged(MatchRequestChanged {
                record: record.clone(),
            }));
        Ok(record)
    }

    /// Move the request dimension to `status`.
    ///
    /// Accepting stamps `accepted_at` and opens a conversation for the pair.
    pub async fn request_change(&self, match_id: &str, status: MatchStatus) -> Result<Match, MatchError> {
        let lock = self.lock_for(match_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_request(match_id, status).await
        };
        drop(lock);
        self.release_lock(match_id);

        let record = result?;
        self.bus
            .trigger(DomainEvent::MatchRequestChanged(MatchRequestChanged {
                record: record.clone(),
            }));
        Ok(record)
    }

    /// Move the reveal dimension to `status`.
    ///
    /// Accepting stamps `revealed_at`.
    pub async fn reveal_change(&self, match_id: &str, status: MatchStatus) -> Result<Match, MatchError> {
        let lock = self.lock_for(match_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_reveal(match_id, status).await
        };
        drop(lock);
        self.release_lock(match_id);

        let record = result?;
        self.bus.trigger(DomainEvent::MatchRevealed(MatchRevealed {
            match_id: record.id.clone(),
            match_status: record.reveal_status,
            record: record.clone(),
        }));
        Ok(record)
    }

    async fn apply_request(&self, match_id: &str, status: MatchStatus) -> Result<Match, MatchError> {
        let mut record = self.matches.get_match_by_id(match_id).await?;
        record.request_status = request_transition(record.request_status, status)?;
        if status == MatchStatus::Accepted {
            record.accepted_at = Some(now_millis());
        }

        let record = self.matches.update_match_by_id(match_id, record).await?;
        debug!(match_id = %match_id, status = %status, "Match request changed");

        if status == MatchStatus::Accepted {
            let conversation = self
                .conversations
                .insert_conversation(Conversation::for_match(&record))
                .await?;
            info!(match_id = %match_id, conversation = %conversation.id, "Conversation opened");
        }
        Ok(record)
    }

    async fn apply_reveal(&self, match_id: &str, status: MatchStatus) -> Result<Match, MatchError> {
        let mut record = self.matches.get_match_by_id(match_id).await?;
        record.reveal_status = reveal_transition(record.request_status, record.reveal_status, status)?;
        if status == MatchStatus::Accepted {
            record.revealed_at = Some(now_millis());
        }

        let record = self.matches.update_match_by_id(match_id, record).await?;
        debug!(match_id = %match_id, status = %status, "Match reveal changed");
        Ok(record)
    }

    fn lock_for(&self, match_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds it.
    fn release_lock(&self, match_id: &str) {
        self.locks
            .remove_if(match_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::memory::MemoryStore;
    use crate::repository::RepositoryResult;
    use async_trait::async_trait;

    fn service() -> (MatchService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = MatchService::new(
            store.clone(),
            store.clone(),
            EventBus::start(EventBusConfig::default()),
        );
        (service, store)
    }

    fn request_allowed(from: MatchStatus, to: MatchStatus) -> bool {
        use MatchStatus::*;
        matches!(
            (from, to),
            (Unknown, Requested) | (Requested, Accepted) | (_, Declined)
        )
    }

    fn reveal_allowed(from: MatchStatus, to: MatchStatus) -> bool {
        use MatchStatus::*;
        matches!(
            (from, to),
            (Unknown, Requested)
                | (Requested, Accepted)
                | (Requested, Declined)
                | (Accepted, Declined)
                | (Declined, Declined)
        )
    }

    #[test]
    fn test_request_transition_table() {
        for from in MatchStatus::ALL {
            for to in MatchStatus::ALL {
                let result = request_transition(from, to);
                assert_eq!(
                    result.is_ok(),
                    request_allowed(from, to),
                    "request {} -> {}",
                    from,
                    to
                );
                if let Err(e) = result {
                    assert!(matches!(e, MatchError::InvalidMatchStatus { .. }));
                }
            }
        }
    }

    #[test]
    fn test_reveal_transition_table() {
        for from in MatchStatus::ALL {
            for to in MatchStatus::ALL {
                assert_eq!(
                    reveal_transition(MatchStatus::Accepted, from, to).is_ok(),
                    reveal_allowed(from, to),
                    "reveal {} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_reveal_gated_on_accepted_request() {
        for request in [MatchStatus::Unknown, MatchStatus::Requested, MatchStatus::Declined] {
            for from in MatchStatus::ALL {
                for to in MatchStatus::ALL {
                    assert!(matches!(
                        reveal_transition(request, from, to),
                        Err(MatchError::InvalidMatchStatus { .. })
                    ));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_accept_opens_conversation() {
        let (matches, store) = service();
        let record = matches.propose("alice", "bob").await.unwrap();
        assert_eq!(record.request_status, MatchStatus::Requested);

        let accepted = matches
            .request_change(&record.id, MatchStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.request_status, MatchStatus::Accepted);
        assert!(accepted.accepted_at.is_some());

        let convs = store.select_conversations_by_user_id("bob").await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].match_id, record.id);
    }

    #[tokio::test]
    async fn test_unknown_to_accepted_fails() {
        let (matches, store) = service();
        let record = store.insert_match(Match::new("alice", "bob")).await.unwrap();

        let err = matches
            .request_change(&record.id, MatchStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::InvalidMatchStatus {
                from: MatchStatus::Unknown,
                to: MatchStatus::Accepted
            }
        ));

        // Nothing was written
        let stored = matches.get_match_by_id(&record.id).await.unwrap();
        assert_eq!(stored.request_status, MatchStatus::Unknown);
    }

    #[tokio::test]
    async fn test_reveal_flow() {
        let (matches, _store) = service();
        let record = matches.propose("alice", "bob").await.unwrap();

        // Not accepted yet
        assert!(matches
            .reveal_change(&record.id, MatchStatus::Requested)
            .await
            .is_err());

        matches
            .request_change(&record.id, MatchStatus::Accepted)
            .await
            .unwrap();
        matches
            .reveal_change(&record.id, MatchStatus::Requested)
            .await
            .unwrap();
        let revealed = matches
            .reveal_change(&record.id, MatchStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(revealed.reveal_status, MatchStatus::Accepted);
        assert!(revealed.revealed_at.is_some());
    }

    #[tokio::test]
    async fn test_propose_to_self_fails() {
        let (matches, _store) = service();
        assert!(matches!(
            matches.propose("alice", "alice").await,
            Err(MatchError::SelfMatch(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_match_is_repository_error() {
        let (matches, _store) = service();
        let err = matches
            .request_change("missing", MatchStatus::Declined)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Repository(ref e) if e.is_not_found()));
    }

    struct BrokenStore;

    #[async_trait]
    impl MatchRepository for BrokenStore {
        async fn insert_match(&self, _record: Match) -> RepositoryResult<Match> {
            Err(RepositoryError::Storage("disk on fire".into()))
        }

        async fn get_match_by_id(&self, _match_id: &str) -> RepositoryResult<Match> {
            Err(RepositoryError::Storage("disk on fire".into()))
        }

        async fn update_match_by_id(&self, _match_id: &str, _record: Match) -> RepositoryResult<Match> {
            Err(RepositoryError::Storage("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_errors_propagate_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let matches = MatchService::new(
            Arc::new(BrokenStore),
            store,
            EventBus::start(EventBusConfig::default()),
        );

        let err = matches
            .reveal_change("m1", MatchStatus::Requested)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Repository(RepositoryError::Storage(_))));
        assert_eq!(err.to_string(), "Storage error: disk on fire");
    }

    #[tokio::test]
    async fn test_concurrent_accepts_apply_once() {
        let (matches, store) = service();
        let record = matches.propose("alice", "bob").await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let matches = matches.clone();
                let id = record.id.clone();
                tokio::spawn(async move { matches.request_change(&id, MatchStatus::Accepted).await })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.select_conversations_by_user_id("alice").await.unwrap().len(), 1);
        assert!(matches.locks.is_empty());
    }

    #[tokio::test]
    async fn test_transitions_emit_events() {
        use crate::bus::{EventHandler, HandlerError};
        use crate::events::EventKind;
        use tokio::sync::mpsc;

        struct Kinds(mpsc::UnboundedSender<EventKind>);

        #[async_trait]
        impl EventHandler for Kinds {
            async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
                let _ = self.0.send(event.kind());
                Ok(())
            }
        }

        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::start(EventBusConfig {
            workers: 1,
            queue_capacity: 16,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register(EventKind::MatchRequestChanged, Arc::new(Kinds(tx.clone())));
        bus.register(EventKind::MatchRevealed, Arc::new(Kinds(tx)));
        let matches = MatchService::new(store.clone(), store, bus);

        let record = matches.propose("alice", "bob").await.unwrap();
        matches
            .request_change(&record.id, MatchStatus::Accepted)
            .await
            .unwrap();
        matches
            .reveal_change(&record.id, MatchStatus::Requested)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(EventKind::MatchRequestChanged));
        assert_eq!(rx.recv().await, Some(EventKind::MatchRequestChanged));
        assert_eq!(rx.recv().await, Some(EventKind::MatchRevealed));
    }
}
