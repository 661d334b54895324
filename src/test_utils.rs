use crate::database::session::SessionStore;
use crate::error::app_error::AppError;
use crate::models::session::{DeviceSession, NewSession, RotationRecord, Upserted};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory session registry with the same semantics as the Postgres
/// implementation: single critical section per operation, so upsert+eviction
/// is atomic and `commit_rotation` is a real compare-and-swap.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    sessions: HashMap<(Uuid, String), DeviceSession>,
    next_seq: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                sessions: HashMap::new(),
                next_seq: 1,
            }),
        }
    }

    pub async fn session_count(&self, user_id: &Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner.sessions.keys().filter(|(uid, _)| uid == user_id).count()
    }

    pub async fn rotation_seq(&self, user_id: &Uuid, client_id: &str) -> i64 {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(&(*user_id, client_id.to_string()))
            .map(|s| s.rotation_seq)
            .expect("session should exist")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_session(&self, user_id: &Uuid, client_id: &str) -> Result<Option<DeviceSession>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&(*user_id, client_id.to_string())).cloned())
    }

    async fn upsert_session(&self, new: &NewSession, max_devices: u32) -> Result<Upserted, AppError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let key = (new.user_id, new.client_id.clone());
        // Replacing an existing device keeps its creation seniority.
        let existing = inner.sessions.get(&key).map(|s| (s.created_at, s.seq, s.rotation_seq));
        let (created_at, seq, rotation_seq) = match existing {
            Some((created_at, seq, rotation_seq)) => (created_at, seq, rotation_seq + 1),
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                (new.created_at, seq, 0)
            }
        };

        let session = DeviceSession {
            user_id: new.user_id,
            client_id: new.client_id.clone(),
            token_hash: new.token_hash.clone(),
            previous_token_hash: None,
            rotated_at: None,
            expiry: new.expiry,
            last_used_at: new.created_at,
            created_at,
            seq,
            rotation_seq,
        };
        inner.sessions.insert(key, session.clone());

        // Evict oldest-created sessions beyond the cap, tie-broken by
        // creation sequence number, within the same critical section.
        let mut user_sessions: Vec<(String, DateTime<Utc>, i64)> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == new.user_id)
            .map(|s| (s.client_id.clone(), s.created_at, s.seq))
            .collect();
        user_sessions.sort_by_key(|(_, created_at, seq)| (*created_at, *seq));

        let mut evicted = Vec::new();
        let cap = max_devices as usize;
        if user_sessions.len() > cap {
            for (client_id, _, _) in user_sessions.drain(..user_sessions.len() - cap) {
                inner.sessions.remove(&(new.user_id, client_id.clone()));
                evicted.push(client_id);
            }
        }

        Ok(Upserted { session, evicted })
    }

    async fn commit_rotation(
        &self,
        user_id: &Uuid,
        client_id: &str,
        expected_rotation_seq: i64,
        record: &RotationRecord,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.sessions.get_mut(&(*user_id, client_id.to_string())) else {
            return Ok(false);
        };
        if session.rotation_seq != expected_rotation_seq {
            return Ok(false);
        }

        session.previous_token_hash = Some(std::mem::replace(&mut session.token_hash, record.new_token_hash.clone()));
        session.rotated_at = Some(record.rotated_at);
        session.expiry = record.expiry;
        session.last_used_at = record.rotated_at;
        session.rotation_seq += 1;

        Ok(true)
    }

    async fn touch_session(&self, user_id: &Uuid, client_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(&(*user_id, client_id.to_string())) {
            session.last_used_at = now;
        }
        Ok(())
    }

    async fn clear_previous(&self, user_id: &Uuid, client_id: &str, expected_rotation_seq: i64) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(&(*user_id, client_id.to_string()))
            && session.rotation_seq == expected_rotation_seq
        {
            session.previous_token_hash = None;
            session.rotated_at = None;
        }
        Ok(())
    }

    async fn delete_session(&self, user_id: &Uuid, client_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(&(*user_id, client_id.to_string()));
        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.expiry > now);
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn new_session(user_id: Uuid, client_id: &str, created_secs: i64) -> NewSession {
        NewSession {
            user_id,
            client_id: client_id.to_string(),
            token_hash: format!("hash-{client_id}-{created_secs}"),
            expiry: at(created_secs + 3600),
            created_at: at(created_secs),
        }
    }

    #[tokio::test]
    async fn eviction_ties_break_by_creation_sequence() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        // identical created_at under a coarse clock; seq decides
        store.upsert_session(&new_session(user_id, "first", 0), 2).await.unwrap();
        store.upsert_session(&new_session(user_id, "second", 0), 2).await.unwrap();
        let upserted = store.upsert_session(&new_session(user_id, "third", 0), 2).await.unwrap();

        assert_eq!(upserted.evicted, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn sessions_of_other_users_are_untouched_by_eviction() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.upsert_session(&new_session(alice, "a1", 0), 1).await.unwrap();
        store.upsert_session(&new_session(bob, "b1", 1), 1).await.unwrap();
        let upserted = store.upsert_session(&new_session(alice, "a2", 2), 1).await.unwrap();

        assert_eq!(upserted.evicted, vec!["a1".to_string()]);
        assert!(store.find_session(&bob, "b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_rotation_commit_is_rejected() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.upsert_session(&new_session(user_id, "device", 0), 10).await.unwrap();

        let record = RotationRecord {
            new_token_hash: "rotated-hash".to_string(),
            rotated_at: at(1),
            expiry: at(3601),
        };
        assert!(store.commit_rotation(&user_id, "device", 0, &record).await.unwrap());
        // same expected seq again: the state moved on
        assert!(!store.commit_rotation(&user_id, "device", 0, &record).await.unwrap());
    }

    #[tokio::test]
    async fn clear_previous_ignores_a_newer_rotation() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.upsert_session(&new_session(user_id, "device", 0), 10).await.unwrap();

        let record = RotationRecord {
            new_token_hash: "rotated-hash".to_string(),
            rotated_at: at(1),
            expiry: at(3601),
        };
        store.commit_rotation(&user_id, "device", 0, &record).await.unwrap();

        // guard carries the pre-rotation seq; the rotation record must stay
        store.clear_previous(&user_id, "device", 0).await.unwrap();
        let session = store.find_session(&user_id, "device").await.unwrap().unwrap();
        assert!(session.previous_token_hash.is_some());

        store.clear_previous(&user_id, "device", 1).await.unwrap();
        let session = store.find_session(&user_id, "device").await.unwrap().unwrap();
        assert!(session.previous_token_hash.is_none());
    }

    proptest! {
        /// The cap holds after every upsert, and each insertion past the cap
        /// evicts the session with the minimum (created_at, seq) among the
        /// sessions live at that moment, the fresh insert included.
        #[test]
        fn device_cap_is_never_exceeded(
            creations in proptest::collection::vec((0u8..12, 0i64..100), 1..40),
            max_devices in 1u32..5,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                let user_id = Uuid::new_v4();

                for (device, created_secs) in creations {
                    let client_id = format!("device-{device}");
                    let existed = store.find_session(&user_id, &client_id).await.unwrap().is_some();
                    let before = store.session_count(&user_id).await;

                    // candidate set for eviction: everything live plus the
                    // fresh insert, which gets the largest seq so far
                    let mut candidates: Vec<(String, DateTime<Utc>, i64)> = Vec::new();
                    for other in 0u8..12 {
                        let other_id = format!("device-{other}");
                        if let Some(s) = store.find_session(&user_id, &other_id).await.unwrap() {
                            candidates.push((other_id, s.created_at, s.seq));
                        }
                    }
                    if !existed {
                        candidates.push((client_id.clone(), at(created_secs), i64::MAX));
                    }
                    candidates.sort_by_key(|(_, created_at, seq)| (*created_at, *seq));
                    let oldest = candidates.first().map(|(id, _, _)| id.clone());

                    let upserted = store
                        .upsert_session(&new_session(user_id, &client_id, created_secs), max_devices)
                        .await
                        .unwrap();

                    let after = store.session_count(&user_id).await;
                    assert!(after <= max_devices as usize);

                    if !existed && before == max_devices as usize {
                        assert_eq!(upserted.evicted.len(), 1);
                        assert_eq!(Some(&upserted.evicted[0]), oldest.as_ref());
                    } else {
                        assert!(upserted.evicted.is_empty());
                    }
                }
            });
        }
    }
}
