use crate::models::session::DeviceSession;
use crate::token::codec::TokenCodec;
use chrono::{DateTime, Duration, Utc};

/// Whether the grace window anchored at `rotated_at` is still open at `now`.
/// The boundary instant itself is inside the window.
pub fn window_open(rotated_at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    now.signed_duration_since(rotated_at) <= grace
}

/// Check a presented token against the session's superseded hash. Accepts
/// only while a rotation record is present and its grace window is open; a
/// session that never rotated, or whose window has elapsed, never matches.
pub fn accepts(codec: &TokenCodec, session: &DeviceSession, token: &str, now: DateTime<Utc>, grace: Duration) -> bool {
    match (&session.previous_token_hash, session.rotated_at) {
        (Some(previous_hash), Some(rotated_at)) if window_open(rotated_at, now, grace) => codec.verify(token, previous_hash),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session_rotated_at(rotated: Option<DateTime<Utc>>, previous_hash: Option<String>) -> DeviceSession {
        DeviceSession {
            user_id: Uuid::new_v4(),
            client_id: "client-1".to_string(),
            token_hash: "$2b$04$currentcurrentcurrentcurrentcurrentcurrentcurrentcur".to_string(),
            previous_token_hash: previous_hash,
            rotated_at: rotated,
            expiry: at(3600),
            last_used_at: at(0),
            created_at: at(0),
            seq: 1,
            rotation_seq: 1,
        }
    }

    #[test]
    fn window_is_inclusive_of_the_boundary() {
        let grace = Duration::seconds(5);
        assert!(window_open(at(0), at(0), grace));
        assert!(window_open(at(0), at(3), grace));
        assert!(window_open(at(0), at(5), grace));
        assert!(!window_open(at(0), at(6), grace));
    }

    #[test]
    fn never_accepts_without_a_rotation_record() {
        let codec = TokenCodec::new(4);
        let session = session_rotated_at(None, None);
        assert!(!accepts(&codec, &session, "whatever", at(1), Duration::seconds(5)));
    }

    #[test]
    fn accepts_the_superseded_token_inside_the_window() {
        let codec = TokenCodec::new(4);
        let (old_token, old_hash) = codec.issue().unwrap();
        let session = session_rotated_at(Some(at(1)), Some(old_hash));

        assert!(accepts(&codec, &session, &old_token, at(3), Duration::seconds(5)));
        assert!(!accepts(&codec, &session, &old_token, at(7), Duration::seconds(5)));
        assert!(!accepts(&codec, &session, "wrong-token", at(3), Duration::seconds(5)));
    }
}
