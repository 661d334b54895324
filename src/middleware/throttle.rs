use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tokio::sync::Mutex;
use tracing::warn;

/// Fixed-window counter keyed by client IP and claimed uid, applied only to
/// the credential sign-in surface. Token validation itself is already
/// cost-bound by the hash and is not throttled here.
#[derive(Debug)]
pub(crate) struct SignInThrottle {
    config: ThrottleConfig,
    window: Duration,
    cleanup_interval: Duration,
    counters: Mutex<HashMap<String, Counter>>,
}

#[derive(Debug, Clone)]
struct Counter {
    window_start: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThrottleDecision {
    Allow,
    Limited { retry_after: Duration },
}

impl SignInThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let window = Duration::from_secs(config.window_seconds.max(1));
        let cleanup_interval = Duration::from_secs(config.cleanup_interval_seconds.max(1));

        Self {
            config,
            window,
            cleanup_interval,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn_cleanup_task(self: Arc<Self>) {
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let window = self.window;
                let mut counters = self.counters.lock().await;
                counters.retain(|_, counter| now.duration_since(counter.window_start) < window);
            }
        });
    }

    async fn check(&self, identities: &[String]) -> ThrottleDecision {
        if identities.is_empty() {
            return ThrottleDecision::Allow;
        }

        // NOTE: fixed windows allow bursts near window boundaries.
        let limit = self.config.sign_in_limit;
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let mut retry_after: Option<Duration> = None;

        for identity in identities {
            let counter = counters
                .entry(identity.clone())
                .or_insert_with(|| Counter { window_start: now, count: 0 });

            if now.duration_since(counter.window_start) >= self.window {
                counter.window_start = now;
                counter.count = 0;
            }

            if counter.count >= limit {
                let elapsed = now.duration_since(counter.window_start);
                let remaining = self.window.saturating_sub(elapsed);
                retry_after = Some(retry_after.map_or(remaining, |current| current.max(remaining)));
            }
        }

        if let Some(retry_after) = retry_after {
            return ThrottleDecision::Limited { retry_after };
        }

        for identity in identities {
            if let Some(counter) = counters.get_mut(identity) {
                counter.count += 1;
            }
        }

        ThrottleDecision::Allow
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthThrottle;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ThrottleRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThrottleError {
    TooManyRequests,
    MissingClientIp,
}

impl ThrottleError {
    fn status(self) -> Status {
        match self {
            ThrottleError::TooManyRequests => Status::TooManyRequests,
            ThrottleError::MissingClientIp => Status::BadRequest,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthThrottle {
    type Error = ThrottleError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let limiter = match request.rocket().state::<Arc<SignInThrottle>>() {
            Some(limiter) => limiter,
            None => return Outcome::Success(AuthThrottle),
        };

        let mut identities = Vec::new();
        if let Some(ip) = request.client_ip() {
            identities.push(format!("ip:{ip}"));
        }
        if let Some(uid) = claimed_uid(request) {
            identities.push(format!("uid:{uid}"));
        }

        if identities.is_empty() {
            if limiter.config.require_client_ip {
                return Outcome::Error((ThrottleError::MissingClientIp.status(), ThrottleError::MissingClientIp));
            }
            identities.push("ip:missing".to_string());
        }

        match limiter.check(&identities).await {
            ThrottleDecision::Allow => Outcome::Success(AuthThrottle),
            ThrottleDecision::Limited { retry_after } => {
                let retry_after_secs = retry_after.as_secs().max(1);
                request.local_cache(|| Some(ThrottleRetryAfter(retry_after_secs)));
                warn!(
                    method = %request.method(),
                    uri = %request.uri(),
                    retry_after_secs = %retry_after_secs,
                    "sign-in throttle exceeded"
                );
                Outcome::Error((ThrottleError::TooManyRequests.status(), ThrottleError::TooManyRequests))
            }
        }
    }
}

/// A repeatedly hammered uid is throttled even when the attacker rotates
/// source addresses; the claimed uid header is enough for counting.
fn claimed_uid(request: &Request<'_>) -> Option<String> {
    let config = request.rocket().state::<crate::config::Config>()?;
    request.headers().get_one(&config.headers.uid).map(str::to_string)
}

impl<'a> OpenApiFromRequest<'a> for AuthThrottle {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        responses.responses.insert(
            "429".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Too Many Requests".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
