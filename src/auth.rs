use crate::config::{Config, HeaderNamesConfig};
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::service::auth::AuthService;
use crate::token::rotation::Validation;
use chrono::{DateTime, Utc};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, HeaderMap, Status};
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket::Response;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::{OpenApiError, response::OpenApiResponderInner};
use schemars::JsonSchema;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Fixed scheme literal published in the `token-type` response header.
pub const TOKEN_TYPE: &str = "Bearer";

/// The credential triple a request presents. Extracted once at the boundary;
/// nothing past this point knows header names.
#[derive(Debug, Clone)]
pub struct PresentedCredentials {
    pub access_token: String,
    pub client_id: String,
    pub uid: String,
}

pub(crate) fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}

impl PresentedCredentials {
    /// Pull the credential headers off a request, honoring the configured
    /// header names. The token may arrive either in its own header or, in
    /// legacy mode, as `Authorization: Bearer <token>`.
    pub fn from_headers(headers: &HeaderMap<'_>, names: &HeaderNamesConfig) -> Option<Self> {
        let access_token = headers
            .get_one(&names.access_token)
            .or_else(|| headers.get_one(&names.authorization).and_then(bearer_token))?;
        let client_id = headers.get_one(&names.client)?;
        let uid = headers.get_one(&names.uid)?;

        Some(Self {
            access_token: access_token.to_string(),
            client_id: client_id.to_string(),
            uid: uid.to_string(),
        })
    }
}

/// Renewed credentials to publish on the response. `None` for a grace-window
/// pass-through: the client already holds (or will observe) the newer token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    pub client_id: String,
    pub uid: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RenewedCredentials(pub Option<Credentials>);

fn apply_credential_headers(response: &mut Response<'_>, names: &HeaderNamesConfig, credentials: &Credentials) {
    response.set_header(Header::new(names.access_token.clone(), credentials.access_token.clone()));
    response.set_header(Header::new(names.client.clone(), credentials.client_id.clone()));
    response.set_header(Header::new(names.uid.clone(), credentials.uid.clone()));
    response.set_header(Header::new(names.expiry.clone(), credentials.expiry.timestamp().to_string()));
    response.set_header(Header::new(names.token_type.clone(), TOKEN_TYPE));
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub client_id: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return RequestOutcome::Error((Status::InternalServerError, AppError::Unauthorized));
        };
        let Some(pool) = req.rocket().state::<PgPool>() else {
            return RequestOutcome::Error((Status::InternalServerError, AppError::Unauthorized));
        };

        let Some(presented) = PresentedCredentials::from_headers(req.headers(), &config.headers) else {
            return RequestOutcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        let repo = PostgresRepository { pool: pool.clone() };
        let service = AuthService { repo: &repo, config };

        match service.authenticate(&presented, Utc::now()).await {
            Ok((user, validation)) => {
                let renewed = match validation {
                    Validation::Rotated { token, expiry } => Some(Credentials {
                        access_token: token,
                        client_id: presented.client_id.clone(),
                        uid: user.email.clone(),
                        expiry,
                    }),
                    Validation::Current { expiry } => Some(Credentials {
                        access_token: presented.access_token.clone(),
                        client_id: presented.client_id.clone(),
                        uid: user.email.clone(),
                        expiry,
                    }),
                    Validation::Grace => None,
                };
                req.local_cache(|| RenewedCredentials(renewed));

                let current_user = CurrentUser {
                    id: user.id,
                    email: user.email,
                    client_id: presented.client_id,
                };
                req.local_cache(|| Some(current_user.clone()));
                RequestOutcome::Success(current_user)
            }
            Err(err) if err.is_auth_failure() => {
                warn!(
                    kind = ?err,
                    uid = %presented.uid,
                    client_id = %presented.client_id,
                    method = %req.method(),
                    uri = %req.uri(),
                    "token authentication failed"
                );
                RequestOutcome::Error((Status::Unauthorized, err))
            }
            Err(err) => RequestOutcome::Error((Status::InternalServerError, err)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        // Document the header-based authentication requirement
        let security_scheme = SecurityScheme {
            description: Some(
                "Token authentication via the access-token, client, and uid headers. Sign in via POST /auth/sign_in to obtain them.".to_string(),
            ),
            data: SecuritySchemeData::ApiKey {
                name: "access-token".to_string(),
                location: "header".to_string(),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("tokenAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("tokenAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

/// Fairing that copies the renewed credentials stashed by the request guard
/// onto the response headers.
pub struct CredentialHeaders;

#[rocket::async_trait]
impl Fairing for CredentialHeaders {
    fn info(&self) -> Info {
        Info {
            name: "Credential Headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let renewed = request.local_cache(RenewedCredentials::default);
        if let (Some(credentials), Some(config)) = (&renewed.0, request.rocket().state::<Config>()) {
            apply_credential_headers(response, &config.headers, credentials);
        }
    }
}

/// Response wrapper that publishes a fresh credential set alongside the JSON
/// body; used by sign-in, where the guard has not run.
#[derive(Debug)]
pub struct Credentialed<T> {
    body: rocket::serde::json::Json<T>,
    credentials: Credentials,
}

impl<T> Credentialed<T> {
    pub fn new(body: T, credentials: Credentials) -> Self {
        Self {
            body: rocket::serde::json::Json(body),
            credentials,
        }
    }
}

impl<'r, T: Serialize> rocket::response::Responder<'r, 'static> for Credentialed<T> {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'static> {
        let mut response = self.body.respond_to(req)?;
        if let Some(config) = req.rocket().state::<Config>() {
            apply_credential_headers(&mut response, &config.headers, &self.credentials);
        }
        Ok(response)
    }
}

impl<T: Serialize + JsonSchema + Send> OpenApiResponderInner for Credentialed<T> {
    fn responses(r#gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        <rocket::serde::json::Json<T> as OpenApiResponderInner>::responses(r#gen)
    }
}
