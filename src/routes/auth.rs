use crate::auth::{Credentialed, Credentials, CurrentUser};
use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::throttle::AuthThrottle;
use crate::models::user::{SignInRequest, UserResponse};
use crate::service::auth::AuthService;
use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use validator::Validate;

/// Password sign-in for one device. Funnels session creation through the
/// rotation engine and publishes the credential header set on the response.
#[openapi(tag = "Auth")]
#[post("/sign_in", data = "<payload>")]
pub async fn sign_in(
    pool: &State<PgPool>,
    config: &State<Config>,
    _throttle: AuthThrottle,
    payload: Json<SignInRequest>,
) -> Result<Credentialed<UserResponse>, AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService {
        repo: &repo,
        config: config.inner(),
    };

    let (user, issued) = service
        .sign_in(&payload.email, &payload.password, payload.client_id.as_deref(), Utc::now())
        .await?;

    let credentials = Credentials {
        access_token: issued.token,
        client_id: issued.client_id,
        uid: user.email.clone(),
        expiry: issued.expiry,
    };

    Ok(Credentialed::new(UserResponse::from(&user), credentials))
}

/// Delete the requesting device's session. Idempotent on the registry side;
/// the token itself must still validate to reach this handler.
#[openapi(tag = "Auth")]
#[delete("/sign_out")]
pub async fn sign_out(pool: &State<PgPool>, config: &State<Config>, current_user: CurrentUser) -> Result<Status, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService {
        repo: &repo,
        config: config.inner(),
    };

    service.sign_out(&current_user.id, &current_user.client_id).await?;

    Ok(Status::NoContent)
}

/// Validate the presented token and return who it belongs to. Runs the full
/// validation path, so a rotation-enabled deployment answers with renewed
/// credentials in the headers.
#[openapi(tag = "Auth")]
#[get("/validate_token")]
pub async fn validate_token(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![sign_in, sign_out, validate_token]
}
