use crate::auth::PresentedCredentials;
use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::user::User;
use crate::token::rotation::{IssuedSession, RotationEngine, Validation};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Glue between the credential store and the rotation engine. Password
/// checks happen here, once, at sign-in; every later request is pure token
/// validation.
pub struct AuthService<'a> {
    pub repo: &'a PostgresRepository,
    pub config: &'a Config,
}

impl<'a> AuthService<'a> {
    fn engine(&self) -> RotationEngine<'a, PostgresRepository> {
        RotationEngine::new(self.repo, &self.config.auth)
    }

    /// Password sign-in for one device. Creates (or replaces) the device's
    /// session and mints its first token.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        client_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(User, IssuedSession), AppError> {
        let Some(user) = self.repo.get_user_by_email(email).await? else {
            PostgresRepository::dummy_verify(password);
            return Err(AppError::InvalidCredentials);
        };

        self.repo.verify_password(&user, password)?;

        let client_id = client_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let issued = self.engine().create_session(&user.id, &client_id, now).await?;

        Ok((user, issued))
    }

    /// Token validation for an authenticated request; drives rotation and
    /// the grace-window fallback.
    pub async fn authenticate(&self, presented: &PresentedCredentials, now: DateTime<Utc>) -> Result<(User, Validation), AppError> {
        let engine = self.engine();

        let Some(user) = self.repo.get_user_by_email(&presented.uid).await? else {
            // unknown uid costs the same as a real verification
            engine.codec().dummy_verify(&presented.access_token);
            return Err(AppError::SessionNotFound);
        };

        let validation = engine
            .authenticate(&user.id, &presented.client_id, &presented.access_token, now)
            .await?;

        Ok((user, validation))
    }

    pub async fn sign_out(&self, user_id: &Uuid, client_id: &str) -> Result<(), AppError> {
        self.engine().sign_out(user_id, client_id).await
    }
}
