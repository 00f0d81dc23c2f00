use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use crate::dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest};
use crate::{
    entity::{timestamp_now, users::ActiveModel as UserActive},
    error::{AppError, AppResult},
    middleware::auth::USER_ROLE,
    models::User,
    notification::UserRegisteredNotice,
    response::{ApiResponse, Meta},
    services::identity_service,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_TTL_HOURS: i64 = 24;

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let RegisterRequest {
        email,
        name,
        password,
    } = payload;
    let email = email.trim().to_lowercase();

    if !email.contains('@') {
        return Err(AppError::BadRequest("email is invalid".to_string()));
    }
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    match identity_service::get_user_by_email(&state.orm, &email).await {
        Ok(_) => return Err(AppError::BadRequest("Email is already taken".to_string())),
        Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }

    let password_hash = hash_password(&password)?;

    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email),
        name: Set(name.trim().to_string()),
        password_hash: Set(password_hash),
        role: Set(USER_ROLE.to_string()),
        created_at: Set(timestamp_now()),
    }
    .insert(&state.orm)
    .await?;

    tracing::info!(user_id = %user.id, "user registered");
    state.notifier.user_registered(UserRegisteredNotice {
        user_id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
    });

    Ok(ApiResponse::success(
        "User created",
        User::from(user),
        Some(Meta::empty()),
    ))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user = match identity_service::get_user_by_email(&state.orm, &email).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::BadRequest("Invalid email or password".into()));
        }
        Err(err) => return Err(err),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let token = issue_token(user.id, &user.role, &state.jwt_secret)?;

    tracing::info!(user_id = %user.id, "user logged in");

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: TOKEN_TTL_HOURS * 3600,
        },
        Some(Meta::empty()),
    ))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn issue_token(user_id: Uuid, role: &str, secret: &str) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(TOKEN_TTL_HOURS))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::verify_token;

    #[test]
    fn issued_token_round_trips_through_verification() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, "admin", "secret").unwrap();
        let principal = verify_token(&token, "secret").unwrap();
        assert_eq!(principal.user_id, user_id);
        assert!(principal.is_admin());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), "user", "secret").unwrap();
        let err = verify_token(&token, "other").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
