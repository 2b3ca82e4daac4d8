use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub token_ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: i64,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn user_id(&self) -> UserId {
        UserId(self.sub)
    }
}

pub fn password_digest(password: &str) -> String {
    let hash = Sha256::digest(password.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn mint_session_token(
    config: &AuthConfig,
    user_id: UserId,
    username: &str,
) -> Result<(String, DateTime<Utc>), ApiError> {
    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::seconds(config.token_ttl_seconds);
    let claims = SessionClaims {
        sub: user_id.0,
        username: username.to_string(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token mint failed: {e}")))?;
    Ok((token, expires_at))
}

pub fn verify_session_token(config: &AuthConfig, token: &str) -> Result<SessionClaims, ApiError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::new(ErrorCode::Unauthorized, "invalid or expired session token"))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            secret: "test-secret".to_string(),
            token_ttl_seconds: 3600,
        }
    }

    #[test]
    fn minted_tokens_verify_and_carry_identity() {
        let (token, expires_at) =
            mint_session_token(&config(), UserId(7), "planner").expect("mint");
        assert!(expires_at > Utc::now());

        let claims = verify_session_token(&config(), &token).expect("verify");
        assert_eq!(claims.user_id(), UserId(7));
        assert_eq!(claims.username, "planner");
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let other = AuthConfig {
            secret: "other-secret".to_string(),
            token_ttl_seconds: 3600,
        };
        let (token, _) = mint_session_token(&other, UserId(7), "planner").expect("mint");
        let err = verify_session_token(&config(), &token).expect_err("must fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[test]
    fn digest_is_stable_and_password_sensitive() {
        assert_eq!(password_digest("door123"), password_digest("door123"));
        assert_ne!(password_digest("door123"), password_digest("door124"));
    }
}
