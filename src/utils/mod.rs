use axum::Json;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // 用户ID
    pub email: String, // 登录邮箱
    pub exp: i64,      // 过期时间
    pub iat: i64,      // 签发时间
}

pub fn generate_token(
    user_id: &str,
    email: &str,
    config: &Config,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::seconds(config.jwt_expiration().as_secs() as i64))
        .expect("valid timestamp")
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: expiration,
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    // 有效期按签发窗口精确判定，不留余地
    let mut validation = Validation::default();
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}

/// 除载荷响应外统一的 {message} 响应体
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    pub message: String,
}

pub fn api_message(message: impl Into<String>) -> Json<ApiMessage> {
    Json(ApiMessage {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/postboard".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "token-test-secret".into(),
            jwt_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            cloudinary_api_base: "https://api.cloudinary.com/v1_1".into(),
            cloudinary_cloud_name: "demo".into(),
            cloudinary_api_key: "key".into(),
            cloudinary_api_secret: "secret".into(),
            cloudinary_folder: "postboard".into(),
        }
    }

    #[test]
    fn token_round_trip_preserves_identity() {
        let config = test_config();
        let token = generate_token("user-1", "someone@example.com", &config).unwrap();

        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "someone@example.com");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = test_config();
        let mut other = test_config();
        other.jwt_secret = "a-different-secret".into();

        let token = generate_token("user-1", "someone@example.com", &other).unwrap();
        assert!(verify_token(&token, &config).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let claims = Claims {
            sub: "user-1".into(),
            email: "someone@example.com".into(),
            exp: Utc::now().timestamp() - 10,
            iat: Utc::now().timestamp() - 3610,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();

        assert!(verify_token(&token, &config).is_err());
    }

    #[test]
    fn malformed_token_is_rejected() {
        let config = test_config();
        assert!(verify_token("not-a-token", &config).is_err());
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hashed = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hashed).unwrap());
        assert!(!verify_password("other", &hashed).unwrap());
    }
}
