use std::hash::{Hash, Hasher};
use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Verifies HS256 access tokens signed with the shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl JwtVerifier {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = config.auth_clock_skew.as_secs();
        if let Some(issuer) = config.jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let decoded = decode::<AccessClaims>(token, &self.key, &self.validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        let user_id = decoded.claims.sub.trim();
        if user_id.is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: user_id.to_string(),
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Stable, non-reversible stand-in for a user id in logs
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    #[serde(default)]
    sub: String,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
}

// `iat` is optional; when present it must not be in the future.
fn validate_temporal_claims(claims: &AccessClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token `iat` is in the future"));
        }
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
pub(crate) fn issue_test_token(config: &AppConfig, user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": user_id,
        "iss": config.jwt_issuer,
        "iat": now,
        "exp": now + 600,
    });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;
    use crate::config::test_config;

    fn sign(secret: &str, claims: &serde_json::Value) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("bearer   "));
        assert!(extract_bearer_token(&headers).is_err());
        assert!(extract_bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn verifier_accepts_token_signed_with_shared_secret() {
        let config = test_config();
        let verifier = JwtVerifier::from_config(&config);
        let token = issue_test_token(&config, "user-1");

        let user = verifier.verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn verifier_rejects_foreign_secret_and_issuer() {
        let config = test_config();
        let verifier = JwtVerifier::from_config(&config);
        let now = chrono::Utc::now().timestamp();

        let forged = sign(
            "another-secret-that-is-also-32-bytes-long",
            &json!({"sub": "user-1", "iss": "wsm-tests", "exp": now + 600}),
        );
        assert!(verifier.verify_access_token(&forged).is_err());

        let wrong_issuer = sign(
            &config.jwt_secret,
            &json!({"sub": "user-1", "iss": "elsewhere", "exp": now + 600}),
        );
        assert!(verifier.verify_access_token(&wrong_issuer).is_err());
    }

    #[test]
    fn verifier_rejects_expired_or_subjectless_tokens() {
        let config = test_config();
        let verifier = JwtVerifier::from_config(&config);
        let now = chrono::Utc::now().timestamp();

        let expired = sign(
            &config.jwt_secret,
            &json!({"sub": "user-1", "iss": "wsm-tests", "exp": now - 3_600}),
        );
        assert!(matches!(
            verifier.verify_access_token(&expired),
            Err(AppError::Unauthorized(_))
        ));

        let anonymous = sign(
            &config.jwt_secret,
            &json!({"sub": " ", "iss": "wsm-tests", "exp": now + 600}),
        );
        let err = verifier.verify_access_token(&anonymous).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn temporal_claims_require_exp() {
        let claims = AccessClaims {
            sub: "user".to_string(),
            exp: None,
            iat: None,
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: "user".to_string(),
            exp: Some(now + 300),
            iat: Some(now + 120),
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(user_fingerprint("user-1"), user_fingerprint("user-1"));
        assert_ne!(user_fingerprint("user-1"), user_fingerprint("user-2"));
    }
}
