//! Signed, expiring credential pairs.
//!
//! Access and refresh tokens are HS256 JWTs signed with *different* secrets.
//! There is no type claim: handing a refresh token to an access check fails on
//! the signature alone. Expiry is the only way a token stops being valid.

use std::time::Duration;

use jsonwebtoken::{errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Identity fields a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.exp < now_secs
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token could not be issued: {0}")]
    Issue(#[from] jsonwebtoken::errors::Error),
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    validation: Validation,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access.ttl)
            .field("refresh_ttl", &self.refresh.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(access_secret: &str, refresh_secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        Self {
            access: SigningKeys::new(access_secret, access_ttl),
            refresh: SigningKeys::new(refresh_secret, refresh_ttl),
            validation,
        }
    }

    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self::new(
            &cfg.access_secret,
            &cfg.refresh_secret,
            Duration::from_secs(cfg.access_ttl_secs),
            Duration::from_secs(cfg.refresh_ttl_secs),
        )
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn issue(&self, subject: &Subject, kind: TokenKind) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let iat = now_secs();
        let claims = Claims {
            sub: subject.id.clone(),
            email: subject.email.clone(),
            role: subject.role,
            iat,
            exp: iat + keys.ttl.as_secs(),
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?)
    }

    pub fn issue_access(&self, subject: &Subject) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Access)
    }

    pub fn issue_refresh(&self, subject: &Subject) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Refresh)
    }

    pub fn issue_pair(&self, subject: &Subject) -> Result<CredentialPair, TokenError> {
        Ok(CredentialPair { access_token: self.issue_access(subject)?, refresh_token: self.issue_refresh(subject)? })
    }

    /// Expired and invalid are distinct: the caller refreshes on the first and
    /// rejects outright on the second.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        jsonwebtoken::decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    /// Signature is *not* checked. Only for expiry inspection.
    pub fn decode(&self, token: &str) -> Option<Claims> {
        decode_unverified(token)
    }
}

/// Reads claims without verifying the signature or expiry.
pub fn decode_unverified(token: &str) -> Option<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

/// Exactly `"Bearer <token>"`; anything else yields `None`.
pub fn extract_from_header(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").filter(|t| !t.is_empty() && !t.contains(' '))
}

pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(access_ttl: u64) -> TokenService {
        TokenService::new(
            "access-secret-for-tests-0123456789abcdef",
            "refresh-secret-for-tests-0123456789abcdef",
            Duration::from_secs(access_ttl),
            Duration::from_secs(3600),
        )
    }

    fn subject() -> Subject {
        Subject { id: "u-1".into(), email: "ada@example.com".into(), role: Role::Admin }
    }

    #[test]
    fn test_issue_and_verify() {
        let svc = service(60);
        let pair = svc.issue_pair(&subject()).unwrap();
        let claims = svc.verify(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, claims.iat + 60);
        assert!(svc.verify(&pair.refresh_token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_cross_use_is_rejected() {
        let svc = service(60);
        let pair = svc.issue_pair(&subject()).unwrap();
        assert!(matches!(svc.verify(&pair.refresh_token, TokenKind::Access), Err(TokenError::Invalid(_))));
        assert!(matches!(svc.verify(&pair.access_token, TokenKind::Refresh), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let other = TokenService::new("a".repeat(40).as_str(), "b".repeat(40).as_str(), Duration::from_secs(60), Duration::from_secs(60));
        let token = other.issue_access(&subject()).unwrap();
        assert!(matches!(service(60).verify(&token, TokenKind::Access), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_malformed_is_invalid() {
        assert!(matches!(service(60).verify("not.a.jwt", TokenKind::Access), Err(TokenError::Invalid(_))));
        assert!(matches!(service(60).verify("", TokenKind::Access), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expiry() {
        let svc = service(1);
        let token = svc.issue_access(&subject()).unwrap();
        assert!(svc.verify(&token, TokenKind::Access).is_ok());
        std::thread::sleep(Duration::from_secs(2));
        assert!(matches!(svc.verify(&token, TokenKind::Access), Err(TokenError::Expired)));
    }

    #[test]
    fn test_decode_without_verification() {
        let token = service(60).issue_access(&subject()).unwrap();
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert!(!claims.is_expired());
        assert!(decode_unverified("garbage").is_none());
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(extract_from_header("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_from_header("bearer abc"), None);
        assert_eq!(extract_from_header("Bearer "), None);
        assert_eq!(extract_from_header("Basic abc"), None);
        assert_eq!(extract_from_header("Bearer a b"), None);
        assert_eq!(extract_from_header("abc"), None);
    }
}
