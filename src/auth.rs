//! Email-link sign-in and bearer sessions.
//!
//! Tokens handed to clients are random UUIDs; only their SHA-256 digests are
//! stored. There is no mailer: the sign-in link is written to the log.

use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::api::{ApiError, SharedState};
use crate::db::{BoardDb, normalize_email};
use crate::errors::StudyError;
use crate::models::{Session, User};

pub const SESSION_COOKIE: &str = "session_token";

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A pending sign-in. `token` is the clear-text value for the link.
#[derive(Debug, Clone)]
pub struct SignInTicket {
    pub email: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
    pub expires: DateTime<Utc>,
}

/// Issue a verification token for `email`.
pub fn request_sign_in(
    db: &BoardDb,
    email: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<SignInTicket> {
    let email = normalize_email(email)?;
    let token = new_token();
    let expires = now + ttl;
    db.create_verification_token(&email, &hash_token(&token), expires)?;
    tracing::info!(
        email = %email,
        link = %format!("/auth/verify?email={}&token={}", email, token),
        "sign-in link issued"
    );
    Ok(SignInTicket {
        email,
        token,
        expires,
    })
}

/// Consume a verification token and open a session. The user is created on
/// first sign-in.
pub fn verify_sign_in(
    db: &BoardDb,
    email: &str,
    token: &str,
    session_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<SignedIn> {
    let email = normalize_email(email)?;
    if !db.consume_verification_token(&email, &hash_token(token), now)? {
        return Err(StudyError::Unauthorized("Invalid or expired sign-in token".into()).into());
    }
    let user = match db.get_user_by_email(&email)? {
        Some(user) => user,
        None => {
            tracing::info!(email = %email, "creating user on first sign-in");
            db.create_user(None, &email, None, None)?
        }
    };
    let user = db.mark_email_verified(user.id, now)?;

    let session_token = new_token();
    let session = db.create_session(user.id, &hash_token(&session_token), now + session_ttl)?;
    tracing::info!(user_id = user.id, "session opened");
    Ok(SignedIn {
        user,
        token: session_token,
        expires: session.expires,
    })
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// The signed-in caller. Rejects with 401 when the request carries no live
/// session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
    pub token_hash: String,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Missing session token".into()))?;
        let token_hash = hash_token(&token);
        let lookup_hash = token_hash.clone();
        let found = state
            .db
            .call(move |db| db.find_session(&lookup_hash, Utc::now()))
            .await?;
        match found {
            Some((session, user)) => Ok(CurrentUser {
                user,
                session,
                token_hash,
            }),
            None => Err(ApiError::Unauthorized("Invalid or expired session".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("abc"));
        assert_ne!(h, hash_token("abd"));
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_new_tokens_are_unique() {
        assert_ne!(new_token(), new_token());
        assert_eq!(new_token().len(), 32);
    }

    #[test]
    fn test_sign_in_flow_creates_verified_user() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let now = Utc::now();
        let ticket = request_sign_in(&db, "New@Uni.test", Duration::minutes(15), now)?;
        assert_eq!(ticket.email, "new@uni.test");

        let signed = verify_sign_in(&db, "new@uni.test", &ticket.token, Duration::hours(1), now)?;
        assert_eq!(signed.user.email, "new@uni.test");
        assert!(signed.user.email_verified.is_some());

        let (session, user) = db
            .find_session(&hash_token(&signed.token), now)?
            .expect("session should exist");
        assert_eq!(user.id, signed.user.id);
        assert_eq!(session.expires, signed.expires);
        Ok(())
    }

    #[test]
    fn test_token_cannot_be_reused() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let now = Utc::now();
        let ticket = request_sign_in(&db, "a@uni.test", Duration::minutes(15), now)?;
        verify_sign_in(&db, "a@uni.test", &ticket.token, Duration::hours(1), now)?;

        let err = verify_sign_in(&db, "a@uni.test", &ticket.token, Duration::hours(1), now)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudyError>(),
            Some(StudyError::Unauthorized(_))
        ));
        Ok(())
    }

    #[test]
    fn test_token_bound_to_email() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let now = Utc::now();
        let ticket = request_sign_in(&db, "a@uni.test", Duration::minutes(15), now)?;
        assert!(verify_sign_in(&db, "b@uni.test", &ticket.token, Duration::hours(1), now).is_err());
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let now = Utc::now();
        let ticket = request_sign_in(&db, "a@uni.test", Duration::minutes(15), now)?;
        let later = now + Duration::minutes(16);
        assert!(verify_sign_in(&db, "a@uni.test", &ticket.token, Duration::hours(1), later).is_err());
        Ok(())
    }

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_token=abc; other=1"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_or_malformed_token() {
        let mut headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert!(token_from_headers(&headers).is_none());
    }
}
