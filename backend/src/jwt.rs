// backend/src/jwt.rs

use std::collections::HashSet;
use jwt_simple::prelude::*;
use jwt_simple::JWTError;
use tracing::{debug, warn};

use crate::clock::ClockDyn;
use crate::error::AuthError;

pub const TOKEN_ISSUER: &str = "memoya";
pub const TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

// Tokens asserting any other algorithm are rejected before signature checks.
const PINNED_ALGORITHM: &str = "HS256";

/// Issues and validates the bearer tokens handed out at the end of a device flow.
#[derive(Clone)]
pub struct TokenSigner {
    key: HS256Key,
    clock: ClockDyn,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("issuer", &TOKEN_ISSUER).finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8], clock: ClockDyn) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
            clock,
        }
    }

    /// Uses the configured secret, or a random one when none is set. A random
    /// key means every token dies with the process.
    pub fn from_secret(secret: Option<&str>, clock: ClockDyn) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self::new(secret.as_bytes(), clock),
            _ => {
                warn!("JWT_SECRET not set; using a random signing key, tokens will not survive a restart");
                Self {
                    key: HS256Key::generate(),
                    clock,
                }
            }
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let now = self.now_secs();

        let mut claims = Claims::create(Duration::from_secs(TOKEN_TTL_SECS))
            .with_issuer(TOKEN_ISSUER)
            .with_subject(user_id);
        claims.issued_at = Some(Duration::from_secs(now));
        claims.invalid_before = Some(Duration::from_secs(now));
        claims.expires_at = Some(Duration::from_secs(now + TOKEN_TTL_SECS));

        self.key.authenticate(claims).map_err(AuthError::Internal)
    }

    /// Returns the user id carried by a valid token.
    pub fn validate(&self, token: &str) -> Result<String, AuthError> {
        let metadata = Token::decode_metadata(token).map_err(|_| AuthError::InvalidToken)?;
        if metadata.algorithm() != PINNED_ALGORITHM {
            warn!("rejected token signed with disallowed algorithm '{}'", metadata.algorithm());
            return Err(AuthError::InvalidToken);
        }

        // Time claims are checked against the same clock `issue` stamps them with.
        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from([TOKEN_ISSUER.to_string()])),
            time_tolerance: Some(Duration::from_secs(0)),
            artificial_time: Some(Duration::from_secs(self.now_secs())),
            ..Default::default()
        };

        let claims = self
            .key
            .verify_token::<NoCustomClaims>(token, Some(options))
            .map_err(|e| match e.downcast_ref::<JWTError>() {
                Some(JWTError::TokenHasExpired) => AuthError::ExpiredToken,
                _ => {
                    debug!("token verification failed: {}", e);
                    AuthError::InvalidToken
                }
            })?;

        if claims.expires_at.is_none() {
            return Err(AuthError::InvalidToken);
        }

        claims
            .subject
            .filter(|sub| !sub.is_empty())
            .ok_or(AuthError::InvalidToken)
    }

    fn now_secs(&self) -> u64 {
        self.clock.now().timestamp().max(0) as u64
    }

    /// Exchanges a still-valid token for a fresh one with a full TTL.
    pub fn refresh(&self, token: &str) -> Result<String, AuthError> {
        let user_id = self.validate(token)?;
        self.issue(&user_id)
    }
}
