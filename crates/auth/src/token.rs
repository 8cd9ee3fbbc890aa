//! HS256 token codec with one signing key per surface.
//!
//! Tokens carry a `kid` header naming the surface that issued them; the
//! decoder picks the verifying key from it, so a token signed with the
//! operational key never verifies as an administrative one.
//!
//! Tokens are stateless: there is no refresh and no revocation list.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::TokenClaims;
use crate::principal::PrincipalKind;

/// Which signing key (and default TTL) a token belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Surface {
    /// Tenant users, portal clients, superadmins logging in through `/auth/login`.
    Operational,
    /// Superadmins logging in through `/auth/superadmin/login`.
    Administrative,
}

impl Surface {
    pub fn kid(&self) -> &'static str {
        match self {
            Surface::Operational => "operational",
            Surface::Administrative => "administrative",
        }
    }

    fn from_kid(kid: &str) -> Option<Self> {
        match kid {
            "operational" => Some(Surface::Operational),
            "administrative" => Some(Surface::Administrative),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// A freshly minted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Seconds until expiry.
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub claims: TokenClaims,
    pub surface: Surface,
}

#[derive(Clone)]
struct SurfaceKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SurfaceKey {
    fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

/// Encodes and decodes signed, expiring claim sets.
#[derive(Clone)]
pub struct TokenCodec {
    operational: SurfaceKey,
    administrative: SurfaceKey,
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("operational_ttl", &self.operational.ttl)
            .field("administrative_ttl", &self.administrative.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        operational_secret: &[u8],
        administrative_secret: &[u8],
        operational_ttl: Duration,
        administrative_ttl: Duration,
    ) -> Self {
        Self {
            operational: SurfaceKey::new(operational_secret, operational_ttl),
            administrative: SurfaceKey::new(administrative_secret, administrative_ttl),
        }
    }

    fn key(&self, surface: Surface) -> &SurfaceKey {
        match surface {
            Surface::Operational => &self.operational,
            Surface::Administrative => &self.administrative,
        }
    }

    pub fn ttl(&self, surface: Surface) -> Duration {
        self.key(surface).ttl
    }

    /// Sign `claims` with the surface key and its configured TTL.
    pub fn issue(
        &self,
        surface: Surface,
        claims: TokenClaims,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.encode(surface, claims, now, self.ttl(surface))
    }

    /// Sign `claims` with an explicit TTL. `iat`/`exp` are overwritten.
    pub fn encode(
        &self,
        surface: Surface,
        mut claims: TokenClaims,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = issued_at + ttl;
        claims.iat = issued_at.timestamp();
        claims.exp = expires_at.timestamp();

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(surface.kid().to_string());

        let token = jsonwebtoken::encode(&header, &claims, &self.key(surface).encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_in: ttl.num_seconds(),
            expires_at,
        })
    }

    /// Verify signature, algorithm and expiry against `now`.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<DecodedToken, TokenError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::Invalid(format!("unsupported algorithm {:?}", header.alg)));
        }
        let surface = header
            .kid
            .as_deref()
            .and_then(Surface::from_kid)
            .ok_or_else(|| TokenError::Invalid("unknown key id".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the caller's clock.
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.key(surface).decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let claims = data.claims;

        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        if surface == Surface::Administrative && claims.kind != PrincipalKind::Superadmin {
            return Err(TokenError::Invalid(
                "administrative token issued to a non-superadmin".to_string(),
            ));
        }
        if claims.is_super_admin != (claims.kind == PrincipalKind::Superadmin) {
            return Err(TokenError::Invalid("inconsistent superadmin claim".to_string()));
        }

        Ok(DecodedToken { claims, surface })
    }
}
