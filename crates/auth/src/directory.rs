//! User directory and account lifecycle
//!
//! Per-instance (never process-wide) directory of users with bcrypt
//! password hashes, a failed-login counter with lockout, and the
//! cluster-peer token variant. Every operation emits a structured audit
//! event through `tracing`.

use crate::jwt::{Claims, JwtSigner, TokenResponse};
use nornic_core::{now_millis, NornicError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Authenticator configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Minimum password length for new accounts.
    pub min_password_length: usize,
    /// bcrypt cost factor.
    pub bcrypt_cost: u32,
    /// Token lifetime in seconds; 0 = tokens never expire.
    pub token_expiry_secs: i64,
    /// Failed logins before the account locks.
    pub max_failed_logins: u32,
    /// How long a lockout lasts.
    pub lockout_duration: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            min_password_length: 8,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            token_expiry_secs: 3600,
            max_failed_logins: 3,
            lockout_duration: Duration::from_secs(15 * 60),
        }
    }
}

struct User {
    id: String,
    username: String,
    password_hash: String,
    roles: Vec<String>,
    enabled: bool,
    failed_logins: u32,
    /// Lock expiry in ms epoch; 0 = not locked.
    locked_until: i64,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Stable account id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Whether the account may authenticate.
    pub enabled: bool,
    /// Whether the account is currently locked out.
    pub locked: bool,
}

/// JWT service plus in-memory user directory.
pub struct Authenticator {
    signer: JwtSigner,
    config: AuthConfig,
    users: RwLock<HashMap<String, User>>,
}

impl Authenticator {
    /// Create an authenticator bound to `secret` (≥ 32 bytes).
    pub fn new(secret: impl Into<Vec<u8>>, config: AuthConfig) -> Result<Self> {
        Ok(Authenticator {
            signer: JwtSigner::new(secret)?,
            config,
            users: RwLock::new(HashMap::new()),
        })
    }

    /// The bound signer; cluster components share it for peer tokens.
    pub fn signer(&self) -> &JwtSigner {
        &self.signer
    }

    // =========================================================================
    // Account lifecycle
    // =========================================================================

    /// Create an account. Fails on duplicate username or weak password.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        roles: Vec<String>,
    ) -> Result<UserInfo> {
        if username.is_empty() {
            return Err(NornicError::invalid_input("username cannot be empty"));
        }
        if password.len() < self.config.min_password_length {
            return Err(NornicError::invalid_input(format!(
                "password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(NornicError::invalid_input("username already exists"));
        }

        let password_hash = bcrypt::hash(password, self.config.bcrypt_cost)
            .map_err(|e| NornicError::invalid_input(format!("password hash failed: {}", e)))?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            roles,
            enabled: true,
            failed_logins: 0,
            locked_until: 0,
        };
        let view = Self::view(&user);
        users.insert(username.to_string(), user);
        info!(audit = "user.create", username, "account created");
        Ok(view)
    }

    /// Disable an account. Disabled users fail authentication with the
    /// same uniform error as unknown users.
    pub fn disable_user(&self, username: &str) -> Result<()> {
        self.with_user_mut(username, |user| {
            user.enabled = false;
            info!(audit = "user.disable", username, "account disabled");
            Ok(())
        })
    }

    /// Re-enable an account.
    pub fn enable_user(&self, username: &str) -> Result<()> {
        self.with_user_mut(username, |user| {
            user.enabled = true;
            info!(audit = "user.enable", username, "account enabled");
            Ok(())
        })
    }

    /// Clear the failure counter and any lockout.
    pub fn unlock_user(&self, username: &str) -> Result<()> {
        self.with_user_mut(username, |user| {
            user.failed_logins = 0;
            user.locked_until = 0;
            info!(audit = "user.unlock", username, "account unlocked");
            Ok(())
        })
    }

    /// Delete an account.
    pub fn delete_user(&self, username: &str) -> Result<()> {
        let removed = self.users.write().remove(username);
        match removed {
            Some(_) => {
                info!(audit = "user.delete", username, "account deleted");
                Ok(())
            }
            None => Err(NornicError::invalid_input("no such user")),
        }
    }

    /// Look up an account.
    pub fn get_user(&self, username: &str) -> Option<UserInfo> {
        self.users.read().get(username).map(Self::view)
    }

    fn view(user: &User) -> UserInfo {
        UserInfo {
            id: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
            enabled: user.enabled,
            locked: user.locked_until > now_millis(),
        }
    }

    fn with_user_mut<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut User) -> Result<T>,
    ) -> Result<T> {
        let mut users = self.users.write();
        match users.get_mut(username) {
            Some(user) => f(user),
            None => Err(NornicError::invalid_input("no such user")),
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Authenticate a user, returning a signed token on success.
    ///
    /// Bad password, unknown user, and disabled user all return
    /// `InvalidCredentials`; a locked account returns `AccountLocked`
    /// regardless of the password supplied.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<TokenResponse> {
        let now = now_millis();
        let mut users = self.users.write();

        let Some(user) = users.get_mut(username) else {
            warn!(audit = "auth.failure", username, reason = "unknown user");
            return Err(NornicError::InvalidCredentials);
        };

        if user.locked_until > now {
            warn!(audit = "auth.locked", username, "login attempt on locked account");
            return Err(NornicError::AccountLocked);
        }

        let password_ok = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if !user.enabled || !password_ok {
            user.failed_logins += 1;
            if user.failed_logins >= self.config.max_failed_logins {
                user.locked_until = now + self.config.lockout_duration.as_millis() as i64;
                warn!(
                    audit = "auth.lockout",
                    username,
                    failed = user.failed_logins,
                    "account locked"
                );
            } else {
                warn!(
                    audit = "auth.failure",
                    username,
                    failed = user.failed_logins,
                    "bad credentials"
                );
            }
            return Err(NornicError::InvalidCredentials);
        }

        user.failed_logins = 0;
        let claims = self.claims_for(&user.id, &user.username, user.roles.clone());
        let token = self.signer.sign(&claims)?;
        info!(audit = "auth.success", username, "token issued");
        Ok(self.token_response(token))
    }

    /// Validate any token minted with the shared secret.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        match self.signer.validate(token) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                warn!(audit = "auth.token_rejected", error = %e, "token rejected");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Cluster-peer tokens
    // =========================================================================

    /// Issue a token whose subject is a node, not a user. Every cluster
    /// node shares the HMAC secret, so any node can verify any other
    /// node's token. `ttl_secs` 0 = never expires.
    pub fn issue_peer_token(&self, node_id: &str, ttl_secs: i64) -> Result<TokenResponse> {
        let now_secs = now_millis() / 1000;
        let claims = Claims {
            sub: format!("node:{}", node_id),
            username: node_id.to_string(),
            roles: vec!["cluster-peer".to_string()],
            iat: now_secs,
            exp: if ttl_secs == 0 { 0 } else { now_secs + ttl_secs },
        };
        let token = self.signer.sign(&claims)?;
        info!(audit = "auth.peer_token", node_id, ttl_secs, "peer token issued");
        Ok(TokenResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: (ttl_secs != 0).then_some(ttl_secs),
        })
    }

    fn claims_for(&self, id: &str, username: &str, roles: Vec<String>) -> Claims {
        let now_secs = now_millis() / 1000;
        Claims {
            sub: id.to_string(),
            username: username.to_string(),
            roles,
            iat: now_secs,
            exp: if self.config.token_expiry_secs == 0 {
                0
            } else {
                now_secs + self.config.token_expiry_secs
            },
        }
    }

    fn token_response(&self, token: String) -> TokenResponse {
        TokenResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: (self.config.token_expiry_secs != 0)
                .then_some(self.config.token_expiry_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn fast_config() -> AuthConfig {
        AuthConfig {
            bcrypt_cost: bcrypt::MIN_COST,
            ..AuthConfig::default()
        }
    }

    fn auth() -> Authenticator {
        Authenticator::new(SECRET, fast_config()).unwrap()
    }

    #[test]
    fn test_token_round_trip_preserves_roles_and_subject() {
        let auth = auth();
        let info = auth
            .create_user("alice", "correct-horse", vec!["admin".to_string()])
            .unwrap();
        let response = auth.authenticate("alice", "correct-horse").unwrap();
        assert_eq!(response.token_type, "Bearer");

        let claims = auth.validate_token(&response.access_token).unwrap();
        assert_eq!(claims.sub, info.id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.roles, vec!["admin"]);
    }

    #[test]
    fn test_uniform_invalid_credentials() {
        let auth = auth();
        auth.create_user("bob", "password123", vec![]).unwrap();
        auth.create_user("carol", "password123", vec![]).unwrap();
        auth.disable_user("carol").unwrap();

        // Unknown user, wrong password, and disabled user: one error.
        for (user, pass) in [
            ("ghost", "password123"),
            ("bob", "wrong-password"),
            ("carol", "password123"),
        ] {
            let err = auth.authenticate(user, pass).unwrap_err();
            assert!(matches!(err, NornicError::InvalidCredentials), "{user}");
        }
    }

    #[test]
    fn test_lockout_after_max_failures() {
        let auth = auth();
        auth.create_user("dave", "password123", vec![]).unwrap();

        // Three wrong attempts: each returns InvalidCredentials.
        for _ in 0..3 {
            let err = auth.authenticate("dave", "nope").unwrap_err();
            assert!(matches!(err, NornicError::InvalidCredentials));
        }
        // Fourth attempt with the CORRECT password: locked.
        let err = auth.authenticate("dave", "password123").unwrap_err();
        assert!(matches!(err, NornicError::AccountLocked));

        // Unlock clears the counter; correct password succeeds.
        auth.unlock_user("dave").unwrap();
        assert!(auth.authenticate("dave", "password123").is_ok());
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let auth = auth();
        auth.create_user("erin", "password123", vec![]).unwrap();
        auth.authenticate("erin", "bad").unwrap_err();
        auth.authenticate("erin", "bad").unwrap_err();
        auth.authenticate("erin", "password123").unwrap();
        // Two more failures don't lock (counter was reset).
        auth.authenticate("erin", "bad").unwrap_err();
        auth.authenticate("erin", "bad").unwrap_err();
        assert!(auth.authenticate("erin", "password123").is_ok());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let auth = auth();
        auth.create_user("frank", "password123", vec![]).unwrap();
        assert!(auth.create_user("frank", "password456", vec![]).is_err());
    }

    #[test]
    fn test_short_password_rejected() {
        let auth = auth();
        assert!(auth.create_user("gina", "short", vec![]).is_err());
    }

    #[test]
    fn test_delete_then_login_fails_uniformly() {
        let auth = auth();
        auth.create_user("hank", "password123", vec![]).unwrap();
        auth.delete_user("hank").unwrap();
        assert!(matches!(
            auth.authenticate("hank", "password123").unwrap_err(),
            NornicError::InvalidCredentials
        ));
    }

    #[test]
    fn test_peer_tokens_cross_validate() {
        let a = Authenticator::new(SECRET, fast_config()).unwrap();
        let b = Authenticator::new(SECRET, fast_config()).unwrap();

        let token = a.issue_peer_token("node-1", 0).unwrap();
        let claims = b.validate_token(&token.access_token).unwrap();
        assert_eq!(claims.sub, "node:node-1");
        assert_eq!(claims.roles, vec!["cluster-peer"]);

        let stranger =
            Authenticator::new(&b"ffffffffffffffffffffffffffffffff"[..], fast_config()).unwrap();
        assert!(stranger.validate_token(&token.access_token).is_err());
    }

    #[test]
    fn test_short_lived_peer_token_has_expiry() {
        let auth = auth();
        let token = auth.issue_peer_token("node-2", 60).unwrap();
        assert_eq!(token.expires_in, Some(60));
        let claims = auth.validate_token(&token.access_token).unwrap();
        assert!(claims.exp > 0);
    }

    #[test]
    fn test_get_user_view() {
        let auth = auth();
        auth.create_user("ivy", "password123", vec!["reader".to_string()])
            .unwrap();
        let info = auth.get_user("ivy").unwrap();
        assert!(info.enabled);
        assert!(!info.locked);
        assert_eq!(info.roles, vec!["reader"]);
        assert!(auth.get_user("nobody").is_none());
    }
}
