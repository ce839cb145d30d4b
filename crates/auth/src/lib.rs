//! Stateless JWT authentication for NornicDB
//!
//! HMAC-SHA256 JWTs over an in-memory user directory with bcrypt-hashed
//! passwords. Token validation is stateless: any holder of the shared
//! secret can verify any token, which is also how cluster peers
//! authenticate each other.
//!
//! Failure semantics are deliberately uniform: bad password, unknown
//! user, and disabled user all surface as `InvalidCredentials` so callers
//! cannot enumerate accounts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directory;
pub mod jwt;

pub use directory::{AuthConfig, Authenticator, UserInfo};
pub use jwt::{Claims, JwtSigner, TokenResponse};
