//! Repository layer
//!
//! Trait-based data access for the security core. Each repository is a
//! capability interface with an sqlx-backed implementation supporting both
//! SQLite and MySQL.

pub mod auth_attempt;
pub mod lockout;
pub mod revocation;
pub mod security_event;
pub mod session;
pub mod user;

pub use auth_attempt::{AuthAttemptRepository, SqlxAuthAttemptRepository};
pub use lockout::{LockoutRepository, SqlxLockoutRepository};
pub use revocation::{RevocationRepository, SqlxRevocationRepository};
pub use security_event::{NewSecurityEvent, SecurityEventRepository, SqlxSecurityEventRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
