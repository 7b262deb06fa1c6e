//! Services layer - Business logic
//!
//! This module contains the business logic of the account-security core.
//! Services are responsible for:
//! - Implementing security policy (lockout, rate limits, fraud scoring)
//! - Coordinating between repositories
//! - Handling validation and error cases

pub mod auth;
pub mod email;
pub mod events;
pub mod fraud;
pub mod lockout;
pub mod password;
pub mod rate_limiter;
pub mod session;
pub mod token;
pub mod validator;

pub use auth::{AuthError, AuthService, SignInInput, SignUpInput};
pub use email::EmailService;
pub use events::SecurityEventLogger;
pub use fraud::{ActivitySignals, FraudAssessment, FraudScorer};
pub use lockout::LockoutTracker;
pub use password::{hash_password, verify_password};
pub use rate_limiter::{EndpointClass, RateDecision, RateLimiter};
pub use session::SessionManager;
pub use token::{TokenError, TokenService};
pub use validator::{
    check_password_leak, sanitize, validate_email, validate_password_strength, LeakCheck,
    PasswordCheck,
};
