//! Credential validation and input sanitization
//!
//! Stateless checks on email format, password strength, and free-text input.
//! The only network call is the optional breach-database lookup, which fails
//! open: a lookup error is reported as `Degraded`, never as "leaked", so
//! availability is not sacrificed for this secondary check.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// RFC-5322-lite email pattern. Intentionally permissive; the definitive
/// check is the verification email.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$").unwrap()
});

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static JS_SCHEME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)javascript\s*:").unwrap());

static EVENT_HANDLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").unwrap());

/// Symbols accepted as the "special character" password rule
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Passwords rejected outright regardless of composition
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "qwerty123",
    "letmein1",
    "welcome1",
    "admin123",
    "iloveyou",
    "sunshine1",
    "monkey123",
    "travel123",
];

/// Result of a password strength check. `errors` lists every violated rule
/// so callers can display all of them at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Outcome of the breach-database lookup. `Degraded` marks a failed lookup
/// so logs can tell it apart from a clean pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakCheck {
    Clear,
    Leaked,
    Degraded,
}

/// Validate an email address against an RFC-5322-lite pattern
pub fn validate_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

/// Check a password against all strength rules.
///
/// A password is valid iff it satisfies every rule simultaneously: length,
/// uppercase, lowercase, digit, special character, and not on the common
/// password denylist.
pub fn validate_password_strength(password: &str) -> PasswordCheck {
    let mut errors = Vec::new();

    if password.len() < 8 {
        errors.push("Password must be at least 8 characters long".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain an uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain a digit".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        errors.push(format!(
            "Password must contain a special character ({})",
            SPECIAL_CHARS
        ));
    }
    if COMMON_PASSWORDS
        .iter()
        .any(|common| password.eq_ignore_ascii_case(common))
    {
        errors.push("Password is too common".to_string());
    }

    PasswordCheck {
        valid: errors.is_empty(),
        errors,
    }
}

/// Sanitize a free-text field before storage or echoing.
///
/// Strips HTML tags, `javascript:` scheme references, and inline event
/// handler patterns, then trims whitespace.
pub fn sanitize(input: &str) -> String {
    // Stripping can splice new matches together ("java<b>script:"), so
    // repeat until a pass removes nothing.
    let mut current = input.to_string();
    loop {
        let no_tags = HTML_TAG_RE.replace_all(&current, "");
        let no_js = JS_SCHEME_RE.replace_all(&no_tags, "");
        let next = EVENT_HANDLER_RE.replace_all(&no_js, "").to_string();
        if next == current {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}

/// Check a password against a k-anonymity breach range endpoint.
///
/// Only the first five hex characters of the SHA-256 digest leave the
/// process. Any transport or parse failure returns `Degraded` (fail open).
pub async fn check_password_leak(client: &reqwest::Client, password: &str) -> LeakCheck {
    let digest = Sha256::digest(password.as_bytes());
    let hex = format!("{:x}", digest).to_uppercase();
    let (prefix, suffix) = hex.split_at(5);

    let url = format!("https://api.pwnedpasswords.com/range/{}", prefix);
    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Breach lookup failed: {}", e);
            return LeakCheck::Degraded;
        }
    };

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("Breach lookup body read failed: {}", e);
            return LeakCheck::Degraded;
        }
    };

    for line in body.lines() {
        if let Some((candidate, _count)) = line.split_once(':') {
            if candidate.eq_ignore_ascii_case(suffix) {
                return LeakCheck::Leaked;
            }
        }
    }

    LeakCheck::Clear
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email_accepts_common_forms() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("first.last@sub.example.co.uk"));
        assert!(validate_email("user+tag@example.com"));
    }

    #[test]
    fn test_validate_email_rejects_malformed() {
        assert!(!validate_email(""));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("user@nodot"));
        assert!(!validate_email("user @example.com"));
    }

    #[test]
    fn test_validate_email_rejects_overlong() {
        let local = "a".repeat(250);
        assert!(!validate_email(&format!("{}@example.com", local)));
    }

    #[test]
    fn test_password_all_rules_pass() {
        let check = validate_password_strength("Str0ng!Pass");
        assert!(check.valid);
        assert!(check.errors.is_empty());
    }

    #[test]
    fn test_password_reports_all_violations_at_once() {
        // "weakpass": no uppercase, no digit, no symbol
        let check = validate_password_strength("weakpass");
        assert!(!check.valid);
        assert_eq!(check.errors.len(), 3);
    }

    #[test]
    fn test_password_too_short() {
        let check = validate_password_strength("S1!a");
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("8 characters")));
    }

    #[test]
    fn test_password_common_denylist_case_insensitive() {
        let check = validate_password_strength("PASSWORD123");
        assert!(check.errors.iter().any(|e| e.contains("too common")));
    }

    #[test]
    fn test_sanitize_strips_html_tags() {
        assert_eq!(sanitize("<script>alert(1)</script>hello"), "alert(1)hello");
        assert_eq!(sanitize("<b>bold</b>"), "bold");
    }

    #[test]
    fn test_sanitize_strips_js_scheme() {
        assert_eq!(sanitize("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize("JaVaScRiPt : alert(1)"), "alert(1)");
    }

    #[test]
    fn test_sanitize_strips_event_handlers() {
        let out = sanitize("x onclick=steal() y");
        assert!(!out.contains("onclick="));
    }

    #[test]
    fn test_sanitize_trims_whitespace() {
        assert_eq!(sanitize("  plain text  "), "plain text");
    }

    #[test]
    fn test_sanitize_plain_text_unchanged() {
        assert_eq!(sanitize("Paris in spring"), "Paris in spring");
    }
}
