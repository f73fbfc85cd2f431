//! Text normalization applied to questions before any scanner sees them.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Replacement for e-mail addresses.
pub const EMAIL_PLACEHOLDER: &str = "[EMAIL]";
/// Replacement for phone numbers.
pub const PHONE_PLACEHOLDER: &str = "[PHONE]";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("invalid e-mail pattern")
});

// Either an international number with a `+` country code, or a ten-digit 3-3-4 number.
// Shorter digit groups are left alone so order and invoice numbers survive.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\+\d{1,3}(?:[\s.-]?\(?\d{1,4}\)?){2,5}",
        r"|(?:\(\d{3}\)[\s.-]?|\b\d{3}[\s.-])\d{3}[\s.-]\d{4}\b",
    ))
    .expect("invalid phone pattern")
});

/// Trim and collapse runs of whitespace into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace e-mail addresses and phone numbers with placeholders.
pub fn redact_contacts(text: &str) -> Cow<'_, str> {
    let redacted = EMAIL.replace_all(text, EMAIL_PLACEHOLDER);
    if !PHONE.is_match(&redacted) {
        return redacted;
    }
    Cow::Owned(PHONE.replace_all(&redacted, PHONE_PLACEHOLDER).into_owned())
}

/// Full normalization of an incoming question.
pub fn normalize_question(text: &str) -> String {
    collapse_whitespace(&redact_contacts(text))
}
