//! Pure normalization of contact payloads before they reach the store.
//!
//! Normalization is idempotent: running it twice over a surviving record
//! yields the same value. It owns no state; limits arrive with each call.

use crate::contacts::ContactPayload;
use crate::errors::{Error, Result};
use crate::limits::CacheLimits;

const MAX_AVATAR_ETAG_CHARS: usize = 128;

/// Normalizes a raw payload, or returns `None` when the record must be
/// dropped because its external contact id is blank after trimming.
///
/// Phones are canonicalized to digits plus an optional single leading
/// `+`; emails are lowercased and must contain `@`. Both lists are
/// deduplicated in first-appearance order and capped by the limits.
pub fn normalize(input: &ContactPayload, limits: &CacheLimits) -> Option<ContactPayload> {
    let external_id = trim_to_none(&input.external_contact_id)?;
    let external_id = truncate_chars(external_id, limits.max_external_id_chars);

    let display_name = match trim_to_none(&input.display_name) {
        Some(name) => truncate_chars(name, limits.max_display_name_chars),
        None => "Unknown".to_string(),
    };

    let phones = normalize_phones(&input.phones, limits);
    let emails = normalize_emails(&input.emails, limits);

    let avatar_etag = input
        .avatar_etag
        .as_deref()
        .and_then(trim_to_none)
        .map(|etag| truncate_chars(etag, MAX_AVATAR_ETAG_CHARS));

    Some(ContactPayload {
        external_contact_id: external_id,
        display_name,
        phones,
        emails,
        avatar_etag,
        source_version: input.source_version.max(0),
        source_last_modified_ms: input.source_last_modified_ms.max(0),
    })
}

/// Trims and truncates a source device name; blank input is an
/// invalid-input error.
pub fn normalize_source_device(source_device: &str, limits: &CacheLimits) -> Result<String> {
    match trim_to_none(source_device) {
        Some(normalized) => Ok(truncate_chars(normalized, limits.max_source_device_chars)),
        None => Err(Error::invalid_input("source device must be non-empty")),
    }
}

fn normalize_phones(raw_phones: &[String], limits: &CacheLimits) -> Vec<String> {
    let mut deduped: Vec<String> = Vec::new();
    for raw in raw_phones {
        let Some(canonical) = canonicalize_phone(raw) else {
            continue;
        };
        let canonical = truncate_chars(&canonical, limits.max_phone_chars);
        if !deduped.contains(&canonical) {
            deduped.push(canonical);
        }
        if deduped.len() >= limits.max_phones_per_contact {
            break;
        }
    }
    deduped
}

fn normalize_emails(raw_emails: &[String], limits: &CacheLimits) -> Vec<String> {
    let mut deduped: Vec<String> = Vec::new();
    for raw in raw_emails {
        let Some(trimmed) = trim_to_none(raw) else {
            continue;
        };
        let lowered = trimmed.to_lowercase();
        if !lowered.contains('@') {
            continue;
        }
        let lowered = truncate_chars(&lowered, limits.max_email_chars);
        if !deduped.contains(&lowered) {
            deduped.push(lowered);
        }
        if deduped.len() >= limits.max_emails_per_contact {
            break;
        }
    }
    deduped
}

/// Retains digits and a single `+` when it precedes any digit; drops
/// everything else. Entries with zero digits canonicalize to `None`.
fn canonicalize_phone(raw_phone: &str) -> Option<String> {
    let trimmed = raw_phone.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut canonical = String::with_capacity(trimmed.len());
    let mut digits = 0usize;
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            canonical.push(ch);
            digits += 1;
        } else if ch == '+' && canonical.is_empty() {
            canonical.push(ch);
        }
    }

    if digits == 0 {
        return None;
    }
    Some(canonical)
}

fn trim_to_none(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}
