//! Contact payload and cached row models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contacts::redaction::redact_phone;

/// Contact data as supplied by a source adapter, and the normalized form
/// the store applies. One type serves both shapes; the normalizer is the
/// boundary between them.
///
/// `Debug` output redacts phone numbers and elides email addresses so
/// payloads can appear in log lines.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub external_contact_id: String,
    pub display_name: String,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub avatar_etag: Option<String>,
    pub source_version: i64,
    pub source_last_modified_ms: i64,
}

impl ContactPayload {
    pub fn new(
        external_contact_id: impl Into<String>,
        display_name: impl Into<String>,
        phones: Vec<String>,
        emails: Vec<String>,
        avatar_etag: Option<String>,
        source_version: i64,
        source_last_modified_ms: i64,
    ) -> Self {
        Self {
            external_contact_id: external_contact_id.into(),
            display_name: display_name.into(),
            phones,
            emails,
            avatar_etag,
            source_version,
            source_last_modified_ms,
        }
    }
}

impl fmt::Debug for ContactPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactPayload")
            .field("external_contact_id", &self.external_contact_id)
            .field("display_name", &self.display_name)
            .field("phones", &redacted_phones(&self.phones))
            .field("emails", &format_args!("<{} redacted>", self.emails.len()))
            .field("avatar_etag", &self.avatar_etag)
            .field("source_version", &self.source_version)
            .field("source_last_modified_ms", &self.source_last_modified_ms)
            .finish()
    }
}

/// A cache row as read back from a store: the payload fields plus the
/// owning source device and the local mutation timestamp.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContact {
    pub source_device: String,
    pub external_contact_id: String,
    pub display_name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub avatar_etag: Option<String>,
    pub source_version: i64,
    pub source_last_modified_ms: i64,
    pub local_updated_ms: i64,
}

impl fmt::Debug for CachedContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedContact")
            .field("source_device", &self.source_device)
            .field("external_contact_id", &self.external_contact_id)
            .field("display_name", &self.display_name)
            .field("phones", &redacted_phones(&self.phones))
            .field("emails", &format_args!("<{} redacted>", self.emails.len()))
            .field("avatar_etag", &self.avatar_etag)
            .field("source_version", &self.source_version)
            .field("source_last_modified_ms", &self.source_last_modified_ms)
            .field("local_updated_ms", &self.local_updated_ms)
            .finish()
    }
}

fn redacted_phones(phones: &[String]) -> Vec<String> {
    phones.iter().map(|phone| redact_phone(phone)).collect()
}
