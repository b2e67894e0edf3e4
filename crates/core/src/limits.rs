//! Size and capacity limits applied during normalization and sync.

/// Immutable per-cache limits. All fields are positive; character limits
/// are counted in Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_contacts_per_device: usize,
    pub max_phones_per_contact: usize,
    pub max_emails_per_contact: usize,
    pub max_display_name_chars: usize,
    pub max_phone_chars: usize,
    pub max_email_chars: usize,
    pub max_source_device_chars: usize,
    pub max_external_id_chars: usize,
}

impl CacheLimits {
    /// Limits used by the production cache.
    pub fn production_defaults() -> Self {
        Self {
            max_contacts_per_device: 50_000,
            max_phones_per_contact: 20,
            max_emails_per_contact: 20,
            max_display_name_chars: 256,
            max_phone_chars: 64,
            max_email_chars: 320,
            max_source_device_chars: 128,
            max_external_id_chars: 128,
        }
    }
}
