use chrono::{DateTime, Utc};
use jetset_core::QuoteKind;
use rand::Rng;

/// No 0/O, 1/I: references get read out over the phone.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 5;

/// Produces human-readable references such as `EL-260314-K7P2Q`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGenerator;

impl ReferenceGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, kind: QuoteKind, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();

        format!("{}-{}-{}", kind.reference_prefix(), now.format("%y%m%d"), suffix)
    }

    pub fn is_well_formed(reference: &str) -> bool {
        let mut parts = reference.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        matches!(prefix, "EL" | "CH")
            && date.len() == 6
            && date.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == SUFFIX_LEN
            && suffix.bytes().all(|b| ALPHABET.contains(&b))
    }
}
