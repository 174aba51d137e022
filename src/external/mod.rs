//! Verification of third-party signed auth payloads.
//!
//! All checks here are pure functions of the input bytes and the current
//! time. They hold no single-use state; replay protection beyond the
//! freshness window needs an ephemeral store on top.

pub mod telegram;

pub use telegram::{MiniAppInitData, TelegramLogin, TelegramUser, TelegramValidator};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Sorted `key=value` lines joined by `\n`, skipping `signature_field`.
pub fn check_string<'a, I>(fields: I, signature_field: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = fields
        .into_iter()
        .filter(|(key, _)| *key != signature_field)
        .collect();
    pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `HMAC-SHA256(key, message)`.
pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never takes the fallback.
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

/// Compare a lowercase hex signature to the expected MAC in constant time.
pub(crate) fn verify_hex_signature(expected: &[u8], provided_hex: &str) -> bool {
    // One accepted spelling per MAC.
    if !provided_hex
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    !expected.is_empty()
        && provided.len() == expected.len()
        && provided.as_slice().ct_eq(expected).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_string_sorts_and_skips_signature() {
        let fields = [("username", "bob"), ("hash", "abc"), ("auth_date", "1"), ("id", "9")];
        assert_eq!(
            check_string(fields, "hash"),
            "auth_date=1\nid=9\nusername=bob"
        );
    }

    #[test]
    fn hex_signature_comparison() {
        let mac = hmac_sha256(b"key", b"message");
        assert_eq!(mac.len(), 32);
        assert!(verify_hex_signature(&mac, &hex::encode(&mac)));
        assert!(!verify_hex_signature(&mac, &hex::encode(&mac).to_uppercase()));
        assert!(!verify_hex_signature(&mac, &hex::encode(&mac[..31])));
        assert!(!verify_hex_signature(&mac, "zz"));
        assert!(!verify_hex_signature(&mac, ""));
    }

    #[test]
    fn hmac_matches_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
