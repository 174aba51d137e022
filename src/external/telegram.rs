//! Telegram Login Widget and Mini-App `initData` validation.
//!
//! - Login Widget: key = `SHA256(bot_token)`
//! - Mini-App: key = `HMAC-SHA256("WebAppData", bot_token)`
//!
//! In both cases the signature is `hex(HMAC-SHA256(key, check_string))` over
//! every field except `hash`.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{check_string, hmac_sha256, verify_hex_signature};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;

const SIGNATURE_FIELD: &str = "hash";
const WEB_APP_KEY: &[u8] = b"WebAppData";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_premium: Option<bool>,
}

/// A verified Login Widget callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramLogin {
    pub user: TelegramUser,
    pub auth_date: i64,
}

/// Verified Mini-App launch data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiniAppInitData {
    pub user: TelegramUser,
    pub auth_date: i64,
    pub query_id: Option<String>,
    pub start_param: Option<String>,
    pub chat_type: Option<String>,
    pub chat_instance: Option<String>,
}

#[derive(Clone)]
pub struct TelegramValidator {
    bot_token: SecretString,
    max_age_seconds: i64,
    future_tolerance_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TelegramValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramValidator")
            .field("max_age_seconds", &self.max_age_seconds)
            .field("future_tolerance_seconds", &self.future_tolerance_seconds)
            .finish_non_exhaustive()
    }
}

impl TelegramValidator {
    #[must_use]
    pub fn new(
        bot_token: SecretString,
        max_age_seconds: i64,
        future_tolerance_seconds: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bot_token,
            max_age_seconds,
            future_tolerance_seconds,
            clock,
        }
    }

    /// `None` when no bot token is configured.
    #[must_use]
    pub fn from_config(config: &EngineConfig, clock: Arc<dyn Clock>) -> Option<Self> {
        config.telegram_bot_token().map(|token| {
            Self::new(
                token.clone(),
                config.telegram_max_age_seconds(),
                config.miniapp_future_tolerance_seconds(),
                clock,
            )
        })
    }

    /// Verify a Login Widget callback given as flat fields.
    ///
    /// # Errors
    /// `Error::ExternalSignatureInvalid` for a missing field or bad signature,
    /// `Error::ExternalAuthExpired` when `auth_date` is older than the max age.
    pub fn validate_login_widget(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<TelegramLogin, Error> {
        let signature = required(fields, SIGNATURE_FIELD)?;
        let key = Sha256::digest(self.bot_token.expose_secret().as_bytes());
        let data = check_string(
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            SIGNATURE_FIELD,
        );
        if !verify_hex_signature(&hmac_sha256(&key, data.as_bytes()), signature) {
            warn!("Telegram login widget signature mismatch");
            return Err(Error::ExternalSignatureInvalid);
        }

        let auth_date = parse_auth_date(required(fields, "auth_date")?)?;
        self.check_age(auth_date, None)?;

        let user = TelegramUser {
            id: required(fields, "id")?
                .parse()
                .map_err(|_| Error::ExternalSignatureInvalid)?,
            first_name: required(fields, "first_name")?.to_string(),
            last_name: fields.get("last_name").cloned(),
            username: fields.get("username").cloned(),
            photo_url: fields.get("photo_url").cloned(),
            language_code: None,
            is_premium: None,
        };
        debug!(telegram_id = user.id, "Telegram login widget verified");
        Ok(TelegramLogin { user, auth_date })
    }

    /// Verify a Mini-App `initData` query string.
    ///
    /// # Errors
    /// `Error::ExternalSignatureInvalid` for malformed input, a missing field
    /// or a bad signature, `Error::ExternalAuthExpired` when `auth_date` is
    /// too old or too far in the future.
    pub fn validate_mini_app(&self, init_data: &str) -> Result<MiniAppInitData, Error> {
        let mut fields = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(init_data.as_bytes()) {
            if fields.insert(key.into_owned(), value.into_owned()).is_some() {
                warn!("Telegram initData has a repeated field");
                return Err(Error::ExternalSignatureInvalid);
            }
        }

        let signature = required(&fields, SIGNATURE_FIELD)?;
        let key = hmac_sha256(WEB_APP_KEY, self.bot_token.expose_secret().as_bytes());
        let data = check_string(
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            SIGNATURE_FIELD,
        );
        if !verify_hex_signature(&hmac_sha256(&key, data.as_bytes()), signature) {
            warn!("Telegram initData signature mismatch");
            return Err(Error::ExternalSignatureInvalid);
        }

        let auth_date = parse_auth_date(required(&fields, "auth_date")?)?;
        self.check_age(auth_date, Some(self.future_tolerance_seconds))?;

        let user: TelegramUser = serde_json::from_str(required(&fields, "user")?).map_err(|err| {
            warn!("Telegram initData user is not valid JSON: {err}");
            Error::ExternalSignatureInvalid
        })?;
        debug!(telegram_id = user.id, "Telegram initData verified");

        Ok(MiniAppInitData {
            user,
            auth_date,
            query_id: fields.get("query_id").cloned(),
            start_param: fields.get("start_param").cloned(),
            chat_type: fields.get("chat_type").cloned(),
            chat_instance: fields.get("chat_instance").cloned(),
        })
    }

    fn check_age(&self, auth_date: i64, future_tolerance: Option<i64>) -> Result<(), Error> {
        let now = self.clock.now_unix();
        if now.saturating_sub(auth_date) > self.max_age_seconds {
            debug!(auth_date, now, "Telegram auth_date outside replay window");
            return Err(Error::ExternalAuthExpired);
        }
        if let Some(tolerance) = future_tolerance {
            if auth_date.saturating_sub(now) > tolerance {
                warn!(auth_date, now, "Telegram auth_date is in the future");
                return Err(Error::ExternalAuthExpired);
            }
        }
        Ok(())
    }
}

fn required<'a>(fields: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str, Error> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(Error::ExternalSignatureInvalid)
}

fn parse_auth_date(value: &str) -> Result<i64, Error> {
    value.parse().map_err(|_| Error::ExternalSignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const BOT_TOKEN: &str = "123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11";
    const NOW: i64 = 1_700_000_000;
    const MAX_AGE: i64 = 86_400;
    const TOLERANCE: i64 = 300;

    fn validator() -> (TelegramValidator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let validator = TelegramValidator::new(
            SecretString::from(BOT_TOKEN.to_string()),
            MAX_AGE,
            TOLERANCE,
            clock.clone(),
        );
        (validator, clock)
    }

    fn sign_widget(mut fields: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let key = Sha256::digest(BOT_TOKEN.as_bytes());
        let data = check_string(
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            SIGNATURE_FIELD,
        );
        fields.insert("hash".into(), hex::encode(hmac_sha256(&key, data.as_bytes())));
        fields
    }

    fn widget_fields(auth_date: i64) -> BTreeMap<String, String> {
        sign_widget(BTreeMap::from([
            ("id".to_string(), "99887766".to_string()),
            ("first_name".to_string(), "Ada".to_string()),
            ("username".to_string(), "ada_l".to_string()),
            ("auth_date".to_string(), auth_date.to_string()),
        ]))
    }

    fn sign_init_data(pairs: &[(&str, &str)]) -> String {
        let key = hmac_sha256(WEB_APP_KEY, BOT_TOKEN.as_bytes());
        let data = check_string(pairs.iter().copied(), SIGNATURE_FIELD);
        let hash = hex::encode(hmac_sha256(&key, data.as_bytes()));
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k, v);
        }
        serializer.append_pair("hash", &hash);
        serializer.finish()
    }

    fn init_data(auth_date: i64) -> String {
        let auth_date = auth_date.to_string();
        sign_init_data(&[
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            (
                "user",
                r#"{"id":279058397,"first_name":"Vlad","last_name":"K","username":"vdkfrost","language_code":"en","is_premium":true}"#,
            ),
            ("auth_date", auth_date.as_str()),
            ("start_param", "ref_42"),
        ])
    }

    #[test]
    fn widget_accepts_valid_payload() -> anyhow::Result<()> {
        let (validator, _) = validator();
        let login = validator.validate_login_widget(&widget_fields(NOW - 10))?;
        assert_eq!(login.user.id, 99_887_766);
        assert_eq!(login.user.first_name, "Ada");
        assert_eq!(login.user.username.as_deref(), Some("ada_l"));
        assert_eq!(login.auth_date, NOW - 10);
        Ok(())
    }

    #[test]
    fn widget_is_deterministic() {
        let (validator, _) = validator();
        let fields = widget_fields(NOW);
        let first = validator.validate_login_widget(&fields);
        for _ in 0..3 {
            assert_eq!(validator.validate_login_widget(&fields), first);
        }
    }

    #[test]
    fn widget_rejects_any_flipped_bit() {
        let (validator, _) = validator();
        let fields = widget_fields(NOW);
        for name in fields.keys() {
            let original = fields[name].clone();
            for index in 0..original.len() {
                for bit in 0..7 {
                    let mut bytes = original.clone().into_bytes();
                    bytes[index] ^= 1 << bit;
                    let Ok(mutated) = String::from_utf8(bytes) else {
                        continue;
                    };
                    let mut tampered = fields.clone();
                    tampered.insert(name.clone(), mutated);
                    assert!(
                        validator.validate_login_widget(&tampered).is_err(),
                        "accepted flip in {name}[{index}] bit {bit}"
                    );
                }
            }
        }
    }

    #[test]
    fn widget_rejects_missing_fields() {
        let (validator, _) = validator();
        for name in ["hash", "auth_date", "id", "first_name"] {
            let mut fields = widget_fields(NOW);
            fields.remove(name);
            let fields = if name == "hash" { fields } else { sign_widget(fields) };
            assert_eq!(
                validator.validate_login_widget(&fields),
                Err(Error::ExternalSignatureInvalid),
                "{name}"
            );
        }
    }

    #[test]
    fn widget_replay_window() {
        let (validator, _) = validator();
        assert!(
            validator
                .validate_login_widget(&widget_fields(NOW - MAX_AGE + 1))
                .is_ok()
        );
        assert!(
            validator
                .validate_login_widget(&widget_fields(NOW - MAX_AGE))
                .is_ok()
        );
        assert_eq!(
            validator.validate_login_widget(&widget_fields(NOW - MAX_AGE - 1)),
            Err(Error::ExternalAuthExpired)
        );
    }

    #[test]
    fn widget_with_other_bot_token_is_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let other = TelegramValidator::new(
            SecretString::from("654321:other".to_string()),
            MAX_AGE,
            TOLERANCE,
            clock,
        );
        assert_eq!(
            other.validate_login_widget(&widget_fields(NOW)),
            Err(Error::ExternalSignatureInvalid)
        );
    }

    #[test]
    fn mini_app_accepts_valid_init_data() -> anyhow::Result<()> {
        let (validator, _) = validator();
        let data = validator.validate_mini_app(&init_data(NOW - 60))?;
        assert_eq!(data.user.id, 279_058_397);
        assert_eq!(data.user.is_premium, Some(true));
        assert_eq!(data.user.language_code.as_deref(), Some("en"));
        assert_eq!(data.query_id.as_deref(), Some("AAHdF6IQAAAAAN0XohDhrOrc"));
        assert_eq!(data.start_param.as_deref(), Some("ref_42"));
        assert_eq!(data.chat_type, None);
        Ok(())
    }

    #[test]
    fn mini_app_time_window() {
        let (validator, _) = validator();
        assert!(validator.validate_mini_app(&init_data(NOW - MAX_AGE + 1)).is_ok());
        assert_eq!(
            validator.validate_mini_app(&init_data(NOW - MAX_AGE - 1)),
            Err(Error::ExternalAuthExpired)
        );
        assert!(validator.validate_mini_app(&init_data(NOW + TOLERANCE)).is_ok());
        assert_eq!(
            validator.validate_mini_app(&init_data(NOW + TOLERANCE + 1)),
            Err(Error::ExternalAuthExpired)
        );
    }

    #[test]
    fn mini_app_rejects_widget_key() {
        let (validator, _) = validator();
        // Same fields signed with the Login Widget key must not pass.
        let fields = widget_fields(NOW);
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &fields {
            serializer.append_pair(k, v);
        }
        assert_eq!(
            validator.validate_mini_app(&serializer.finish()),
            Err(Error::ExternalSignatureInvalid)
        );
    }

    #[test]
    fn mini_app_rejects_tampering_and_garbage() {
        let (validator, _) = validator();
        let data = init_data(NOW);
        let tampered = data.replace("ref_42", "ref_43");
        assert_eq!(
            validator.validate_mini_app(&tampered),
            Err(Error::ExternalSignatureInvalid)
        );
        assert_eq!(
            validator.validate_mini_app(""),
            Err(Error::ExternalSignatureInvalid)
        );
        assert_eq!(
            validator.validate_mini_app(&format!("{data}&auth_date=1")),
            Err(Error::ExternalSignatureInvalid)
        );
    }

    #[test]
    fn mini_app_requires_user_json() {
        let (validator, _) = validator();
        let auth_date = NOW.to_string();
        let data = sign_init_data(&[("auth_date", auth_date.as_str()), ("user", "not json")]);
        assert_eq!(
            validator.validate_mini_app(&data),
            Err(Error::ExternalSignatureInvalid)
        );
        let data = sign_init_data(&[("auth_date", auth_date.as_str())]);
        assert_eq!(
            validator.validate_mini_app(&data),
            Err(Error::ExternalSignatureInvalid)
        );
    }
}
