//! Client-held sessions.
//!
//! The whole session travels in one cookie: JSON with short field names, base64url encoded, and
//! optionally followed by `.<tag>` where the tag is an HMAC-SHA256 over the encoded payload.

use std::fmt;

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::{Configuration, SessionSecret};
use crate::error::AuthError;
use crate::id::IdGenerator;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";
/// Cookie validity window.
pub const SESSION_TTL_DAYS: i64 = 365;
/// Largest accepted user stylesheet, in bytes.
pub const MAX_USER_CSS: usize = 1 << 20;
/// Allowed notification refresh intervals, in seconds. Zero disables refresh.
pub const NOTIFICATION_INTERVALS: [u32; 6] = [0, 30, 60, 120, 300, 600];
/// Accepted default post visibilities.
pub const VISIBILITIES: [&str; 4] = ["public", "unlisted", "private", "direct"];

const RANDOM_CSRF_BYTES: usize = 16;

// Cookies written by older releases carry `=` padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

type HmacSha256 = Hmac<Sha256>;

/// Per-user display preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "dv")]
    pub default_visibility: String,
    #[serde(rename = "df", skip_serializing_if = "String::is_empty")]
    pub default_format: String,
    #[serde(rename = "cs")]
    pub copy_scope: bool,
    #[serde(rename = "tnt")]
    pub thread_in_new_tab: bool,
    #[serde(rename = "ha")]
    pub hide_attachments: bool,
    #[serde(rename = "mn")]
    pub mask_nsfw: bool,
    /// Seconds between notification refreshes, one of [`NOTIFICATION_INTERVALS`].
    #[serde(rename = "ni")]
    pub notification_interval: u32,
    #[serde(rename = "fm")]
    pub fluoride_mode: bool,
    #[serde(rename = "dm")]
    pub dark_mode: bool,
    #[serde(rename = "adm")]
    pub anti_dopamine_mode: bool,
    #[serde(rename = "hun")]
    pub hide_unsupported_notifs: bool,
    #[serde(rename = "css", skip_serializing_if = "String::is_empty")]
    pub css: String,
    /// Cache-busting value for the user stylesheet URL.
    #[serde(rename = "stamp", skip_serializing_if = "String::is_empty")]
    pub stamp: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_visibility: "public".to_string(),
            default_format: String::new(),
            copy_scope: true,
            thread_in_new_tab: false,
            hide_attachments: false,
            mask_nsfw: true,
            notification_interval: 0,
            fluoride_mode: false,
            dark_mode: false,
            anti_dopamine_mode: false,
            hide_unsupported_notifs: false,
            css: String::new(),
            stamp: String::new(),
        }
    }
}

/// Rejected settings update.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("stylesheet is {0} bytes; the limit is {MAX_USER_CSS}")]
    CssTooLarge(usize),
    #[error("unsupported notification interval {0}s")]
    NotificationInterval(u32),
    #[error("unsupported visibility `{0}`")]
    Visibility(String),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.css.len() > MAX_USER_CSS {
            return Err(SettingsError::CssTooLarge(self.css.len()));
        }
        if !NOTIFICATION_INTERVALS.contains(&self.notification_interval) {
            return Err(SettingsError::NotificationInterval(self.notification_interval));
        }
        if !VISIBILITIES.contains(&self.default_visibility.as_str()) {
            return Err(SettingsError::Visibility(self.default_visibility.clone()));
        }
        Ok(())
    }
}

/// Everything the server knows about a visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    #[serde(rename = "uid", skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Remote instance host, without scheme.
    #[serde(rename = "ins", skip_serializing_if = "String::is_empty")]
    pub instance: String,
    #[serde(rename = "cid", skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(rename = "cs", skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(rename = "at", skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(rename = "csrf", skip_serializing_if = "String::is_empty")]
    pub csrf_token: String,
    #[serde(rename = "sett")]
    pub settings: Settings,
}

impl Session {
    /// Session bound to a registered remote app but not yet signed in.
    pub fn new(
        instance: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        csrf_token: impl Into<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            csrf_token: csrf_token.into(),
            ..Self::default()
        }
    }

    /// Visitor with no cookie.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A session is signed in iff it holds an access token.
    pub fn is_logged_in(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Record the outcome of a successful OAuth exchange.
    pub fn sign_in(&mut self, user_id: impl Into<String>, access_token: impl Into<String>) {
        self.user_id = user_id.into();
        self.access_token = access_token.into();
    }

    /// Replace the settings bag and rotate its stamp.
    pub fn update_settings(&mut self, mut settings: Settings, ids: &IdGenerator) -> Result<(), SettingsError> {
        settings.validate()?;
        settings.stamp = ids.generate().to_base64();
        self.settings = settings;
        Ok(())
    }
}

/// Mint a CSRF token: a fresh ID followed by random bytes, base64url encoded.
pub fn new_csrf_token(ids: &IdGenerator) -> String {
    let mut buf = [0u8; 8 + RANDOM_CSRF_BYTES];
    buf[..8].copy_from_slice(&ids.generate().to_bytes());
    rand::rng().fill(&mut buf[8..]);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Converts sessions to and from cookie values.
#[derive(Clone, Default)]
pub struct SessionCodec {
    mac: Option<HmacSha256>,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec").field("signed", &self.is_signed()).finish()
    }
}

impl SessionCodec {
    /// Codec that trusts the cookie payload as-is.
    pub fn unsigned() -> Self {
        Self { mac: None }
    }

    /// Codec that tags every cookie and rejects cookies with a bad tag.
    pub fn signed(secret: &SessionSecret) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self { mac: Some(HmacSha256::new_from_slice(secret.expose())?) })
    }

    /// Signed when the configuration carries a `session_secret`.
    pub fn from_config(config: &Configuration) -> Result<Self, hmac::digest::InvalidLength> {
        match &config.session_secret {
            Some(secret) => Self::signed(secret),
            None => Ok(Self::unsigned()),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.mac.is_some()
    }

    fn tag(&self, mac: &HmacSha256, payload: &str) -> HmacSha256 {
        let mut mac = mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    /// Encode a session as a cookie value.
    pub fn encode(&self, session: &Session) -> Result<String, serde_json::Error> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(session)?);
        Ok(match &self.mac {
            Some(mac) => {
                let tag = self.tag(mac, &payload).finalize().into_bytes();
                format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag))
            }
            None => payload,
        })
    }

    /// Decode a cookie value. Any malformed, truncated, or mis-tagged input is `InvalidSession`.
    pub fn decode(&self, value: &str) -> Result<Session, AuthError> {
        let payload = match &self.mac {
            Some(mac) => {
                let (payload, tag) = value.rsplit_once('.').ok_or(AuthError::InvalidSession)?;
                let tag = LENIENT.decode(tag).map_err(|_| AuthError::InvalidSession)?;
                self.tag(mac, payload).verify_slice(&tag).map_err(|_| AuthError::InvalidSession)?;
                payload
            }
            None => value,
        };
        let json = LENIENT.decode(payload).map_err(|_| AuthError::InvalidSession)?;
        serde_json::from_slice(&json).map_err(|_| AuthError::InvalidSession)
    }

    /// Cookie carrying `session`, valid for [`SESSION_TTL_DAYS`].
    pub fn issue_cookie(&self, session: &Session, secure: bool) -> Result<Cookie<'static>, serde_json::Error> {
        Ok(Cookie::build((SESSION_COOKIE, self.encode(session)?))
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::days(SESSION_TTL_DAYS))
            .build())
    }

    /// Cookie that clears the session, expiring at the Unix epoch.
    pub fn expired_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .http_only(true)
            .path("/")
            .max_age(time::Duration::ZERO)
            .expires(time::OffsetDateTime::UNIX_EPOCH)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeIndex;

    fn secret() -> SessionSecret {
        SessionSecret::new("an-operator-chosen-secret-of-length-40!!").unwrap()
    }

    fn bound() -> Session {
        let mut s = Session::new("social.example", "cid", "csec", "tok3n");
        s.settings.css = "body { color: red }".into();
        s
    }

    #[test]
    fn compact_field_names() {
        let json = serde_json::to_string(&bound()).unwrap();
        assert!(json.contains("\"ins\":\"social.example\""));
        assert!(json.contains("\"csrf\":\"tok3n\""));
        assert!(!json.contains("\"at\""));
        assert!(json.contains("\"sett\":{"));
    }

    #[test]
    fn settings_false_flags_survive_decoding() {
        let mut s = bound();
        s.settings.copy_scope = false;
        s.settings.mask_nsfw = false;
        let codec = SessionCodec::unsigned();
        let back = codec.decode(&codec.encode(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn padded_cookies_decode() {
        let json = serde_json::to_vec(&bound()).unwrap();
        let padded = base64::engine::general_purpose::URL_SAFE.encode(json);
        assert_eq!(SessionCodec::unsigned().decode(&padded).unwrap(), bound());
    }

    #[test]
    fn signed_cookie_rejects_tampering() {
        let codec = SessionCodec::signed(&secret()).unwrap();
        let value = codec.encode(&bound()).unwrap();
        assert_eq!(codec.decode(&value).unwrap(), bound());

        let (payload, _) = value.rsplit_once('.').unwrap();
        assert_eq!(codec.decode(payload), Err(AuthError::InvalidSession));

        let mut forged = bound();
        forged.access_token = "stolen".into();
        let forged = SessionCodec::unsigned().encode(&forged).unwrap();
        let (_, tag) = value.rsplit_once('.').unwrap();
        assert_eq!(codec.decode(&format!("{forged}.{tag}")), Err(AuthError::InvalidSession));
    }

    #[test]
    fn unsigned_codec_rejects_signed_cookie() {
        let value = SessionCodec::signed(&secret()).unwrap().encode(&bound()).unwrap();
        assert_eq!(SessionCodec::unsigned().decode(&value), Err(AuthError::InvalidSession));
    }

    #[test]
    fn settings_validation() {
        let mut s = Settings::default();
        assert!(s.validate().is_ok());
        s.notification_interval = 45;
        assert_eq!(s.validate(), Err(SettingsError::NotificationInterval(45)));
        s.notification_interval = 60;
        s.css = "a".repeat(MAX_USER_CSS + 1);
        assert_eq!(s.validate(), Err(SettingsError::CssTooLarge(MAX_USER_CSS + 1)));
        s.css.clear();
        s.default_visibility = "everyone".into();
        assert!(matches!(s.validate(), Err(SettingsError::Visibility(_))));
    }

    #[test]
    fn settings_update_rotates_stamp_not_csrf() {
        let ids = IdGenerator::new(NodeIndex::default());
        let mut s = bound();
        s.update_settings(Settings { dark_mode: true, ..Settings::default() }, &ids).unwrap();
        let first = s.settings.stamp.clone();
        assert!(!first.is_empty());
        assert!(s.settings.dark_mode);
        s.update_settings(Settings::default(), &ids).unwrap();
        assert_ne!(s.settings.stamp, first);
        assert_eq!(s.csrf_token, "tok3n");
    }

    #[test]
    fn csrf_tokens_are_unique_and_carry_an_id() {
        let ids = IdGenerator::new(NodeIndex::new(4).unwrap());
        let a = new_csrf_token(&ids);
        let b = new_csrf_token(&ids);
        assert_ne!(a, b);
        let raw = URL_SAFE_NO_PAD.decode(&a).unwrap();
        assert_eq!(raw.len(), 24);
        let id = crate::id::Id::from(u64::from_le_bytes(raw[..8].try_into().unwrap()));
        assert_eq!(id.node(), 4);
    }

    #[test]
    fn cookies() {
        let cookie = SessionCodec::unsigned().issue_cookie(&bound(), true).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(365)));

        let gone = SessionCodec::expired_cookie();
        assert_eq!(gone.value(), "");
        assert_eq!(gone.max_age(), Some(time::Duration::ZERO));
        assert_eq!(gone.expires_datetime(), Some(time::OffsetDateTime::UNIX_EPOCH));
    }
}
