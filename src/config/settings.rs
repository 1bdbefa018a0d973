//! Credentials, publisher settings and file/environment configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lower bound for the interval between two login code requests.
pub const MIN_CODE_COOLDOWN_SECS: u64 = 10;

/// Telegram API credentials for one user account.
///
/// Constructed only through [`Credentials::new`] or [`Credentials::parse`], so
/// a value of this type always carries an integer API ID and a `+`-prefixed phone.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    api_id: i32,
    #[serde(skip_serializing)]
    api_hash: String,
    phone: String,
}

impl Credentials {
    /// Creates validated credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the API ID is not positive, the API hash is not a
    /// 32 character alphanumeric string, or the phone number is malformed.
    pub fn new(api_id: i32, api_hash: &str, phone: &str) -> Result<Self, ConfigError> {
        if api_id <= 0 {
            return Err(ConfigError::InvalidApiId(api_id.to_string()));
        }

        let api_hash = api_hash.trim();
        if api_hash.len() != 32 || !api_hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidApiHash);
        }

        Ok(Self {
            api_id,
            api_hash: api_hash.to_owned(),
            phone: normalize_phone(phone)?,
        })
    }

    /// Creates credentials from textual input, coercing the API ID to an integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidApiId`] for a non-numeric API ID, or any
    /// error [`Credentials::new`] returns.
    pub fn parse(api_id: &str, api_hash: &str, phone: &str) -> Result<Self, ConfigError> {
        Self::new(parse_api_id(api_id)?, api_hash, phone)
    }

    pub fn api_id(&self) -> i32 {
        self.api_id
    }

    pub fn api_hash(&self) -> &str {
        &self.api_hash
    }

    /// Phone number in `+<digits>` form.
    pub fn phone(&self) -> &str {
        &self.phone
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("phone", &mask_phone(&self.phone))
            .finish()
    }
}

/// Parses an API ID given as text.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidApiId`] if the value is not a positive 32-bit integer.
pub fn parse_api_id(raw: &str) -> Result<i32, ConfigError> {
    let trimmed = raw.trim();
    match trimmed.parse::<i32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ConfigError::InvalidApiId(trimmed.to_owned())),
    }
}

/// Normalizes a phone number to `+<digits>`.
///
/// Spaces, dashes, dots and parentheses are dropped; a missing `+` is added.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPhone`] if anything other than 5 to 15 digits remains.
pub fn normalize_phone(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let digits: String = body
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if !(5..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidPhone(trimmed.to_owned()));
    }

    Ok(format!("+{digits}"))
}

/// Masks a phone number for logging (shows last 4 digits).
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// API ID as found in a config file: older files store it as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawApiId {
    Number(i64),
    Text(String),
}

impl RawApiId {
    fn coerce(&self) -> Result<i32, ConfigError> {
        match self {
            Self::Number(n) => i32::try_from(*n)
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| ConfigError::InvalidApiId(n.to_string())),
            Self::Text(s) => parse_api_id(s),
        }
    }
}

/// On-disk configuration file. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default, alias = "telegram_api_id")]
    api_id: Option<RawApiId>,

    #[serde(default, alias = "telegram_api_hash")]
    api_hash: Option<String>,

    #[serde(default, alias = "telegram_phone")]
    phone: Option<String>,

    #[serde(default, alias = "telegram_group_id")]
    destination: Option<String>,

    #[serde(default)]
    session_store: Option<PathBuf>,
}

fn default_session_store() -> PathBuf {
    PathBuf::from("telegram_sessions.json")
}

/// Application configuration: who to log in as and where to publish.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Account credentials.
    pub credentials: Credentials,

    /// Default destination chat (username or numeric id).
    pub destination: Option<String>,

    /// Path of the phone-keyed session JSON file.
    pub session_store_path: PathBuf,
}

impl AppConfig {
    /// Loads configuration from an optional JSON file, then lets environment
    /// variables override individual fields.
    ///
    /// Recognized variables: `TG_API_ID`, `TG_API_HASH`, `TG_PHONE`,
    /// `TG_DESTINATION`, `TG_SESSION_STORE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, a required value is
    /// missing, or the credentials are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit variable lookup.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if path.exists() => {
                debug!("Reading configuration from {}", path.display());
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str::<FileConfig>(&content)?
            }
            _ => FileConfig::default(),
        };

        let var = |key: &str| env(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());

        let api_id = match var("TG_API_ID") {
            Some(raw) => parse_api_id(&raw)?,
            None => match file.api_id {
                Some(RawApiId::Text(ref s)) if s.trim().is_empty() => {
                    return Err(ConfigError::MissingValue("api_id"));
                }
                Some(raw) => raw.coerce()?,
                None => return Err(ConfigError::MissingValue("api_id")),
            },
        };

        let api_hash = var("TG_API_HASH")
            .or_else(|| non_blank(file.api_hash))
            .ok_or(ConfigError::MissingValue("api_hash"))?;

        let phone = var("TG_PHONE")
            .or_else(|| non_blank(file.phone))
            .ok_or(ConfigError::MissingValue("phone"))?;

        let destination = var("TG_DESTINATION").or_else(|| non_blank(file.destination));

        let session_store_path = var("TG_SESSION_STORE")
            .map(PathBuf::from)
            .or(file.session_store)
            .unwrap_or_else(default_session_store);

        Ok(Self {
            credentials: Credentials::new(api_id, &api_hash, &phone)?,
            destination,
            session_store_path,
        })
    }
}

impl AppConfig {
    /// Directory for the client library's per-account session files, next to
    /// the session store.
    pub fn session_dir(&self) -> PathBuf {
        self.session_store_path
            .parent()
            .map_or_else(|| PathBuf::from("sessions"), |dir| dir.join("sessions"))
    }
}

/// Timeouts and pacing for the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Timeout for ordinary calls (connect, auth, probe).
    pub call_timeout: Duration,

    /// Timeout for publish calls that may include story uploads.
    pub story_timeout: Duration,

    /// How long QR login waits for the code to be scanned.
    pub qr_timeout: Duration,

    /// Minimum interval between login code requests.
    pub code_cooldown: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            story_timeout: Duration::from_secs(90),
            qr_timeout: Duration::from_secs(120),
            code_cooldown: Duration::from_secs(MIN_CODE_COOLDOWN_SECS),
        }
    }
}

impl PublisherSettings {
    /// Creates settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            env(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map_or(fallback, Duration::from_secs)
        };

        Self {
            call_timeout: secs("TG_CALL_TIMEOUT", defaults.call_timeout),
            story_timeout: secs("TG_STORY_TIMEOUT", defaults.story_timeout),
            qr_timeout: secs("TG_QR_TIMEOUT", defaults.qr_timeout),
            code_cooldown: secs("TG_CODE_COOLDOWN", defaults.code_cooldown)
                .max(Duration::from_secs(MIN_CODE_COOLDOWN_SECS)),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    MissingValue(&'static str),

    #[error("Invalid API ID {0:?} (must be a positive integer)")]
    InvalidApiId(String),

    #[error("Invalid API hash (expected 32 alphanumeric characters)")]
    InvalidApiHash,

    #[error("Invalid phone number {0:?} (expected 5-15 digits, optionally prefixed with +)")]
    InvalidPhone(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_api_id_string_is_coerced() {
        let creds = Credentials::parse("123456", HASH, "+15551234567").unwrap();
        assert_eq!(creds.api_id(), 123_456);
    }

    #[test]
    fn test_non_numeric_api_id_rejected() {
        let err = Credentials::parse("abc", HASH, "+15551234567").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiId(ref v) if v == "abc"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_phone_normalized() {
        assert_eq!(normalize_phone("15551234567").unwrap(), "+15551234567");
        assert_eq!(normalize_phone(" +7 (999) 123-45-67 ").unwrap(), "+79991234567");
        assert!(normalize_phone("+1-abc").is_err());
        assert!(normalize_phone("12").is_err());
    }

    #[test]
    fn test_invalid_api_hash() {
        assert!(matches!(
            Credentials::new(1, "short", "+15551234567"),
            Err(ConfigError::InvalidApiHash)
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new(42, HASH, "+15551234567").unwrap();
        let printed = format!("{creds:?}");
        assert!(!printed.contains(HASH));
        assert!(printed.contains("***4567"));
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
    }

    #[test]
    fn test_load_file_with_string_api_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"telegram_api_id": "123456", "telegram_api_hash": "{HASH}",
                    "telegram_phone": "15551234567", "telegram_group_id": "@news",
                    "openai_api_key": "ignored"}}"#
            ),
        )
        .unwrap();

        let config = AppConfig::load_with(Some(&path), lookup(&[])).unwrap();
        assert_eq!(config.credentials.api_id(), 123_456);
        assert_eq!(config.credentials.phone(), "+15551234567");
        assert_eq!(config.destination.as_deref(), Some("@news"));
        assert_eq!(config.session_store_path, PathBuf::from("telegram_sessions.json"));
    }

    #[test]
    fn test_load_file_with_numeric_api_id_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            format!(r#"{{"api_id": 111, "api_hash": "{HASH}", "phone": "+15550000000"}}"#),
        )
        .unwrap();

        let config = AppConfig::load_with(
            Some(&path),
            lookup(&[("TG_API_ID", "222"), ("TG_DESTINATION", "-1001234")]),
        )
        .unwrap();
        assert_eq!(config.credentials.api_id(), 222);
        assert_eq!(config.destination.as_deref(), Some("-1001234"));
    }

    #[test]
    fn test_load_rejects_bad_api_id_from_env() {
        let err = AppConfig::load_with(
            None,
            lookup(&[("TG_API_ID", "abc"), ("TG_API_HASH", HASH), ("TG_PHONE", "+15550000000")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiId(_)));
    }

    #[test]
    fn test_load_reports_missing_value() {
        let err = AppConfig::load_with(None, lookup(&[("TG_API_ID", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("api_hash")));
    }

    #[test]
    fn test_settings_defaults_and_cooldown_floor() {
        let settings = PublisherSettings::from_lookup(lookup(&[("TG_CODE_COOLDOWN", "3")]));
        assert_eq!(settings.code_cooldown, Duration::from_secs(10));
        assert_eq!(settings.call_timeout, Duration::from_secs(30));

        let settings = PublisherSettings::from_lookup(lookup(&[("TG_STORY_TIMEOUT", "45")]));
        assert_eq!(settings.story_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_session_dir_next_to_store() {
        let env = [("TG_API_ID", "1"), ("TG_API_HASH", HASH), ("TG_PHONE", "+15550000000")];
        let config = AppConfig::load_with(None, lookup(&env)).unwrap();
        assert_eq!(config.session_dir(), PathBuf::from("sessions"));

        let config = AppConfig::load_with(
            None,
            lookup(&[
                ("TG_API_ID", "1"),
                ("TG_API_HASH", HASH),
                ("TG_PHONE", "+15550000000"),
                ("TG_SESSION_STORE", "/var/lib/pub/sessions.json"),
            ]),
        )
        .unwrap();
        assert_eq!(config.session_dir(), PathBuf::from("/var/lib/pub/sessions"));
    }
}
