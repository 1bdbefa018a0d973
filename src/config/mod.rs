//! Configuration module for the publisher.
//!
//! Handles loading and validation of Telegram API credentials,
//! the default destination chat, and publisher timeouts.

mod settings;

pub use settings::{
    AppConfig, ConfigError, Credentials, MIN_CODE_COOLDOWN_SECS, PublisherSettings, mask_phone,
    normalize_phone, parse_api_id,
};
