//! Story Publisher Library
//!
//! Session-backed Telegram user account access for publishing posts and
//! stories.
//!
//! This crate provides:
//! - Credential and configuration loading
//! - A phone-keyed session store
//! - A login state machine (code and QR login) over an `MTProto` client
//! - Publishing with story fallbacks and capability probing
//! - A blocking facade with timeouts for synchronous callers

pub mod bridge;
pub mod config;
pub mod publish;
pub mod session;
pub mod telegram;
