//! Story Publisher - Command Line Entry Point
//!
//! Logs a Telegram account in (code or QR), then publishes posts and stories
//! through it.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Input;
use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use story_publisher::bridge::Publisher;
use story_publisher::config::{AppConfig, PublisherSettings};
use story_publisher::publish::{PublishRequest, StoryMode};
use story_publisher::telegram::{QR_POLL_INTERVAL, QrPoll, TelegramError};

/// Publish posts and stories from a Telegram user account.
#[derive(Parser, Debug)]
#[command(name = "story_publisher")]
#[command(about = "Publish posts and stories from a Telegram user account")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether the account is logged in.
    Status,

    /// Log in with a code sent to the phone.
    Login,

    /// Finish a login with a code (non-interactive).
    Verify {
        code: String,
    },

    /// Log in by scanning a QR code from another device.
    QrLogin,

    /// Publish a post, optionally with stories.
    Publish {
        /// Destination chat; defaults to the configured one.
        #[arg(short, long)]
        destination: Option<String>,

        /// Post text.
        #[arg(short, long, default_value = "")]
        text: String,

        /// Read the post text from a file instead.
        #[arg(long, conflicts_with = "text")]
        text_file: Option<PathBuf>,

        /// Image to attach.
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Stories to publish: none, personal, channel or both.
        #[arg(short, long, default_value = "none")]
        story_mode: StoryMode,
    },

    /// Check whether a destination accepts stories.
    Probe {
        /// Destination chat; defaults to the configured one.
        destination: Option<String>,
    },

    /// Log out and delete the stored session.
    Logout,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let config = AppConfig::load(Some(&args.config)).context("Failed to load configuration")?;
    let settings = PublisherSettings::from_env_with_defaults();

    info!(
        "Using session store {} (call timeout {:?}, story timeout {:?})",
        config.session_store_path.display(),
        settings.call_timeout,
        settings.story_timeout
    );

    let publisher =
        Publisher::from_config(&config, settings).context("Failed to start the publisher")?;

    let result = run(&publisher, &config, args.command);
    publisher.disconnect();
    result
}

fn run(publisher: &Publisher, config: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Status => status(publisher),
        Command::Login => login(publisher),
        Command::Verify { code } => {
            let reply = publisher.verify_code(&code);
            print_json(&reply)?;
            if !reply.ok {
                bail!(reply.message);
            }
            Ok(())
        }
        Command::QrLogin => qr_login(publisher),
        Command::Publish {
            destination,
            text,
            text_file,
            image,
            story_mode,
        } => {
            let destination = destination_or_default(destination, config)?;
            let text = match text_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => text,
            };

            let mut request = PublishRequest::new(destination, text).with_story_mode(story_mode);
            if let Some(path) = image {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read image {}", path.display()))?;
                request = request.with_image(bytes);
            }

            match publisher.publish(&request) {
                Ok(result) => print_json(&result),
                Err(TelegramError::NotAuthorized) => {
                    bail!("Verification needed: run `story_publisher login` first")
                }
                Err(e) => Err(e).context("Publish failed"),
            }
        }
        Command::Probe { destination } => {
            let destination = destination_or_default(destination, config)?;
            print_json(&publisher.check_capability(&destination))
        }
        Command::Logout => {
            publisher.logout().context("Logout failed")?;
            println!("✓ Logged out and removed the stored session");
            Ok(())
        }
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn destination_or_default(destination: Option<String>, config: &AppConfig) -> Result<String> {
    destination
        .or_else(|| config.destination.clone())
        .context("No destination given and none configured (TG_DESTINATION)")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(publisher: &Publisher) -> Result<()> {
    if !publisher.is_authorized().context("Failed to check authorization")? {
        println!("Not logged in. Run `story_publisher login` or `story_publisher qr-login`.");
        return Ok(());
    }

    let account = publisher
        .account_info()
        .context("Failed to fetch account info")?;
    println!(
        "✓ Logged in as {} (id {}, {})",
        account.display_name(),
        account.id,
        if account.premium { "Premium" } else { "Free" }
    );
    Ok(())
}

/// Interactive code login.
fn login(publisher: &Publisher) -> Result<()> {
    let reply = publisher.request_code();
    if !reply.ok {
        if reply.error_kind == Some("rate_limited") {
            println!("Code requests are rate limited; `story_publisher qr-login` avoids the limit.");
        }
        bail!(reply.message);
    }
    println!("{}", reply.message);
    if reply.message == "Already authorized" {
        return Ok(());
    }

    loop {
        let code: String = Input::new()
            .with_prompt("Enter the login code")
            .interact_text()?;

        let reply = publisher.verify_code(&code);
        if reply.ok {
            println!("✓ {}", reply.message);
            return Ok(());
        }
        if reply.error_kind != Some("invalid_code") {
            bail!(reply.message);
        }
        println!("✗ {}", reply.message);
    }
}

/// QR code login; the code is redrawn whenever its token is replaced.
fn qr_login(publisher: &Publisher) -> Result<()> {
    let deadline = Instant::now() + publisher.settings().qr_timeout;
    let mut shown: Option<String> = None;

    loop {
        match publisher.poll_qr_login().context("QR login failed")? {
            QrPoll::Authorized(account) => {
                println!("✓ Logged in as {}", account.display_name());
                return Ok(());
            }
            QrPoll::Pending { url, .. } => {
                if shown.as_deref() != Some(url.as_str()) {
                    println!("Scan this code in Telegram: Settings → Devices → Link Desktop Device\n");
                    println!("{}", render_qr(&url)?);
                    shown = Some(url);
                }
            }
        }

        if Instant::now() >= deadline {
            bail!(TelegramError::QrTimedOut);
        }
        std::thread::sleep(QR_POLL_INTERVAL);
    }
}

fn render_qr(url: &str) -> Result<String> {
    let code = QrCode::new(url.as_bytes()).context("Failed to encode QR code")?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
