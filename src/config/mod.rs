//! Configuration management for the voice client
//!
//! Layers, lowest priority first: built-in defaults, the TOML file,
//! `DATTIVOX_*` environment variables, then explicit CLI overrides.

pub mod file;

use std::time::Duration;

use url::Url;

use self::file::VoiceConfigFile;
use crate::{Error, Result};

/// Default duplex endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8765/voice";

/// Default language tag
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default connection-established acknowledgment
pub const DEFAULT_CONTROL_SENTINEL: &str = "connected";

/// Wire sample rate (16kHz mono)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame (~256ms at 16kHz)
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// RMS level that counts as the user speaking
pub const DEFAULT_INTERRUPT_THRESHOLD: f32 = 0.01;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);
const MIN_SETTLE_DELAY: Duration = Duration::from_millis(300);
const MAX_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Query parameter carrying the language tag
const LANGUAGE_PARAM: &str = "lang";

/// Voice client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection and lifecycle settings
    pub session: SessionConfig,

    /// Capture and playback settings
    pub audio: AudioConfig,
}

/// Connection and lifecycle settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Duplex endpoint, without the language parameter
    pub endpoint: Url,

    /// Language tag forwarded to the remote side
    pub language: String,

    /// How long a connection may stay in `Connecting`
    pub handshake_timeout: Duration,

    /// Pause between teardown and reconnect on restart
    pub settle_delay: Duration,

    /// Text message acknowledging the connection
    pub control_sentinel: String,
}

/// Capture and playback settings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Wire sample rate in Hz, both directions
    pub sample_rate: u32,

    /// Samples per outbound frame
    pub frame_samples: usize,

    /// RMS level above which bot playback is interrupted
    pub interrupt_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
                language: DEFAULT_LANGUAGE.to_string(),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
                settle_delay: DEFAULT_SETTLE_DELAY,
                control_sentinel: DEFAULT_CONTROL_SENTINEL.to_string(),
            },
            audio: AudioConfig {
                sample_rate: DEFAULT_SAMPLE_RATE,
                frame_samples: DEFAULT_FRAME_SAMPLES,
                interrupt_threshold: DEFAULT_INTERRUPT_THRESHOLD,
            },
        }
    }
}

impl Config {
    /// Load configuration from the standard file path and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        let file = file::load_config_file();
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources<F>(file: VoiceConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // File overlay
        if let Some(endpoint) = file.session.endpoint {
            config.session.endpoint = Url::parse(&endpoint)?;
        }
        if let Some(language) = file.session.language {
            config.session.language = language;
        }
        if let Some(ms) = file.session.handshake_timeout_ms {
            config.session.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.session.settle_delay_ms {
            config.session.settle_delay = Duration::from_millis(ms);
        }
        if let Some(sentinel) = file.session.control_sentinel {
            config.session.control_sentinel = sentinel;
        }
        if let Some(rate) = file.audio.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(samples) = file.audio.frame_samples {
            config.audio.frame_samples = samples;
        }
        if let Some(threshold) = file.audio.interrupt_threshold {
            config.audio.interrupt_threshold = threshold;
        }

        // Environment overlay
        if let Some(endpoint) = env("DATTIVOX_ENDPOINT") {
            config.session.endpoint = Url::parse(&endpoint)?;
        }
        if let Some(language) = env("DATTIVOX_LANGUAGE") {
            config.session.language = language;
        }
        if let Some(ms) = env("DATTIVOX_HANDSHAKE_TIMEOUT_MS") {
            config.session.handshake_timeout =
                Duration::from_millis(parse_env("DATTIVOX_HANDSHAKE_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = env("DATTIVOX_SETTLE_DELAY_MS") {
            config.session.settle_delay =
                Duration::from_millis(parse_env("DATTIVOX_SETTLE_DELAY_MS", &ms)?);
        }
        if let Some(sentinel) = env("DATTIVOX_CONTROL_SENTINEL") {
            config.session.control_sentinel = sentinel;
        }
        if let Some(threshold) = env("DATTIVOX_INTERRUPT_THRESHOLD") {
            config.audio.interrupt_threshold =
                parse_env("DATTIVOX_INTERRUPT_THRESHOLD", &threshold)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides on top of the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if an override is invalid
    pub fn with_overrides(mut self, endpoint: Option<&str>, language: Option<&str>) -> Result<Self> {
        if let Some(endpoint) = endpoint {
            self.session.endpoint = Url::parse(endpoint)?;
        }
        if let Some(language) = language {
            self.session.language = language.to_string();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants and normalize the settle delay into its allowed window
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid field
    pub fn validate(&mut self) -> Result<()> {
        match self.session.endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::Config(format!(
                    "endpoint must use ws:// or wss://, got {other}://"
                )));
            }
        }

        if !is_valid_language_tag(&self.session.language) {
            return Err(Error::Config(format!(
                "invalid language tag: {:?}",
                self.session.language
            )));
        }

        if self.session.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake timeout must be non-zero".to_string()));
        }

        if self.session.control_sentinel.is_empty() {
            return Err(Error::Config("control sentinel must not be empty".to_string()));
        }

        let clamped = self.session.settle_delay.clamp(MIN_SETTLE_DELAY, MAX_SETTLE_DELAY);
        if clamped != self.session.settle_delay {
            tracing::warn!(
                requested_ms = self.session.settle_delay.as_millis(),
                clamped_ms = clamped.as_millis(),
                "settle delay outside allowed window"
            );
            self.session.settle_delay = clamped;
        }

        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be non-zero".to_string()));
        }

        if self.audio.frame_samples == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }

        let threshold = self.audio.interrupt_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(Error::Config(format!(
                "interrupt threshold must be in (0, 1), got {threshold}"
            )));
        }

        Ok(())
    }

    /// Endpoint URL with the language tag attached as a query parameter
    #[must_use]
    pub fn connection_url(&self) -> Url {
        with_language(&self.session.endpoint, &self.session.language)
    }
}

/// Attach `lang=<tag>` to an endpoint, replacing any existing language pair
#[must_use]
pub fn with_language(endpoint: &Url, language: &str) -> Url {
    let kept: Vec<(String, String)> = endpoint
        .query_pairs()
        .filter(|(k, _)| k != LANGUAGE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(LANGUAGE_PARAM, language);
    url
}

/// Loose BCP-47 check: alphanumeric subtags of 1-8 chars, first subtag 2-8 letters
#[must_use]
pub fn is_valid_language_tag(tag: &str) -> bool {
    let mut subtags = tag.split('-');

    let Some(primary) = subtags.next() else {
        return false;
    };
    if !(2..=8).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }

    subtags.all(|s| (1..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has invalid value {value:?}")))
}
