//! TOML configuration file loading
//!
//! Supports `~/.config/dattivox/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceConfigFile {
    /// Connection and lifecycle settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Capture and playback settings
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Session-related configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFileConfig {
    /// Duplex endpoint (e.g. "wss://voice.dattivox.com/stream")
    pub endpoint: Option<String>,

    /// Language tag sent as the `lang` query parameter
    pub language: Option<String>,

    /// Handshake bound in milliseconds
    pub handshake_timeout_ms: Option<u64>,

    /// Teardown settle delay in milliseconds
    pub settle_delay_ms: Option<u64>,

    /// Connection-established acknowledgment literal
    pub control_sentinel: Option<String>,
}

/// Audio-related configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioFileConfig {
    /// Wire sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Samples per outbound frame
    pub frame_samples: Option<usize>,

    /// RMS level above which playback is interrupted
    pub interrupt_threshold: Option<f32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match read_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `Toml` if it does not parse
pub fn read_config(path: &Path) -> Result<VoiceConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/dattivox/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("dattivox").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::Error;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_from(&dir.path().join("absent.toml"));
        assert!(file.session.endpoint.is_none());
        assert!(file.audio.frame_samples.is_none());
    }

    #[test]
    fn partial_file_overlays() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            "[session]\nlanguage = \"de\"\nsettle_delay_ms = 300\n\n[audio]\ninterrupt_threshold = 0.02"
        )
        .unwrap();

        let file = load_from(tmp.path());
        assert_eq!(file.session.language.as_deref(), Some("de"));
        assert_eq!(file.session.settle_delay_ms, Some(300));
        assert!(file.session.endpoint.is_none());
        assert_eq!(file.audio.interrupt_threshold, Some(0.02));
    }

    #[test]
    fn unparsable_file_falls_back() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[session\nlanguage = ").unwrap();

        let file = load_from(tmp.path());
        assert!(file.session.language.is_none());
    }

    #[test]
    fn read_errors_keep_their_cause() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[audio]\nsample_rate = \"fast\"").unwrap();
        assert!(matches!(read_config(tmp.path()), Err(Error::Toml(_))));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_config(dir.path()), Err(Error::Io(_))));
    }
}
