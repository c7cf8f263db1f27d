use std::path::PathBuf;
use std::time::Duration;

use crate::constants;
use crate::error::DiagramError;

/// Which diagram embedding the server should try to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RendererPreference {
    /// Specialized renderer when its bundle is available, generic markup otherwise.
    Auto,
    Specialized,
    Generic,
}

impl std::str::FromStr for RendererPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "specialized" => Ok(Self::Specialized),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown renderer '{}'", other)),
        }
    }
}

/// Runtime settings shared by every session.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Credential from `--api-key` or the environment. Requests may override it.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    /// Web sessions unused for this long are discarded.
    pub session_idle: Duration,
    pub renderer: RendererPreference,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: non_blank(Some(constants::GEMINI_API_KEY.as_str())),
            model: constants::GEMINI_MODEL.clone(),
            api_base: constants::GEMINI_API_BASE.clone(),
            timeout: Duration::from_secs(*constants::TIMEOUT_SECS),
            session_idle: Duration::from_secs(*constants::SESSION_IDLE_SECS),
            renderer: constants::RENDERER
                .parse()
                .unwrap_or(RendererPreference::Auto),
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Settings {
    /// Credential for one operation: `explicit` wins over the configured key.
    pub fn api_key_for(&self, explicit: Option<&str>) -> Result<String, DiagramError> {
        resolve_api_key(explicit, self.api_key.as_deref())
    }
}

/// Picks the API credential. Blank strings count as missing.
pub fn resolve_api_key(
    explicit: Option<&str>,
    configured: Option<&str>,
) -> Result<String, DiagramError> {
    non_blank(explicit)
        .or_else(|| non_blank(configured))
        .ok_or_else(|| {
            DiagramError::Configuration(
                "no Gemini API key: set GEMINI_API_KEY in the environment or .env, or supply one with the request".to_string(),
            )
        })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
