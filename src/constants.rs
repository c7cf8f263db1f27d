// Defaults loaded from the environment (after dotenvy has run in main).

use std::env;

lazy_static::lazy_static! {
    pub static ref GEMINI_API_KEY: String = env::var("GEMINI_API_KEY").unwrap_or_default();
    pub static ref GEMINI_MODEL: String = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
    pub static ref GEMINI_API_BASE: String = env::var("GEMINI_API_BASE").unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
    pub static ref TIMEOUT_SECS: u64 = env::var("INKFLOW_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(120);
    pub static ref SESSION_IDLE_SECS: u64 = env::var("INKFLOW_SESSION_IDLE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3600);
    pub static ref RENDERER: String = env::var("INKFLOW_RENDERER").unwrap_or_else(|_| "auto".to_string());
}

pub const EXPORT_FILE_NAME: &str = "diagram.mmd";
pub const EXPORT_MIME_TYPE: &str = "text/plain";

/// How many edit requests the editor shows, newest first.
pub const RECENT_HISTORY_LEN: usize = 5;

pub const PREVIEW_HEIGHT_PX: u32 = 700;

/// Bundle path under the static directory that enables the specialized renderer.
pub const MERMAID_MODULE_PATH: &str = "vendor/mermaid.esm.min.mjs";
