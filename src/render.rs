use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RendererPreference;
use crate::constants::MERMAID_MODULE_PATH;

/// How the preview page embeds a diagram. Chosen once when the server starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    /// Locally served Mermaid ES module.
    SpecializedRenderer,
    /// `<div class="mermaid">` plus the CDN script.
    GenericMarkupRenderer,
}

impl RendererKind {
    /// Resolves the configured preference against what `static_dir` actually ships.
    pub fn select(preference: RendererPreference, static_dir: &Path) -> Self {
        let bundle_present = static_dir.join(MERMAID_MODULE_PATH).is_file();
        let kind = match (preference, bundle_present) {
            (RendererPreference::Generic, _) => RendererKind::GenericMarkupRenderer,
            (_, true) => RendererKind::SpecializedRenderer,
            (RendererPreference::Specialized, false) => {
                warn!(
                    bundle = %static_dir.join(MERMAID_MODULE_PATH).display(),
                    "Specialized renderer requested but its bundle is missing; using generic markup"
                );
                RendererKind::GenericMarkupRenderer
            }
            (RendererPreference::Auto, false) => RendererKind::GenericMarkupRenderer,
        };
        info!(?kind, "Diagram renderer selected");
        kind
    }

    pub fn template_name(self) -> &'static str {
        match self {
            RendererKind::SpecializedRenderer => "preview_specialized.html",
            RendererKind::GenericMarkupRenderer => "preview_generic.html",
        }
    }
}
