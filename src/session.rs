//! Diagram state for one interactive session and the operations that move it.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{DiagramError, GenerationError};
use crate::generation::{GenerationService, PromptPart};
use crate::image_input::ImageInput;
use crate::prompt::{build_edit_prompt, build_initial_prompt};
use crate::sanitize::sanitize;

/// One applied natural-language edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditEntry {
    pub request: String,
    pub resulting_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagramState {
    pub current_code: String,
    /// First code of the current generation episode; rollback target.
    pub original_code: String,
    pub history: Vec<EditEntry>,
    pub generated: bool,
}

/// Owns one user's `DiagramState`. Operations take `&mut self`, so at most
/// one can be in flight per session.
#[derive(Debug)]
pub struct DiagramSession {
    state: DiagramState,
    timeout: Duration,
}

impl DiagramSession {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: DiagramState::default(),
            timeout,
        }
    }

    pub fn state(&self) -> &DiagramState {
        &self.state
    }

    pub fn current_code(&self) -> &str {
        &self.state.current_code
    }

    pub fn is_generated(&self) -> bool {
        self.state.generated
    }

    /// Up to `limit` edit entries, newest first.
    pub fn recent_history(&self, limit: usize) -> impl Iterator<Item = &EditEntry> {
        self.state.history.iter().rev().take(limit)
    }

    /// Converts an image into a fresh diagram, starting a new generation episode.
    ///
    /// On failure the state is left exactly as it was.
    #[instrument(skip(self, generator, user_context))]
    pub async fn start_new_diagram(
        &mut self,
        generator: &dyn GenerationService,
        image: &ImageInput,
        user_context: Option<&str>,
    ) -> Result<String, DiagramError> {
        let parts = vec![
            PromptPart::Text(build_initial_prompt(user_context)),
            PromptPart::Image(image.clone()),
        ];
        let raw = self.call(generator.generate(parts)).await?;
        let code = diagram_code(&raw)?;

        self.state = DiagramState {
            current_code: code.clone(),
            original_code: code.clone(),
            history: Vec::new(),
            generated: true,
        };
        info!(chars = code.len(), "New diagram generated");
        Ok(code)
    }

    /// Revises the current diagram according to `instruction`.
    ///
    /// A failed model call resets `current_code` to the original code of the
    /// episode, discarding every edit applied since.
    #[instrument(skip(self, generator))]
    pub async fn apply_edit(
        &mut self,
        generator: &dyn GenerationService,
        instruction: &str,
    ) -> Result<String, DiagramError> {
        if !self.state.generated {
            return Err(DiagramError::InvalidRequest(
                "no diagram has been generated yet".to_string(),
            ));
        }
        if instruction.trim().is_empty() {
            return Err(DiagramError::InvalidRequest(
                "edit instruction is empty".to_string(),
            ));
        }

        let prompt = build_edit_prompt(&self.state.current_code, instruction);
        let result = self
            .call(generator.generate(vec![PromptPart::Text(prompt)]))
            .await
            .and_then(|raw| diagram_code(&raw));
        match result {
            Ok(code) => {
                self.state.current_code = code.clone();
                self.state.history.push(EditEntry {
                    request: instruction.to_string(),
                    resulting_code: code.clone(),
                });
                info!(edits = self.state.history.len(), "Edit applied");
                Ok(code)
            }
            Err(e) => {
                warn!(error = %e, "Edit failed, restoring original diagram");
                self.state.current_code = self.state.original_code.clone();
                Err(e.into())
            }
        }
    }

    /// The code a download or save writes out.
    pub fn export(&self) -> &str {
        self.current_code()
    }

    /// Puts the original code back in effect. History is kept.
    pub fn restore_original(&mut self) -> String {
        self.state.current_code = self.state.original_code.clone();
        self.state.current_code.clone()
    }

    async fn call<F>(&self, request: F) -> Result<String, GenerationError>
    where
        F: Future<Output = Result<String, GenerationError>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
    }
}

// A reply that is nothing but fences carries no diagram.
fn diagram_code(raw: &str) -> Result<String, GenerationError> {
    let code = sanitize(raw);
    if code.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(code)
}
