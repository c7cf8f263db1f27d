//! Terminal front ends: the one-shot converter and the interactive editor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::constants::{EXPORT_FILE_NAME, RECENT_HISTORY_LEN};
use crate::error::DiagramError;
use crate::generation::GenerationService;
use crate::image_input::ImageInput;
use crate::session::DiagramSession;

/// One line of editor input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCommand {
    Edit(String),
    Restore,
    History,
    Save(Option<PathBuf>),
    Quit,
}

impl EditorCommand {
    /// Blank lines yield `None`. Anything not starting with `:` is an edit request.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix(':') else {
            return Some(EditorCommand::Edit(line.to_string()));
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (command, None),
        };
        match name {
            "restore" => Some(EditorCommand::Restore),
            "history" => Some(EditorCommand::History),
            "save" => Some(EditorCommand::Save(arg.map(PathBuf::from))),
            "quit" | "q" => Some(EditorCommand::Quit),
            _ => Some(EditorCommand::Edit(line.to_string())),
        }
    }
}

pub async fn read_image(path: &Path) -> Result<ImageInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(ImageInput::from_bytes(bytes)?)
}

/// Converts one image and returns the sanitized code.
pub async fn convert(
    session: &mut DiagramSession,
    generator: &dyn GenerationService,
    image: &ImageInput,
    context: Option<&str>,
) -> Result<String, DiagramError> {
    session.start_new_diagram(generator, image, context).await
}

/// Reads commands from `input` until EOF or `:quit`, writing results to `output`.
///
/// Every failure is reported once and the loop carries on.
pub async fn run_editor<R, W>(
    session: &mut DiagramSession,
    generator: &dyn GenerationService,
    input: R,
    output: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    output
        .write_all(b"Describe a change, or use :restore, :history, :save [PATH], :quit\n> ")
        .await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let reply = match EditorCommand::parse(&line) {
            None => String::new(),
            Some(EditorCommand::Quit) => break,
            Some(EditorCommand::Edit(instruction)) => {
                let result = session.apply_edit(generator, &instruction).await;
                match result {
                    Ok(code) => format!("{}\n", code),
                    Err(e @ DiagramError::Generation(_)) => format!(
                        "Edit failed: {}\nRestored the original diagram:\n{}\n",
                        e,
                        session.current_code()
                    ),
                    Err(e) => format!("{}\n", e),
                }
            }
            Some(EditorCommand::Restore) => {
                format!("Restored the original diagram:\n{}\n", session.restore_original())
            }
            Some(EditorCommand::History) => {
                let entries: Vec<String> = session
                    .recent_history(RECENT_HISTORY_LEN)
                    .enumerate()
                    .map(|(i, entry)| format!("{}. {}\n", i + 1, entry.request))
                    .collect();
                if entries.is_empty() {
                    "No edits yet.\n".to_string()
                } else {
                    entries.concat()
                }
            }
            Some(EditorCommand::Save(path)) => {
                let path = path.unwrap_or_else(|| PathBuf::from(EXPORT_FILE_NAME));
                match tokio::fs::write(&path, session.export()).await {
                    Ok(()) => {
                        info!(path = %path.display(), "Diagram saved");
                        format!("Saved to {}\n", path.display())
                    }
                    Err(e) => format!("Could not save {}: {}\n", path.display(), e),
                }
            }
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"> ").await?;
        output.flush().await?;
    }
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generation::PromptPart;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Replies(Mutex<VecDeque<Result<String, GenerationError>>>);

    impl Replies {
        fn new(replies: Vec<Result<&str, GenerationError>>) -> Self {
            Self(Mutex::new(
                replies.into_iter().map(|r| r.map(String::from)).collect(),
            ))
        }
    }

    #[async_trait]
    impl GenerationService for Replies {
        async fn generate(&self, _parts: Vec<PromptPart>) -> Result<String, GenerationError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GenerationError::EmptyResponse))
        }
    }

    fn image() -> ImageInput {
        ImageInput::from_bytes(vec![0xFF, 0xD8, 0xFF]).unwrap()
    }

    async fn run(generator: &Replies, script: &str) -> (DiagramSession, String) {
        let mut session = DiagramSession::new(Duration::from_secs(5));
        convert(&mut session, generator, &image(), None).await.unwrap();
        let mut output = Vec::new();
        run_editor(&mut session, generator, script.as_bytes(), &mut output)
            .await
            .unwrap();
        (session, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(EditorCommand::parse("   "), None);
        assert_eq!(EditorCommand::parse(":restore"), Some(EditorCommand::Restore));
        assert_eq!(EditorCommand::parse(" :history "), Some(EditorCommand::History));
        assert_eq!(EditorCommand::parse(":save"), Some(EditorCommand::Save(None)));
        assert_eq!(
            EditorCommand::parse(":save out/flow.mmd"),
            Some(EditorCommand::Save(Some(PathBuf::from("out/flow.mmd"))))
        );
        assert_eq!(EditorCommand::parse(":q"), Some(EditorCommand::Quit));
        assert_eq!(
            EditorCommand::parse("make the start node blue"),
            Some(EditorCommand::Edit("make the start node blue".into()))
        );
        assert_eq!(
            EditorCommand::parse(":-) add a smiley node"),
            Some(EditorCommand::Edit(":-) add a smiley node".into()))
        );
    }

    #[tokio::test]
    async fn test_editor_applies_edits_and_lists_history() {
        let generator = Replies::new(vec![
            Ok("graph TD\n  A"),
            Ok("graph TD\n  A-->B"),
            Ok("graph TD\n  A-->B-->C"),
        ]);
        let (session, output) = run(&generator, "add B\n\nadd C\n:history\n:quit\nignored\n").await;

        assert_eq!(session.current_code(), "graph TD\n  A-->B-->C");
        assert_eq!(session.state().history.len(), 2);
        assert!(output.contains("1. add C\n2. add B\n"));
    }

    #[tokio::test]
    async fn test_editor_reports_rollback() {
        let generator = Replies::new(vec![
            Ok("graph TD\n  C0"),
            Ok("graph TD\n  C1"),
            Err(GenerationError::Transport("reset".into())),
        ]);
        let (session, output) = run(&generator, "one\ntwo\n").await;

        assert_eq!(session.current_code(), "graph TD\n  C0");
        assert!(output.contains("Edit failed: request to generation service failed: reset"));
        assert!(output.contains("Restored the original diagram:\ngraph TD\n  C0"));
    }

    #[tokio::test]
    async fn test_editor_restore_and_save() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("flow.mmd");
        let generator = Replies::new(vec![Ok("graph TD\n  C0"), Ok("graph TD\n  C1")]);
        let script = format!("one\n:restore\n:save {}\n", target.display());
        let (session, output) = run(&generator, &script).await;

        assert_eq!(session.current_code(), "graph TD\n  C0");
        assert_eq!(session.state().history.len(), 1);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "graph TD\n  C0");
        assert!(output.contains("Saved to"));
    }

    #[tokio::test]
    async fn test_read_image_rejects_text_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let err = read_image(&path).await.unwrap_err();
        assert!(err.to_string().contains("PNG or JPEG"));
    }
}
