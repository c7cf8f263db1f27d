pub mod config;
pub mod constants;
pub mod editor;
pub mod error;
pub mod generation;
pub mod image_input;
pub mod prompt;
pub mod render;
pub mod sanitize;
pub mod session;
pub mod web_server;

pub use error::{DiagramError, GenerationError};
pub use session::{DiagramSession, DiagramState, EditEntry};
