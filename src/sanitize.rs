//! Strips chat-style code fences from model responses.

use regex::Regex;

lazy_static::lazy_static! {
    // ``` plus an optional language tag ending its line, or a bare ``` run straight into code
    static ref OPENING_FENCE: Regex = Regex::new(r"\A```(?:[\w+.-]*[ \t]*(?:\r?\n|\z)|[ \t]*)").unwrap();
    static ref CLOSING_FENCE: Regex = Regex::new(r"```[ \t]*\z").unwrap();
}

/// Removes a leading (optionally language-tagged) fence and a trailing fence, then trims.
///
/// Text without fences comes back trimmed and otherwise untouched. Stripping
/// repeats until nothing changes, so `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(raw_response: &str) -> String {
    let mut current = raw_response.trim();
    loop {
        let mut next = current;
        if let Some(m) = OPENING_FENCE.find(next) {
            next = &next[m.end()..];
        }
        if let Some(m) = CLOSING_FENCE.find(next) {
            next = &next[..m.start()];
        }
        let next = next.trim();
        if next.len() == current.len() {
            return current.to_string();
        }
        current = next;
    }
}
