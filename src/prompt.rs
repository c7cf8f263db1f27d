//! Instruction text sent to the generation model.
//!
//! Both builders are pure and never look inside the diagram code they are given.

const STYLE_GUIDE: &str = "\
Mandatory styling by node role (define each with classDef and apply it with class statements):
   - Start/end nodes: rounded shape (()), blue background #4A90E2, white text
   - Key processes: rectangle ([]), orange background #FF6B6B, white text
   - Decisions/conditions: diamond ({}), yellow background #FFD93D, black text
   - Generic steps: rectangle ([]), light grey background #E8E8E8, black text
   - Success/completion: rounded shape (()), green background #6BCB77, white text
   - Errors/failures: rectangle ([]), red background #FF4757, white text";

const INITIAL_TEMPLATE: &str = "\
Analyze the attached image in detail and convert it into professional Mermaid.js diagram code.

Requirements:
1. Work out the structure, relationships and flow of the drawing and pick the fitting Mermaid diagram type: flowchart, sequenceDiagram, classDiagram or stateDiagram.

2. Do not just copy the words in each box. Expand terse labels into full, specific descriptive phrases.
   e.g. \"Start\" -> \"Start the user login process\"
   e.g. \"Verify\" -> \"Verify and authenticate user credentials\"
   e.g. \"Data\" -> \"Look up user details in the customer database\"

3. {style}

4. Use Mermaid style syntax to tune font size, weight and colour; keep the diagram background clean.

5. Respond with the Mermaid code only. No commentary and no markdown code fence markers (```).";

/// Prompt for converting an uploaded image into a diagram.
///
/// A non-blank `user_context` is appended as an extra clarifying clause.
pub fn build_initial_prompt(user_context: Option<&str>) -> String {
    let base = INITIAL_TEMPLATE.replace("{style}", STYLE_GUIDE);
    match user_context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "{}\n\nAdditional context: {}\n\nUse the additional context above to make the diagram more accurate.",
            base, context
        ),
        None => base,
    }
}

/// Prompt for revising `current_code` according to a free-text instruction.
pub fn build_edit_prompt(current_code: &str, instruction: &str) -> String {
    format!(
        "You are a professional diagram designer. Revise the Mermaid code below so that it does exactly what the user asks, keeping everything else as it is.\n\n\
         Current Mermaid code:\n```\n{code}\n```\n\n\
         User request:\n{instruction}\n\n\
         Requirements:\n\
         1. Keep the overall structure and the connections between nodes unless the request demands a change.\n\
         2. Apply the request precisely.\n\
         3. {style}\n\
         4. Respond with the revised Mermaid code only. No commentary and no markdown code fence markers (```).",
        code = current_code,
        instruction = instruction,
        style = STYLE_GUIDE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_prompt_names_diagram_types() {
        let prompt = build_initial_prompt(None);
        for kind in ["flowchart", "sequenceDiagram", "classDiagram", "stateDiagram"] {
            assert!(prompt.contains(kind), "missing {}", kind);
        }
        assert!(prompt.contains("#4A90E2"));
        assert!(prompt.contains("#FF4757"));
        assert!(prompt.contains("Mermaid code only"));
        assert!(!prompt.contains("{style}"));
    }

    #[test]
    fn test_initial_prompt_context_clause() {
        let plain = build_initial_prompt(None);
        assert_eq!(build_initial_prompt(Some("   ")), plain);
        assert!(!plain.contains("Additional context"));

        let with_context = build_initial_prompt(Some("login flow of a web app"));
        assert!(with_context.starts_with(&plain));
        assert!(with_context.contains("Additional context: login flow of a web app"));
    }

    #[test]
    fn test_edit_prompt_embeds_code_and_instruction_verbatim() {
        let code = "flowchart TD\n  A[\"{odd}\"] --> B{Decide}";
        let prompt = build_edit_prompt(code, "make the start node blue");
        assert!(prompt.contains(code));
        assert!(prompt.contains("User request:\nmake the start node blue"));
        assert!(prompt.contains("Keep the overall structure"));
        assert!(prompt.contains("classDef"));
    }

    #[test]
    fn test_edit_prompt_leaves_braces_in_user_text_alone() {
        let prompt = build_edit_prompt("graph LR\n  X{instruction} --> Y", "rename X to {code}");
        assert!(prompt.contains("X{instruction} --> Y"));
        assert!(prompt.contains("rename X to {code}"));
    }

    #[test]
    fn test_builders_are_deterministic() {
        assert_eq!(build_initial_prompt(Some("ctx")), build_initial_prompt(Some("ctx")));
        assert_eq!(build_edit_prompt("a", "b"), build_edit_prompt("a", "b"));
    }
}
