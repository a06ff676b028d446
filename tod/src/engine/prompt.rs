//! Prompt builder
//!
//! Assembles the LLM prompt from the output-format contract, the task
//! description, inline knowledge, the focus file's current contents, and the
//! include-resolver knowledge blob, tracking a per-section token estimate.

use std::path::Path;

use knowstore::{KnowledgeBlob, estimate_tokens};

/// The fixed instruction preamble: the output format the parser expects
pub const OUTPUT_CONTRACT: &str = "\
You edit source files. Reply with one section per file you create or change.

Each section starts with a comment line naming the file, followed by the
complete file contents:

# file: <path>
<entire file body>

Rules:
- Emit the FULL contents of every file unless a partial update is explicitly
  authorized for it.
- A partial update must put `# partial: true` on the line directly after the
  `# file:` line, and must repeat enough unchanged surrounding lines for the
  update to be anchored in the original.
- Put each file in its own fenced code block if you use fences.
- No commentary between sections.";

/// An assembled prompt plus per-section token estimates
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Short system role line
    pub system: String,

    /// The full prompt text, contract first
    pub text: String,

    pub contract_tokens: usize,
    pub desc_tokens: usize,
    pub inline_tokens: usize,
    pub focus_tokens: usize,
    pub include_tokens: usize,

    /// Token estimate for the whole of `text`
    pub total_tokens: usize,
}

/// Build the prompt for one task
///
/// `focus` carries the focus file's display path and current contents when
/// the file already exists, so the model can rewrite it.
pub fn build_prompt(
    clean_desc: &str,
    inline_knowledge: Option<&str>,
    focus: Option<(&Path, &str)>,
    knowledge: &KnowledgeBlob,
) -> Prompt {
    let mut sections: Vec<String> = Vec::new();

    sections.push(OUTPUT_CONTRACT.to_string());

    let desc_section = format!("# Task\n{}", clean_desc);
    let desc_tokens = estimate_tokens(desc_section.len());
    sections.push(desc_section);

    let inline_tokens = match inline_knowledge {
        Some(text) if !text.trim().is_empty() => {
            let section = format!("# Notes\n{}", text);
            let tokens = estimate_tokens(section.len());
            sections.push(section);
            tokens
        }
        _ => 0,
    };

    let focus_tokens = match focus {
        Some((path, contents)) => {
            let section = format!("=== current file: {} ===\n{}", path.display(), contents);
            let tokens = estimate_tokens(section.len());
            sections.push(section);
            tokens
        }
        None => 0,
    };

    let include_tokens = if knowledge.text.is_empty() {
        0
    } else {
        sections.push(knowledge.text.clone());
        knowledge.tokens
    };

    let text = sections.join("\n\n");
    let total_tokens = estimate_tokens(text.len());

    Prompt {
        system: "You are todod, an automated code editing agent.".to_string(),
        contract_tokens: estimate_tokens(OUTPUT_CONTRACT.len()),
        text,
        desc_tokens,
        inline_tokens,
        focus_tokens,
        include_tokens,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn empty_blob() -> KnowledgeBlob {
        KnowledgeBlob::empty()
    }

    #[test]
    fn test_sections_in_order() {
        let mut blob = KnowledgeBlob::empty();
        blob.text = "=== a.py ===\nprint()".to_string();
        blob.tokens = estimate_tokens(blob.text.len());

        let focus_path = PathBuf::from("src/hello.py");
        let prompt = build_prompt(
            "Add a greeting",
            Some("use snake_case"),
            Some((focus_path.as_path(), "old body\n")),
            &blob,
        );

        let contract_at = prompt.text.find("# file: <path>").unwrap();
        let desc_at = prompt.text.find("# Task\nAdd a greeting").unwrap();
        let notes_at = prompt.text.find("# Notes\nuse snake_case").unwrap();
        let focus_at = prompt.text.find("=== current file: src/hello.py ===").unwrap();
        let blob_at = prompt.text.find("=== a.py ===").unwrap();

        assert!(contract_at < desc_at);
        assert!(desc_at < notes_at);
        assert!(notes_at < focus_at);
        assert!(focus_at < blob_at);
    }

    #[test]
    fn test_optional_sections_absent() {
        let prompt = build_prompt("Just do it", None, None, &empty_blob());

        assert_eq!(prompt.inline_tokens, 0);
        assert_eq!(prompt.focus_tokens, 0);
        assert_eq!(prompt.include_tokens, 0);
        assert!(!prompt.text.contains("current file"));
        assert!(!prompt.text.contains("# Notes"));
    }

    #[test]
    fn test_token_estimates() {
        let prompt = build_prompt("abcd", None, None, &empty_blob());

        // "# Task\nabcd" is 11 bytes -> 3 tokens at 4 bytes/token
        assert_eq!(prompt.desc_tokens, 3);
        assert_eq!(prompt.total_tokens, estimate_tokens(prompt.text.len()));
        assert!(prompt.total_tokens >= prompt.contract_tokens + prompt.desc_tokens);
    }
}
