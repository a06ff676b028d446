//! LLM output parser
//!
//! Splits a model reply into file sections delimited by `# file:` marker
//! lines. Code fences are stripped, a leading `# partial: true` line flags
//! the record for smart merge, and whitespace-only sections are dropped.

use std::path::PathBuf;

use tracing::debug;

/// One file edit parsed out of the model reply
#[derive(Debug, Clone)]
pub struct EditRecord {
    /// The path text after `# file:`, as the model wrote it
    pub original_filename: String,

    /// Absolute confined path, filled in by the engine
    pub resolved_path: Option<PathBuf>,

    /// True when no file exists yet at the resolved path
    pub new_file: bool,

    /// The section asked for a smart merge instead of a full overwrite
    pub partial: bool,

    /// File body, normalized to end with exactly one newline
    pub content: String,
}

/// Split a model reply into edit records
///
/// Anything before the first `# file:` line is ignored. Each record's
/// content runs to the next `# file:` line or end of reply; fence lines are
/// not part of the content.
pub fn parse_llm_output(reply: &str) -> Vec<EditRecord> {
    let mut records: Vec<EditRecord> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in reply.lines() {
        if let Some(name) = line.trim().strip_prefix("# file:") {
            if let Some((filename, lines)) = current.take() {
                push_record(&mut records, filename, lines);
            }
            current = Some((name.trim().to_string(), Vec::new()));
            continue;
        }

        if line.trim_start().starts_with("```") {
            continue;
        }

        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((filename, lines)) = current.take() {
        push_record(&mut records, filename, lines);
    }

    debug!(count = records.len(), "parsed llm output");
    records
}

fn push_record(records: &mut Vec<EditRecord>, filename: String, mut lines: Vec<&str>) {
    let partial = lines
        .first()
        .map(|l| l.trim() == "# partial: true")
        .unwrap_or(false);
    if partial {
        lines.remove(0);
    }

    while lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        lines.pop();
    }
    while lines.first().map(|l| l.trim().is_empty()).unwrap_or(false) {
        lines.remove(0);
    }

    if lines.is_empty() {
        debug!(%filename, "dropping whitespace-only section");
        return;
    }

    let mut content = lines.join("\n");
    content.push('\n');

    records.push(EditRecord {
        original_filename: filename,
        resolved_path: None,
        new_file: false,
        partial,
        content,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_section() {
        let records = parse_llm_output("# file: hello.txt\nHello, world!");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_filename, "hello.txt");
        assert_eq!(records[0].content, "Hello, world!\n");
        assert!(!records[0].partial);
    }

    #[test]
    fn test_multiple_sections_in_order() {
        let reply = "# file: a.py\nprint('a')\n# file: b.py\nprint('b')\nmore\n";
        let records = parse_llm_output(reply);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].original_filename, "a.py");
        assert_eq!(records[0].content, "print('a')\n");
        assert_eq!(records[1].original_filename, "b.py");
        assert_eq!(records[1].content, "print('b')\nmore\n");
    }

    #[test]
    fn test_preamble_ignored() {
        let reply = "Sure, here is the change you asked for:\n\n# file: x.txt\nbody\n";
        let records = parse_llm_output(reply);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "body\n");
    }

    #[test]
    fn test_fences_stripped() {
        let reply = "```python\n# file: a.py\nprint('hi')\n```\n";
        let records = parse_llm_output(reply);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "print('hi')\n");
    }

    #[test]
    fn test_partial_flag_consumed() {
        let reply = "# file: mod.py\n# partial: true\ncontext\nnew line\ncontext\n";
        let records = parse_llm_output(reply);

        assert_eq!(records.len(), 1);
        assert!(records[0].partial);
        assert_eq!(records[0].content, "context\nnew line\ncontext\n");
    }

    #[test]
    fn test_whitespace_only_section_dropped() {
        let reply = "# file: empty.txt\n\n   \n# file: real.txt\ncontent\n";
        let records = parse_llm_output(reply);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_filename, "real.txt");
    }

    #[test]
    fn test_no_sections() {
        assert!(parse_llm_output("I could not produce any files.").is_empty());
        assert!(parse_llm_output("").is_empty());
    }
}
