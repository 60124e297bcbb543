//! Prompt templates for the generation model

/// Summary prompt
///
/// Placeholders: {user_id}, {memories} (one `- <text>` line per memory)
pub const SUMMARY_PROMPT: &str = r#"Summarize these memories for user "{user_id}" into a single concise paragraph.
Do not include <think> tags. Just provide the raw summary.
Memories:
{memories}"#;

/// Render memories as a bullet list, one `- <text>` line each
pub fn bullet_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| format!("- {}\n", item.as_ref()))
        .collect()
}

/// Fill [`SUMMARY_PROMPT`] for one batch
pub fn build_summary_prompt(memories: &[String], user_id: &str) -> String {
    SUMMARY_PROMPT
        .replace("{user_id}", user_id)
        .replace("{memories}", &bullet_list(memories))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullet_list() {
        assert_eq!(bullet_list(&["a", "b"]), "- a\n- b\n");
        assert_eq!(bullet_list::<&str>(&[]), "");
    }

    #[test]
    fn test_summary_prompt_lists_every_memory() {
        let memories = vec!["hello".to_string(), "world".to_string()];
        let prompt = build_summary_prompt(&memories, "u1");

        assert!(prompt.contains("for user \"u1\""));
        assert!(prompt.ends_with("Memories:\n- hello\n- world\n"));
        assert!(!prompt.contains("{memories}"));
    }
}
