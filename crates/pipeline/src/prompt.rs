//! System prompt assembly, with optional retrieval context.

use colloquy_core::Snippet;

/// Build the system prompt, splicing in retrieved snippets when present.
pub fn build_system_prompt(base: &str, snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return base.to_string();
    }

    let context = snippets
        .iter()
        .map(|s| {
            format!(
                "[Source: {} - Relevance: {:.2}]\n{}",
                s.source_id, s.score, s.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{base}\n\n\
         You have access to the following relevant information from the user's knowledge base:\n\n\
         {context}\n\n\
         Instructions for using this information:\n\
         - Answer the user's question based PRIMARILY on the provided context\n\
         - If the context doesn't contain the answer, clearly say you don't have that information\n\
         - Do NOT make up information not present in the context\n\
         - Cite sources naturally when it helps\n\
         - Keep responses concise for voice delivery"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_snippets_returns_base() {
        assert_eq!(build_system_prompt("be brief", &[]), "be brief");
    }

    #[test]
    fn snippets_are_spliced_with_sources() {
        let snippets = vec![Snippet {
            text: "Refunds take five days.".into(),
            source_id: "refunds.md".into(),
            score: 0.91,
        }];
        let prompt = build_system_prompt("be brief", &snippets);
        assert!(prompt.starts_with("be brief"));
        assert!(prompt.contains("refunds.md"));
        assert!(prompt.contains("0.91"));
        assert!(prompt.contains("Refunds take five days."));
    }
}
