//! Context assembly: ranked search results to prompt text.

use crate::records::SearchResult;

/// Context returned when retrieval found nothing.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant information found.";

/// Render results as one block per result, separated by a blank line.
///
/// Each block is a `[reference] (relevance: 0.1234)` header line followed by the record text
/// with its blank lines removed, so blocks stay separable. Scores are rounded to four decimal
/// places. Result order is preserved.
pub fn format_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }

    results
        .iter()
        .map(|result| {
            format!(
                "[{}] (relevance: {:.4})\n{}",
                result.reference,
                result.search_score,
                compact_lines(&result.text)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn compact_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap assembled context into the grounding instructions sent as a system message.
pub fn build_system_prompt(context: &str) -> String {
    format!(
        "You are a helpful assistant answering questions about a cited source document. \
Use the following passages, each tagged with its chapter:verse reference, to inform your response:\n\n\
{context}\n\n\
Instructions:\n\
1. Give accurate answers grounded in the passages above and cite their references.\n\
2. If the passages do not contain enough information to answer, say so clearly.\n\
3. Keep a neutral and professional tone.\n\
4. Do not invent information that is absent from the passages or your training data."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(reference: &str, text: &str, score: f32) -> SearchResult {
        SearchResult {
            reference: reference.into(),
            text: text.into(),
            search_score: score,
        }
    }

    #[test]
    fn empty_results_map_to_sentinel() {
        assert_eq!(format_context(&[]), NO_CONTEXT_SENTINEL);
    }

    #[test]
    fn one_block_per_result_with_rounded_scores() {
        let context = format_context(&[
            result("2:22", "First passage", 0.912_345),
            result("3:1", "Second passage", 0.5),
            result("10:7", "Third passage", 0.000_04),
        ]);

        let blocks: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], "[2:22] (relevance: 0.9123)\nFirst passage");
        assert_eq!(blocks[1], "[3:1] (relevance: 0.5000)\nSecond passage");
        assert_eq!(blocks[2], "[10:7] (relevance: 0.0000)\nThird passage");
    }

    #[test]
    fn blank_lines_inside_text_do_not_split_blocks() {
        let context = format_context(&[
            result("1:1", "line one\n\n\nline two\n", 0.7),
            result("1:2", "other", 0.6),
        ]);
        assert_eq!(context.split("\n\n").count(), 2);
        assert!(context.starts_with("[1:1] (relevance: 0.7000)\nline one\nline two"));
    }

    #[test]
    fn system_prompt_embeds_context() {
        let prompt = build_system_prompt("[1:1] (relevance: 1.0000)\nLight");
        assert!(prompt.contains("[1:1] (relevance: 1.0000)\nLight"));
        assert!(prompt.contains("say so clearly"));
    }
}
