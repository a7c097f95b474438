//! Prompt assembly for the answer model.

use tera::{Context, Tera};
use thiserror::Error;

use replier_core::{Confidence, ConversationTurn, ScoredChunk};

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const SYSTEM_TEMPLATE: &str = "system.txt";
const USER_TEMPLATE: &str = "user.txt";

const SYSTEM_PROMPT: &str = r#"You are a helpful technical support assistant for an internal engineering team.

Your communication style:
- Be *direct* and *concise* - no fluff or filler
- Sound like a knowledgeable colleague, not a formal AI
- Use Slack-compatible formatting: *bold* for emphasis (NOT **bold**)
- Keep answers short - 2-4 sentences for simple questions, bullet points for complex ones
- If you're not sure, say so briefly and suggest what might help
- Skip pleasantries like "Great question!" or "I'd be happy to help!"

When answering:
1. Lead with the answer, not background
2. Include specific commands, code, or links when relevant
3. If the context doesn't contain the answer, say you don't know

Rate your confidence internally:
- HIGH: Context clearly answers the question
- MEDIUM: Context partially relevant, some inference needed
- LOW: Context doesn't really help"#;

const USER_PROMPT: &str = r#"Based on this context, answer the question. Be brief and direct.

CONTEXT:
{{ context }}
{% if history %}
RECENT ANSWERS IN THIS CHANNEL:
{% for turn in history %}Q: {{ turn.question }}
A: {{ turn.answer }}
{% endfor %}{% endif %}
QUESTION: {{ question }}

Respond with your answer only. If you're unsure, say so briefly. End your response with one of:
[CONFIDENCE:HIGH]
[CONFIDENCE:MEDIUM]
[CONFIDENCE:LOW]"#;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub struct PromptBuilder {
    templates: Tera,
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Result<Self, PromptError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![(SYSTEM_TEMPLATE, SYSTEM_PROMPT), (USER_TEMPLATE, USER_PROMPT)])?;
        Ok(Self { templates, max_context_chars: max_context_chars.max(1) })
    }

    pub fn build(
        &self,
        question: &str,
        chunks: &[ScoredChunk],
        history: &[ConversationTurn],
    ) -> Result<Prompt, PromptError> {
        let mut context = Context::new();
        context.insert("context", &bounded_context(chunks, self.max_context_chars));
        context.insert("question", question.trim());
        let history: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| serde_json::json!({ "question": turn.question, "answer": turn.answer }))
            .collect();
        context.insert("history", &history);

        Ok(Prompt {
            system: self.templates.render(SYSTEM_TEMPLATE, &Context::new())?,
            user: self.templates.render(USER_TEMPLATE, &context)?,
        })
    }
}

/// Joins chunk contents in rank order, stopping before the budget is exceeded.
/// The first chunk is always included, cut to the budget if it has to be.
pub fn bounded_context(chunks: &[ScoredChunk], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for scored in chunks {
        let content = scored.chunk.content.trim();
        let separator = if context.is_empty() { 0 } else { CONTEXT_SEPARATOR.chars().count() };
        let length = content.chars().count();

        if used + separator + length > max_chars {
            if context.is_empty() {
                context.extend(content.chars().take(max_chars));
            }
            break;
        }
        if separator > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        context.push_str(content);
        used += separator + length;
    }
    context
}

/// Strips the trailing `[CONFIDENCE:...]` tag. Medium when the model left it out.
pub fn parse_confidence(response: &str) -> (String, Confidence) {
    for (tag, confidence) in [
        ("[CONFIDENCE:HIGH]", Confidence::High),
        ("[CONFIDENCE:MEDIUM]", Confidence::Medium),
        ("[CONFIDENCE:LOW]", Confidence::Low),
    ] {
        if response.contains(tag) {
            return (response.replace(tag, "").trim().to_owned(), confidence);
        }
    }
    (response.trim().to_owned(), Confidence::Medium)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use replier_core::{
        ChannelId, Confidence, ConversationTurn, KnowledgeChunk, Provenance, ScoredChunk,
        SourceId, SourceType,
    };

    use super::{bounded_context, parse_confidence, PromptBuilder, CONTEXT_SEPARATOR};

    fn scored(content: &str) -> ScoredChunk {
        let provenance = Provenance {
            source_id: SourceId("src-1".to_owned()),
            source_type: SourceType::Documentation,
            url: "https://docs.example.com/guide".to_owned(),
            title: None,
            path: None,
            file_type: None,
            retrieved_at: Utc::now(),
        };
        ScoredChunk {
            chunk: KnowledgeChunk::new(ChannelId("ch".to_owned()), 0, content.to_owned(), vec![], provenance),
            score: 0.9,
        }
    }

    #[test]
    fn context_is_joined_and_bounded() {
        let chunks = vec![scored("alpha"), scored("bravo"), scored("charlie")];

        let unbounded = bounded_context(&chunks, 1_000);
        assert_eq!(unbounded, format!("alpha{CONTEXT_SEPARATOR}bravo{CONTEXT_SEPARATOR}charlie"));

        let bounded = bounded_context(&chunks, 20);
        assert_eq!(bounded, format!("alpha{CONTEXT_SEPARATOR}bravo"));
        assert!(bounded.chars().count() <= 20);

        assert_eq!(bounded_context(&[scored("a very long first chunk")], 6), "a very");
    }

    #[test]
    fn confidence_tag_is_stripped() {
        assert_eq!(
            parse_confidence("Run helm install.\n[CONFIDENCE:HIGH]"),
            ("Run helm install.".to_owned(), Confidence::High)
        );
        assert_eq!(parse_confidence("Not sure. [CONFIDENCE:LOW]").1, Confidence::Low);
        assert_eq!(parse_confidence("No tag here").1, Confidence::Medium);
    }

    #[test]
    fn user_prompt_carries_context_question_and_history() {
        let builder = PromptBuilder::new(500).expect("builder");
        let turn = ConversationTurn::new(
            ChannelId("ch".to_owned()),
            "1.2".to_owned(),
            "1.1".to_owned(),
            "U1".to_owned(),
            "What port does it use?".to_owned(),
            "Port 8443.".to_owned(),
            vec![],
            Confidence::High,
        );

        let prompt = builder
            .build("  How do I install it? ", &[scored("Install with helm.")], &[turn])
            .expect("prompt");

        assert!(prompt.system.starts_with("You are a helpful technical support assistant"));
        assert!(prompt.user.contains("CONTEXT:\nInstall with helm."));
        assert!(prompt.user.contains("Q: What port does it use?\nA: Port 8443."));
        assert!(prompt.user.contains("QUESTION: How do I install it?\n"));
        assert!(prompt.user.ends_with("[CONFIDENCE:LOW]"));
    }
}
