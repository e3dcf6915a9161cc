// Prompt assembly for intent extraction.

use crate::core::ai::{estimate_tokens, AiMessage};
use crate::core::context::Session;
use crate::core::registry::CapabilityRegistry;
use chrono::{DateTime, Utc};

const INSTRUCTIONS: &str = "You route requests for a Google Workspace assistant. \
Pick exactly one capability and one operation from the catalog below and extract \
its parameters from the request. Never invent capabilities, operations or parameter \
names that are not in the catalog.";

const OUTPUT_FORMAT: &str = r#"Reply with a single JSON object and nothing else:
{"capability": "<name>", "operation": "<name>", "parameters": {"<param>": <value>}, "confidence": <0.0-1.0>}

Rules:
- Only include parameters you can read from the request or the conversation. Leave out anything you would have to guess.
- Dates and times are ISO 8601, e.g. 2024-05-01T09:00:00Z. Resolve words like "tomorrow" against the current time.
- When the user refers to an earlier item ("it", "that email", "the same doc"), put the word "it" as the value, or "@<key>" to use a remembered value below.
- confidence is how sure you are that this is what the user wants.
- If the request is ambiguous or is not about the workspace, reply with {"clarification": "<one short question for the user>"} instead."#;

/// System prompt: instructions, catalog, remembered entities, output rules.
pub fn build_system_prompt(
    registry: &CapabilityRegistry,
    session: &Session,
    now: DateTime<Utc>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\nCurrent time: ");
    prompt.push_str(&now.to_rfc3339());
    prompt.push_str("\n\nCatalog (name?: optional, = default):\n");
    prompt.push_str(&registry.prompt_schema());

    prompt.push_str("\nRemembered from this conversation:\n");
    if session.entities.is_empty() {
        prompt.push_str("  (nothing yet)\n");
    } else {
        let mut keys: Vec<&String> = session.entities.keys().collect();
        keys.sort();
        for key in keys {
            prompt.push_str(&format!("  @{} = {}\n", key, session.entities[key]));
        }
    }

    prompt.push('\n');
    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

/// The last `max_turns` turns as chat messages, oldest first, trimmed from
/// the oldest end until they fit in `token_budget`.
pub fn build_history(session: &Session, max_turns: usize, token_budget: usize) -> Vec<AiMessage> {
    let mut pairs: Vec<(AiMessage, AiMessage)> = session
        .recent_turns(max_turns)
        .map(|turn| {
            (
                AiMessage::user(turn.request_text.clone()),
                AiMessage::assistant(turn.history_reply()),
            )
        })
        .collect();

    let cost = |pair: &(AiMessage, AiMessage)| {
        estimate_tokens(&pair.0.content) + estimate_tokens(&pair.1.content)
    };
    let mut total: usize = pairs.iter().map(cost).sum();
    let mut drop = 0;
    while total > token_budget && drop < pairs.len() {
        total -= cost(&pairs[drop]);
        drop += 1;
    }
    pairs.drain(..drop);

    pairs
        .into_iter()
        .flat_map(|(user, assistant)| [user, assistant])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ConversationTurn;
    use crate::core::registry::workspace_catalog;

    fn session_with_turns(count: usize) -> Session {
        let mut session = Session::new("s");
        for i in 0..count {
            session.push_turn(
                ConversationTurn::clarification(&format!("request {}", i), "which?"),
                100,
            );
        }
        session
    }

    #[test]
    fn system_prompt_embeds_catalog_and_entities() {
        let registry = workspace_catalog().unwrap();
        let mut session = Session::new("s");
        session.remember("document.last_id", "doc-42");

        let prompt = build_system_prompt(&registry, &session, Utc::now());
        assert!(prompt.contains("calendar: "));
        assert!(prompt.contains("create_item(to: email, subject: string, body: string"));
        assert!(prompt.contains("@document.last_id = doc-42"));
        assert!(prompt.contains("\"confidence\""));
    }

    #[test]
    fn history_keeps_last_turns_in_order() {
        let session = session_with_turns(5);
        let history = build_history(&session, 2, 10_000);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "request 3");
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[2].content, "request 4");
    }

    #[test]
    fn history_drops_oldest_turns_over_budget() {
        let session = session_with_turns(3);
        // Each pair costs 3 + 2 tokens.
        let history = build_history(&session, 3, 5);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "request 2");

        assert!(build_history(&session, 3, 0).is_empty());
    }
}
