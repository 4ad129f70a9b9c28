use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{array, display_or_na, field, into_object, parse_object, pretty, str_or, JsonObject};
use super::{default_key, now_iso, require_keys, Agent, AgentError, ChatSession};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the HexaBid AI Assistant.
You hold the conversation with the user: answer questions about HexaBid and tender
processes, summarise agent outputs in plain language, guide users through bidding
and trigger agents when they ask for an action.

Commands you can map to agents:
- "discover tenders [category] [location]" -> tender_discovery
- "parse tender [tender_id]" -> document_parser
- "generate boq [tender_id]" -> boq_generator
- "create rfq [tender_id]" -> rfq_vendor
- "analyze pricing [tender_id]" -> pricing_strategy
- "check risks [tender_id]" -> risk_compliance
- "make decision [tender_id]" -> strategy_decision
- "assemble documents [tender_id]" -> document_assembly
- "run full workflow [query]" -> discover_and_bid

Intents: question, command, summary, guidance, clarification.
Be friendly, concise and specific about next steps. When the intent is unclear set
needs_clarification to true and ask 2-3 clarifying questions.

Respond with a single JSON object:
{
  "message": "string",
  "intent": "string",
  "actions": [ { "agent": "string", "action": "string", "parameters": {} } ],
  "data": {},
  "suggestions": ["string"],
  "needs_clarification": boolean,
  "clarification_questions": ["string"],
  "confidence_score": number (0-1),
  "response_timestamp": "ISO datetime"
}"#;

/// Conversation turns replayed into the prompt.
const HISTORY_TURNS: usize = 5;

pub struct AssistantAgent;

#[async_trait]
impl Agent for AssistantAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Assistant
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    async fn process(
        &self,
        chat: &mut ChatSession<'_>,
        input: &Value,
        _ctx: &UserContext,
    ) -> Result<JsonObject, AgentError> {
        let reply = chat.send(build_prompt(input)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                require_keys(&mut result, &["message", "intent"]);
                default_key(&mut result, "response_timestamp", now_iso());
                default_key(&mut result, "confidence_score", json!(0.85));
                default_key(&mut result, "actions", json!([]));
                default_key(&mut result, "suggestions", json!([]));
                default_key(&mut result, "needs_clarification", json!(false));
                default_key(&mut result, "clarification_questions", json!([]));
                Ok(result)
            }
            // A garbled chat reply is answered with an apology, not corrected
            None => Ok(into_object(json!({
                "message": "I apologize, I'm having trouble processing your request. Could you please rephrase?",
                "intent": "error",
                "actions": [],
                "suggestions": ["Try rephrasing your question", "Use specific commands"],
                "needs_clarification": true,
                "clarification_questions": ["What would you like help with?"],
                "confidence_score": 0.3,
                "error": "JSON parsing failed",
            }))),
        }
    }
}

fn build_prompt(input: &Value) -> String {
    let history = array(input, "conversation_history");
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    let recent = if recent.is_empty() {
        "First message".to_string()
    } else {
        pretty(recent)
    };

    let user_context = field(input, "user_context");

    format!(
        "User Context:\n\
         - Active Tenders: {active}\n\
         - Company: {company}\n\
         - Credit Balance: {credits}\n\n\
         Recent Conversation:\n{recent}\n\n\
         User Message: \"{message}\"\n\n\
         Work out what the user wants and answer helpfully. If they ask for an action, \
         return the matching agent actions with parameters, and mention the credit cost. \
         Suggest next steps.\n\n\
         Return ONLY valid JSON in the specified format.",
        active = array(user_context, "active_tenders").len(),
        company = str_or(user_context, "company_name", "Unknown"),
        credits = user_context
            .get("credit_balance")
            .map_or_else(|| "0".to_string(), |v| display_or_na(Some(v))),
        message = str_or(input, "user_message", ""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NEEDS_CORRECTION;
    use crate::test_support::StubModel;

    #[test]
    fn prompt_keeps_last_five_turns() {
        let history: Vec<Value> = (1..=7)
            .map(|i| json!({ "role": "user", "content": format!("turn-{i}") }))
            .collect();
        let input = json!({
            "user_message": "what next?",
            "conversation_history": history,
            "user_context": { "company_name": "Acme", "credit_balance": 42, "active_tenders": [{}, {}] }
        });

        let prompt = build_prompt(&input);

        assert!(!prompt.contains("turn-2"));
        assert!(prompt.contains("turn-3"));
        assert!(prompt.contains("turn-7"));
        assert!(prompt.contains("- Company: Acme"));
        assert!(prompt.contains("- Credit Balance: 42"));
        assert!(prompt.contains("- Active Tenders: 2"));
    }

    #[test]
    fn first_message_has_no_history() {
        let prompt = build_prompt(&json!({ "user_message": "hi" }));
        assert!(prompt.contains("First message"));
        assert!(prompt.contains("- Credit Balance: 0"));
    }

    #[tokio::test]
    async fn defaults_are_filled() {
        let stub = StubModel::new().fallback(r#"{"message": "Hello!", "intent": "question"}"#);
        let mut chat = ChatSession::new(&stub, "gpt-4o-mini", SYSTEM_PROMPT);

        let result = AssistantAgent
            .process(&mut chat, &json!({ "user_message": "hi" }), &UserContext::default())
            .await
            .unwrap();

        assert_eq!(result["actions"], json!([]));
        assert_eq!(result["needs_clarification"], false);
        assert_eq!(result["confidence_score"], 0.85);
        assert!(!result.contains_key(NEEDS_CORRECTION));
    }

    #[tokio::test]
    async fn unparseable_reply_apologises_without_correction() {
        let stub = StubModel::new().fallback("hmm");
        let mut chat = ChatSession::new(&stub, "gpt-4o-mini", SYSTEM_PROMPT);

        let result = AssistantAgent
            .process(&mut chat, &json!({}), &UserContext::default())
            .await
            .unwrap();

        assert_eq!(result["intent"], "error");
        assert!(!result.contains_key(NEEDS_CORRECTION));
    }
}
