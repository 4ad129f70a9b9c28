use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{array, f64_or, into_object, parse_object, pretty, str_or, JsonObject};
use super::{require_keys, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the Tender Discovery Agent for HexaBid, an Indian government tender bidding platform.
You match a bidder's requirements against tender opportunities and rank them.

You can:
- match requirements against tenders from GeM, eProcure, CPPP or manual entries
- extract the key tender details (number, title, organization, deadline, value)
- filter by category, location and value range
- rank tenders by how likely the bidder is to win

Respond with a single JSON object:
{
  "discovered_tenders": [
    {
      "tender_number": "string",
      "title": "string",
      "organization": "string",
      "department": "string",
      "category": "string",
      "location": "string",
      "publish_date": "YYYY-MM-DD",
      "submission_deadline": "YYYY-MM-DD",
      "tender_value": number,
      "emd_amount": number,
      "source": "gem|eprocure|cppp|manual",
      "document_url": "string",
      "match_score": number (0-100),
      "win_probability": "high|medium|low",
      "key_requirements": ["string"]
    }
  ],
  "search_summary": "string",
  "total_found": number,
  "recommendations": ["string"]
}"#;

/// Upper bound of the default value range, ₹1000 crore.
const MAX_TENDER_VALUE: f64 = 10_000_000_000.0;

pub struct TenderDiscoveryAgent;

#[async_trait]
impl Agent for TenderDiscoveryAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::TenderDiscovery
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    async fn process(
        &self,
        chat: &mut ChatSession<'_>,
        input: &Value,
        ctx: &UserContext,
    ) -> Result<JsonObject, AgentError> {
        let reply = chat.send(build_prompt(input, ctx)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                require_keys(&mut result, &["discovered_tenders"]);
                Ok(result)
            }
            None => Ok(fallback(reply)),
        }
    }
}

fn build_prompt(input: &Value, ctx: &UserContext) -> String {
    let keywords: Vec<&str> = array(input, "keywords")
        .iter()
        .filter_map(Value::as_str)
        .collect();

    // Tenders passed with the request win over the user's stored ones
    let existing = match array(input, "existing_tenders_db") {
        [] => ctx.existing_tenders_db.as_slice(),
        tenders => tenders,
    };
    let existing = if existing.is_empty() {
        "None - simulate discovery".to_string()
    } else {
        pretty(existing)
    };

    format!(
        "Find tenders matching these criteria.\n\n\
         Search Query: {query}\n\
         Category: {category}\n\
         Location: {location}\n\
         Value Range: ₹{min} - ₹{max}\n\
         Keywords: {keywords}\n\n\
         Existing Tenders in Database:\n{existing}\n\n\
         Steps:\n\
         1. If existing tenders are listed, filter and rank them by match score.\n\
         2. Otherwise simulate discovering 5-10 relevant tenders from GeM or eProcure.\n\
         3. Score each tender's match_score (0-100) against the requirements.\n\
         4. Rate win_probability as high, medium or low.\n\
         5. List the key_requirements of every tender.\n\
         6. Recommend the best opportunities.\n\n\
         Return ONLY valid JSON in the specified format.",
        query = str_or(input, "search_query", ""),
        category = str_or(input, "category", "All"),
        location = str_or(input, "location", "All India"),
        min = f64_or(input, "min_value", 0.0),
        max = f64_or(input, "max_value", MAX_TENDER_VALUE),
        keywords = if keywords.is_empty() {
            "None".to_string()
        } else {
            keywords.join(", ")
        },
    )
}

fn fallback(reply: String) -> JsonObject {
    into_object(json!({
        "discovered_tenders": [],
        "search_summary": reply,
        "total_found": 0,
        "recommendations": ["Unable to parse tender discovery results"],
        NEEDS_CORRECTION: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_uses_defaults_and_context_tenders() {
        let ctx = UserContext {
            existing_tenders_db: vec![json!({ "tender_number": "GEM/2025/B/42" })],
            ..Default::default()
        };

        let prompt = build_prompt(&json!({ "search_query": "laptops" }), &ctx);

        assert!(prompt.contains("Search Query: laptops"));
        assert!(prompt.contains("Category: All\n"));
        assert!(prompt.contains("Location: All India"));
        assert!(prompt.contains("Keywords: None"));
        assert!(prompt.contains("GEM/2025/B/42"));
    }

    #[test]
    fn request_tenders_override_context() {
        let ctx = UserContext {
            existing_tenders_db: vec![json!({ "tender_number": "FROM-CONTEXT" })],
            ..Default::default()
        };
        let input = json!({
            "keywords": ["servers", "storage"],
            "existing_tenders_db": [{ "tender_number": "FROM-REQUEST" }]
        });

        let prompt = build_prompt(&input, &ctx);

        assert!(prompt.contains("Keywords: servers, storage"));
        assert!(prompt.contains("FROM-REQUEST"));
        assert!(!prompt.contains("FROM-CONTEXT"));
    }

    #[test]
    fn fallback_keeps_raw_reply() {
        let result = fallback("no json here".to_string());
        assert_eq!(result["search_summary"], "no json here");
        assert_eq!(result["total_found"], 0);
        assert_eq!(result[NEEDS_CORRECTION], true);
    }
}
