use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{head, into_object, parse_object, str_or, JsonObject};
use super::{require_keys, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the Document Parser Agent for HexaBid.
You read tender documents and extract their contents as structured data:
specifications, BOQ items with quantities, technical compliance clauses,
submission instructions, mandatory documents, evaluation criteria and EMD terms.

Respond with a single JSON object:
{
  "tender_info": {
    "tender_number": "string",
    "title": "string",
    "organization": "string",
    "description": "string"
  },
  "scope_of_work": "string",
  "boq_items": [
    {
      "item_number": "string",
      "description": "string",
      "specification": "string",
      "quantity": number,
      "unit": "string",
      "estimated_rate": number (optional)
    }
  ],
  "technical_requirements": [
    { "clause_number": "string", "requirement": "string", "mandatory": boolean, "compliance_needed": "string" }
  ],
  "mandatory_documents": ["string"],
  "submission_details": {
    "deadline": "YYYY-MM-DD HH:MM",
    "submission_mode": "online|offline|hybrid",
    "address": "string (offline only)",
    "portal_link": "string (online only)"
  },
  "evaluation_criteria": { "technical_score": number, "financial_score": number, "method": "string" },
  "emd_details": { "amount": number, "mode": "string", "exemption_clauses": ["string"] },
  "key_dates": [ { "event": "string", "date": "YYYY-MM-DD" } ]
}"#;

/// Documents longer than this are cut before prompting.
pub const MAX_DOCUMENT_CHARS: usize = 15_000;

const TRUNCATION_MARKER: &str = "\n\n[Document truncated for processing...]";

pub struct DocumentParserAgent;

#[async_trait]
impl Agent for DocumentParserAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::DocumentParser
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
        let tender_number = str_or(input, "tender_number", "Unknown");
        let reply = chat.send(build_prompt(input, tender_number)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                require_keys(&mut result, &["tender_info", "boq_items"]);
                Ok(result)
            }
            None => Ok(into_object(json!({
                "tender_info": { "tender_number": tender_number, "title": "Parsing Error" },
                "boq_items": [],
                "error": "Unable to parse document",
                "raw_response": head(&reply, 500),
                NEEDS_CORRECTION: true,
            }))),
        }
    }
}

fn truncate_document(text: &str) -> String {
    if text.chars().count() > MAX_DOCUMENT_CHARS {
        format!("{}{}", head(text, MAX_DOCUMENT_CHARS), TRUNCATION_MARKER)
    } else {
        text.to_string()
    }
}

fn build_prompt(input: &Value, tender_number: &str) -> String {
    let document_text = truncate_document(str_or(input, "document_text", ""));
    let document_url = match str_or(input, "document_url", "") {
        "" => "Not provided",
        url => url,
    };
    let content = if document_text.is_empty() {
        "Document content not provided. Simulate parsing a typical IT hardware tender document."
            .to_string()
    } else {
        document_text
    };

    format!(
        "Parse this tender document and extract everything relevant.\n\n\
         Tender Number: {tender_number}\n\
         Document URL: {document_url}\n\n\
         Document Content:\n{content}\n\n\
         Extract the basic tender information, scope of work, every BOQ line item with its \
         specification, technical compliance requirements, mandatory submission documents, \
         submission details and deadlines, evaluation criteria, EMD details and all key dates.\n\n\
         Return ONLY valid JSON in the specified format. If no document text was given, \
         simulate parsing a typical government IT hardware procurement tender."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_documents_are_truncated_with_marker() {
        let text = "x".repeat(MAX_DOCUMENT_CHARS + 10);
        let truncated = truncate_document(&text);

        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            truncated.chars().count(),
            MAX_DOCUMENT_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn short_documents_are_untouched() {
        assert_eq!(truncate_document("Tender for 40 laptops"), "Tender for 40 laptops");
    }

    #[test]
    fn prompt_without_document_asks_for_simulation() {
        let prompt = build_prompt(&json!({}), "Unknown");
        assert!(prompt.contains("Tender Number: Unknown"));
        assert!(prompt.contains("Document URL: Not provided"));
        assert!(prompt.contains("Document content not provided"));
    }
}
