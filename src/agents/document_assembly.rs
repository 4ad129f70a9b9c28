use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{array, field, head, into_object, is_blank, parse_object, pretty, pretty_or, JsonObject};
use super::{require_keys, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the Document Assembly Agent for HexaBid.
You assemble tender submission documents: cover letter, technical compliance
statement, financial bid (BOQ), supporting documents list and submission checklist.

Use professional government tender language with clear numbered sections and
placeholders for the company letterhead, signature and seal.

Respond with a single JSON object:
{
  "documents": [
    {
      "document_type": "cover_letter|technical_bid|financial_bid|compliance_statement|checklist",
      "title": "string",
      "content": "string (markdown)",
      "page_count": number,
      "requires_signature": boolean,
      "requires_seal": boolean
    }
  ],
  "submission_package_summary": {
    "total_documents": number,
    "ready_to_submit": boolean,
    "missing_items": ["string"],
    "instructions": "string"
  },
  "checklist": [
    { "item": "string", "status": "completed|pending|not_required", "notes": "string" }
  ]
}"#;

const REQUIREMENT_SAMPLE: usize = 5;

pub struct DocumentAssemblyAgent;

#[async_trait]
impl Agent for DocumentAssemblyAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::DocumentAssembly
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
                require_keys(&mut result, &["documents"]);
                Ok(result)
            }
            None => Ok(into_object(json!({
                "documents": [{
                    "document_type": "error",
                    "title": "Document Generation Error",
                    "content": head(&reply, 1000),
                }],
                "error": "Unable to generate documents",
                NEEDS_CORRECTION: true,
            }))),
        }
    }
}

fn build_prompt(input: &Value, ctx: &UserContext) -> String {
    let boq = field(input, "boq");
    let boq_summary = if is_blank(boq) {
        "BOQ not available".to_string()
    } else {
        pretty(field(boq, "pricing_summary"))
    };

    let profile = match field(input, "company_profile") {
        p if is_blank(p) => ctx.company_profile(),
        p => p,
    };

    let requirements = array(input, "technical_requirements");
    let requirements = if requirements.is_empty() {
        "Not specified".to_string()
    } else {
        pretty(&requirements[..requirements.len().min(REQUIREMENT_SAMPLE)])
    };

    format!(
        "Assemble the tender submission documents.\n\n\
         Tender Information:\n{tender}\n\n\
         Company Profile:\n{profile}\n\n\
         BOQ Summary:\n{boq_summary}\n\n\
         Technical Requirements:\n{requirements}\n\n\
         Mandatory Documents:\n{mandatory}\n\n\
         Write a cover letter with company credentials, a clause-by-clause technical \
         compliance statement (YES/NO/PARTIAL), a formatted financial bid covering every \
         line item and a submission checklist with the status of each document.\n\n\
         Return ONLY valid JSON in the specified format.",
        tender = pretty_or(field(input, "tender_info"), "Simulate a typical government IT tender"),
        profile = pretty_or(profile, "Use placeholder company details"),
        mandatory = pretty_or(field(input, "mandatory_documents"), "Standard documents"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_falls_back_to_context() {
        let ctx = UserContext {
            company_profile: Some(json!({ "companyName": "Acme Infotech" })),
            ..Default::default()
        };

        let prompt = build_prompt(&json!({}), &ctx);

        assert!(prompt.contains("Acme Infotech"));
        assert!(prompt.contains("BOQ not available"));
        assert!(prompt.contains("Standard documents"));
    }

    #[test]
    fn only_boq_summary_is_embedded() {
        let input = json!({
            "boq": {
                "line_items": [{ "description": "SECRET-LINE" }],
                "pricing_summary": { "grand_total": 1180000 }
            }
        });

        let prompt = build_prompt(&input, &UserContext::default());

        assert!(prompt.contains("1180000"));
        assert!(!prompt.contains("SECRET-LINE"));
        assert!(prompt.contains("Use placeholder company details"));
    }
}
