use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{json, Value};

use super::reply::{array, head, into_object, parse_object, pretty, pretty_or, str_or, JsonObject};
use super::{default_key, require_keys, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the HexaBid RFQ Agent.
You write RFQ emails and WhatsApp messages for OEMs and vendors, and you parse the
quotations they send back into structured vendor quotes.

Emails are formal: subject line, greeting, RFQ reference, a table of line items,
submission deadline, contact details and a professional closing.
WhatsApp messages are short: greeting, RFQ reference, item summary, deadline,
a link to the full RFQ and a contact number.

Respond with a single JSON object:
{
  "rfqs_generated": [
    {
      "rfq_number": "string",
      "vendor_id": "string",
      "vendor_name": "string",
      "line_items": [
        { "item_number": "string", "description": "string", "specification": "string", "quantity": number, "unit": "string", "target_price": number (optional) }
      ],
      "submission_deadline": "ISO datetime",
      "email_template": "string",
      "whatsapp_template": "string",
      "sent": boolean
    }
  ],
  "quotes_received": [
    {
      "quote_id": "string",
      "rfq_id": "string",
      "vendor_id": "string",
      "vendor_name": "string",
      "quote_lines": [
        { "item_number": "string", "quoted_price": number, "brand": "string", "model": "string", "lead_time_days": number, "warranty_months": number }
      ],
      "total_quoted_value": number,
      "valid_until": "YYYY-MM-DD",
      "terms_and_conditions": "string",
      "received_at": "ISO datetime",
      "confidence_score": number (0-1)
    }
  ],
  "summary": "string",
  "recommendations": ["string"],
  "confidence_score": number (0-1)
}"#;

pub struct RfqVendorAgent;

#[async_trait]
impl Agent for RfqVendorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::RfqVendor
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
        match str_or(input, "mode", "generate_rfq") {
            "generate_rfq" => generate_rfqs(chat, input, ctx).await,
            "parse_quotes" => parse_quotes(chat, input).await,
            other => Err(AgentError::InvalidInput(format!("Invalid mode: {other}"))),
        }
    }
}

/// Vendors used when neither the request nor the user has any.
fn demo_vendors() -> Vec<Value> {
    vec![
        json!({ "id": "V001", "name": "Dell India", "email": "sales@dell.co.in" }),
        json!({ "id": "V002", "name": "HP India", "email": "enquiry@hp.com" }),
        json!({ "id": "V003", "name": "Lenovo Distributor", "email": "quotes@lenovo-dist.in" }),
    ]
}

fn select_vendors(input: &Value, ctx: &UserContext) -> Vec<Value> {
    match array(input, "vendors") {
        [] if !ctx.vendors.is_empty() => ctx.vendors.clone(),
        [] => demo_vendors(),
        vendors => vendors.to_vec(),
    }
}

async fn generate_rfqs(
    chat: &mut ChatSession<'_>,
    input: &Value,
    ctx: &UserContext,
) -> Result<JsonObject, AgentError> {
    let tender_id = str_or(input, "tender_id", "Unknown");
    let vendors = select_vendors(input, ctx);
    let deadline_days = input
        .get("deadline_days")
        .and_then(Value::as_i64)
        .unwrap_or(7);
    let deadline = TimeDelta::try_days(deadline_days)
        .and_then(|days| Utc::now().checked_add_signed(days))
        .ok_or_else(|| {
            AgentError::InvalidInput(format!("deadline_days out of range: {deadline_days}"))
        })?
        .to_rfc3339();
    let company = ctx
        .company_profile()
        .get("companyName")
        .and_then(Value::as_str)
        .unwrap_or("HexaBid User");

    let prompt = format!(
        "Generate RFQs for this tender.\n\n\
         Tender ID: {tender_id}\n\
         Company: {company}\n\n\
         BOQ Items:\n{boq_items}\n\n\
         Vendors:\n{vendors}\n\n\
         Submission Deadline: {deadline}\n\n\
         For each vendor produce the complete RFQ with all line items, a formal email \
         template (subject, body with item table, deadline, contact) and a short WhatsApp \
         template with the key details. Number RFQs as RFQ-{tender_id}-{{vendor_id}}-{{YYMMDD}}.\n\n\
         Return ONLY valid JSON in the specified format. Set sent=false; nothing is sent yet.",
        boq_items = pretty_or(
            input.get("boq_items").unwrap_or(&Value::Null),
            "Simulate a typical IT hardware BOQ (5 items)"
        ),
        vendors = pretty(&vendors),
    );

    let reply = chat.send(prompt).await?;

    match parse_object(&reply) {
        Some(mut result) => {
            require_keys(&mut result, &["rfqs_generated"]);
            let generated = result
                .get("rfqs_generated")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            default_key(
                &mut result,
                "summary",
                json!(format!("Generated {generated} RFQs for {} vendors", vendors.len())),
            );
            default_key(&mut result, "confidence_score", json!(0.9));
            Ok(result)
        }
        None => Ok(into_object(json!({
            "rfqs_generated": [],
            "quotes_received": [],
            "summary": "Failed to generate RFQs",
            "recommendations": ["Manual RFQ creation needed"],
            "error": "JSON parsing failed",
            "raw_response": head(&reply, 500),
            "confidence_score": 0.3,
            NEEDS_CORRECTION: true,
        }))),
    }
}

async fn parse_quotes(
    chat: &mut ChatSession<'_>,
    input: &Value,
) -> Result<JsonObject, AgentError> {
    let quotes = array(input, "vendor_quotes_text");
    if quotes.is_empty() {
        return Ok(into_object(json!({
            "rfqs_generated": [],
            "quotes_received": [],
            "summary": "No vendor quotes to parse",
            "recommendations": ["Wait for vendor responses"],
            "confidence_score": 1.0,
        })));
    }

    let prompt = format!(
        "Parse these vendor quotations into structured data.\n\n\
         RFQ ID: {rfq_id}\n\n\
         Vendor Quotes:\n{quotes}\n\n\
         For each quote extract every line item price, brand and model, lead time in days, \
         warranty in months, the total quoted value, validity date and terms and conditions.\n\n\
         Return ONLY valid JSON in the specified format with rfqs_generated left empty. \
         Base confidence_score on how complete the data is and list missing information \
         under recommendations.",
        rfq_id = str_or(input, "rfq_id", "Unknown"),
        quotes = pretty(quotes),
    );

    let reply = chat.send(prompt).await?;

    match parse_object(&reply) {
        Some(mut result) => {
            require_keys(&mut result, &["quotes_received"]);
            Ok(result)
        }
        None => Ok(into_object(json!({
            "rfqs_generated": [],
            "quotes_received": [],
            "summary": "Failed to parse vendor quotes",
            "recommendations": ["Manual quote parsing needed"],
            "error": "JSON parsing failed",
            "confidence_score": 0.3,
            NEEDS_CORRECTION: true,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::test_support::StubModel;

    #[test]
    fn vendors_fall_back_to_context_then_demo() {
        let ctx = UserContext {
            vendors: vec![json!({ "id": "CTX" })],
            ..Default::default()
        };
        assert_eq!(select_vendors(&json!({}), &ctx)[0]["id"], "CTX");

        let demo = select_vendors(&json!({}), &UserContext::default());
        assert_eq!(demo.len(), 3);
        assert_eq!(demo[2]["email"], "quotes@lenovo-dist.in");

        let given = select_vendors(&json!({ "vendors": [{ "id": "REQ" }] }), &ctx);
        assert_eq!(given[0]["id"], "REQ");
    }

    #[tokio::test]
    async fn summary_and_confidence_are_defaulted() {
        let stub = StubModel::new().fallback(r#"{"rfqs_generated": [{}, {}]}"#);
        let models = ModelConfig::default();
        let mut chat = ChatSession::new(&stub, &models.reasoning, SYSTEM_PROMPT);

        let result = RfqVendorAgent
            .process(&mut chat, &json!({}), &UserContext::default())
            .await
            .unwrap();

        assert_eq!(result["summary"], "Generated 2 RFQs for 3 vendors");
        assert_eq!(result["confidence_score"], 0.9);
    }

    #[tokio::test]
    async fn oversized_deadline_is_invalid_input() {
        let stub = StubModel::new().fallback("{}");
        let mut chat = ChatSession::new(&stub, "gpt-5", SYSTEM_PROMPT);

        let err = RfqVendorAgent
            .process(
                &mut chat,
                &json!({ "deadline_days": 1_000_000_000_i64 }),
                &UserContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid input: deadline_days out of range: 1000000000"
        );
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_quote_list_skips_the_model() {
        let stub = StubModel::new().fallback("{}");
        let mut chat = ChatSession::new(&stub, "gpt-5", SYSTEM_PROMPT);

        let result = RfqVendorAgent
            .process(&mut chat, &json!({ "mode": "parse_quotes" }), &UserContext::default())
            .await
            .unwrap();

        assert_eq!(result["summary"], "No vendor quotes to parse");
        assert_eq!(result["confidence_score"], 1.0);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let stub = StubModel::new().fallback("{}");
        let mut chat = ChatSession::new(&stub, "gpt-5", SYSTEM_PROMPT);

        let err = RfqVendorAgent
            .process(&mut chat, &json!({ "mode": "negotiate" }), &UserContext::default())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid input: Invalid mode: negotiate");
    }
}
