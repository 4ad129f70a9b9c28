use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{array, f64_or, head, into_object, parse_object, pretty, pretty_or, str_or, JsonObject};
use super::{require_keys, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the BOQ Generator Agent for HexaBid.
You turn tender requirements into a priced Bill of Quantities: market-based rates,
margins, taxes and duties, additional costs and cost optimisation ideas.

Pricing guidelines:
- government tenders usually carry a 10-15% margin
- aim for L1 pricing on competitive bids
- account for GST, transport and installation
- include warranty and AMC costs

Respond with a single JSON object:
{
  "boq_number": "string",
  "title": "string",
  "line_items": [
    {
      "item_number": "string",
      "description": "string",
      "specification": "string",
      "quantity": number,
      "unit": "string",
      "estimated_rate": number,
      "our_rate": number,
      "our_rate_breakdown": { "base_price": number, "margin": number, "gst": number, "other_charges": number },
      "total_amount": number,
      "brand_model": "string",
      "lead_time_days": number,
      "warranty_months": number,
      "remarks": "string"
    }
  ],
  "pricing_summary": {
    "total_estimated_value": number,
    "our_total_value": number,
    "subtotal": number,
    "gst_18_percent": number,
    "grand_total": number,
    "margin_percentage": number,
    "profit_amount": number
  },
  "additional_costs": { "transportation": number, "installation": number, "training": number, "amc_3_years": number },
  "pricing_strategy": "string",
  "competitive_analysis": "string",
  "cost_optimization_suggestions": ["string"]
}"#;

/// Catalogue entries shown to the model.
const CATALOG_SAMPLE: usize = 5;

pub struct BoqGeneratorAgent;

#[async_trait]
impl Agent for BoqGeneratorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::BoqGenerator
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
        let tender_id = str_or(input, "tender_id", "Unknown");
        let reply = chat.send(build_prompt(input, ctx, tender_id)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                require_keys(&mut result, &["line_items", "pricing_summary"]);
                fill_pricing_summary(&mut result);
                Ok(result)
            }
            None => Ok(into_object(json!({
                "boq_number": format!("BOQ-{tender_id}"),
                "line_items": [],
                "error": "Unable to generate BOQ",
                "raw_response": head(&reply, 500),
                NEEDS_CORRECTION: true,
            }))),
        }
    }
}

fn build_prompt(input: &Value, ctx: &UserContext, tender_id: &str) -> String {
    let boq_items = pretty_or(
        input.get("boq_items").unwrap_or(&Value::Null),
        "No items provided - simulate a typical IT hardware BOQ",
    );

    let catalog = match array(input, "product_catalog") {
        [] => ctx.product_catalog.as_slice(),
        items => items,
    };
    let catalog = if catalog.is_empty() {
        "Not available - use market rates".to_string()
    } else {
        pretty(&catalog[..catalog.len().min(CATALOG_SAMPLE)])
    };

    let market_rates = pretty_or(
        input.get("market_rates").unwrap_or(&Value::Null),
        "Use current market rates for IT hardware",
    );

    format!(
        "Generate a competitively priced BOQ for tender: {tender_id}\n\n\
         BOQ Items (from the document parser):\n{boq_items}\n\n\
         Product Catalog:\n{catalog}\n\n\
         Market Rates Reference:\n{market_rates}\n\n\
         Pricing Strategy: {strategy}\n\
         Target Margin: {margin}%\n\n\
         For every item give our_rate with its breakdown (base, margin, GST, other charges), \
         benchmarked against estimated_rate where available. Suggest a brand and model, \
         lead time and warranty. Total everything with GST at 18% and add transportation, \
         installation, training and AMC costs. Explain the pricing strategy and list cost \
         optimisation opportunities. Government tenders are usually L1 focused.\n\n\
         Return ONLY valid JSON in the specified format.",
        strategy = str_or(input, "pricing_strategy", "competitive"),
        margin = f64_or(input, "target_margin", 12.0),
    )
}

/// Derive a minimal pricing summary from the line items when the model
/// left it out.
fn fill_pricing_summary(result: &mut JsonObject) {
    if result.contains_key("pricing_summary") {
        return;
    }
    let Some(items) = result.get("line_items").and_then(Value::as_array) else {
        return;
    };

    let num = |item: &Value, key: &str| item.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    let total_estimated: f64 = items
        .iter()
        .map(|item| num(item, "estimated_rate") * num(item, "quantity"))
        .sum();
    let our_total: f64 = items.iter().map(|item| num(item, "total_amount")).sum();
    let margin_percentage = if total_estimated > 0.0 {
        (our_total - total_estimated) / total_estimated * 100.0
    } else {
        0.0
    };

    result.insert(
        "pricing_summary".to_string(),
        json!({
            "total_estimated_value": total_estimated,
            "our_total_value": our_total,
            "margin_percentage": margin_percentage,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_summary_is_computed_from_line_items() {
        let mut result = into_object(json!({
            "line_items": [
                { "estimated_rate": 50000.0, "quantity": 10, "total_amount": 550000.0 },
                { "estimated_rate": 1000.0, "quantity": 50, "total_amount": 45000.0 }
            ]
        }));

        fill_pricing_summary(&mut result);

        let summary = &result["pricing_summary"];
        assert_eq!(summary["total_estimated_value"], 550000.0);
        assert_eq!(summary["our_total_value"], 595000.0);
        let margin = summary["margin_percentage"].as_f64().unwrap();
        assert!((margin - 8.1818).abs() < 0.001);
    }

    #[test]
    fn zero_estimate_gives_zero_margin() {
        let mut result = into_object(json!({ "line_items": [{ "total_amount": 100.0 }] }));
        fill_pricing_summary(&mut result);
        assert_eq!(result["pricing_summary"]["margin_percentage"], 0.0);
    }

    #[test]
    fn model_summary_is_kept() {
        let mut result = into_object(json!({
            "line_items": [],
            "pricing_summary": { "grand_total": 1.0 }
        }));
        fill_pricing_summary(&mut result);
        assert_eq!(result["pricing_summary"], json!({ "grand_total": 1.0 }));
    }

    #[test]
    fn prompt_samples_catalog_from_context() {
        let ctx = UserContext {
            product_catalog: (0..8).map(|i| json!({ "sku": format!("SKU-{i}") })).collect(),
            ..Default::default()
        };

        let prompt = build_prompt(&json!({ "target_margin": 15 }), &ctx, "T-1");

        assert!(prompt.contains("SKU-4"));
        assert!(!prompt.contains("SKU-5"));
        assert!(prompt.contains("Target Margin: 15%"));
        assert!(prompt.contains("Pricing Strategy: competitive"));
    }
}
