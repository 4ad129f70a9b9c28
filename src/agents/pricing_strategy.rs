use async_trait::async_trait;
use serde_json::{json, Value};

use super::reply::{array, f64_or, field, format_amount, into_object, parse_object, pretty, pretty_or, str_or, JsonObject};
use super::{default_key, now_iso, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the Pricing Strategy Agent for HexaBid.
From the BOQ, OEM quotes, price history and competitor intelligence you build exactly
three pricing scenarios and recommend one, with reasoning and a predicted win probability.

Scenarios:
- aggressive: 5-8% margin, win probability 0.7-0.9, targets the L1 position
- balanced: 10-15% margin, win probability 0.5-0.7
- conservative: 18-25% margin, win probability 0.2-0.4

Government tenders are usually awarded to the lowest bidder (L1). A high EMD,
a complex tender or stringent technical requirements mean fewer bidders.

Respond with a single JSON object:
{
  "tender_id": "string",
  "scenarios": [
    {
      "scenario_name": "aggressive|balanced|conservative",
      "total_bid_value": number,
      "margin_percentage": number,
      "profit_amount": number,
      "win_probability": number (0-1),
      "reasoning": "string",
      "risks": ["string"],
      "advantages": ["string"]
    }
  ],
  "recommended_scenario": "aggressive|balanced|conservative",
  "competitor_intelligence": {
    "estimated_competitors": number,
    "likely_l1_price": number,
    "our_rank_prediction": number,
    "market_dynamics": "string"
  },
  "price_optimization_suggestions": ["string"],
  "confidence_score": number (0-1),
  "generation_timestamp": "ISO datetime"
}"#;

const SCENARIO_COUNT: usize = 3;

pub struct PricingStrategyAgent;

#[async_trait]
impl Agent for PricingStrategyAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::PricingStrategy
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
        let tender_id = str_or(input, "tender_id", "Unknown");
        let reply = chat.send(build_prompt(input, tender_id)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                let scenarios = result
                    .get("scenarios")
                    .and_then(Value::as_array)
                    .map(Vec::len);
                if scenarios != Some(SCENARIO_COUNT) {
                    result.insert(NEEDS_CORRECTION.to_string(), Value::Bool(true));
                }
                default_key(&mut result, "generation_timestamp", now_iso());
                default_key(&mut result, "confidence_score", json!(0.85));
                Ok(result)
            }
            None => Ok(into_object(json!({
                "tender_id": tender_id,
                "scenarios": [],
                "recommended_scenario": "balanced",
                "competitor_intelligence": {
                    "estimated_competitors": 0,
                    "market_dynamics": "Unable to analyze"
                },
                "price_optimization_suggestions": ["Manual pricing analysis required"],
                "error": "JSON parsing failed",
                "confidence_score": 0.3,
                NEEDS_CORRECTION: true,
            }))),
        }
    }
}

/// Our cost from a BOQ result: the stated total, else the sum of line items.
pub(crate) fn boq_total(boq: &Value) -> f64 {
    let stated = boq
        .get("total_our_value")
        .or_else(|| boq.pointer("/pricing_summary/our_total_value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if stated > 0.0 {
        return stated;
    }
    array(boq, "line_items")
        .iter()
        .map(|item| f64_or(item, "total_amount", 0.0))
        .sum()
}

fn lowest_quote(quotes: &[Value]) -> f64 {
    quotes
        .iter()
        .map(|q| f64_or(q, "total_quoted_value", 0.0))
        .reduce(f64::min)
        .unwrap_or(0.0)
}

fn build_prompt(input: &Value, tender_id: &str) -> String {
    let boq = field(input, "boq");
    let quotes = array(input, "vendor_quotes");

    let quote_summary = if quotes.is_empty() {
        "No vendor quotes".to_string()
    } else {
        let rows: Vec<Value> = quotes
            .iter()
            .map(|q| json!({ "vendor": q.get("vendor_name"), "total": q.get("total_quoted_value") }))
            .collect();
        pretty(&rows)
    };

    format!(
        "Build the pricing strategy for this tender.\n\n\
         Tender ID: {tender_id}\n\
         Estimated Tender Value: ₹{estimated}\n\
         EMD Amount: ₹{emd}\n\
         Our Base Cost: ₹{cost}\n\
         Lowest Vendor Quote: ₹{lowest}\n\
         Target Margin: {margin}%\n\n\
         BOQ Line Items: {items}\n\n\
         Vendor Quotes Received: {quote_count}\n{quote_summary}\n\n\
         Historical Data:\n{history}\n\n\
         Produce the aggressive, balanced and conservative scenarios with bid value, profit, \
         win probability, risks and advantages for each. Recommend one scenario considering \
         the EMD, tender complexity, our capacity and strategic importance. Estimate the number \
         of bidders, the likely L1 price and our rank, describe the market dynamics and add \
         price optimisation suggestions.\n\n\
         Return ONLY valid JSON in the specified format.",
        estimated = format_amount(f64_or(input, "estimated_value", 0.0)),
        emd = format_amount(f64_or(input, "emd_amount", 0.0)),
        cost = format_amount(boq_total(boq)),
        lowest = format_amount(lowest_quote(quotes)),
        margin = f64_or(input, "target_margin", 12.0),
        items = array(boq, "line_items").len(),
        quote_count = quotes.len(),
        history = pretty_or(
            field(input, "price_history"),
            "No historical data - use industry benchmarks"
        ),
    )
}
