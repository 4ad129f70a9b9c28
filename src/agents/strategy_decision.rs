use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::pricing_strategy::boq_total;
use super::reply::{array, display_or_na, field, format_amount, into_object, is_blank, parse_object, str_or, JsonObject};
use super::{default_key, now_iso, Agent, AgentError, ChatSession, NEEDS_CORRECTION};
use crate::domain::agents::{AgentKind, UserContext};

const SYSTEM_PROMPT: &str = r#"You are the Strategy Decision Agent for HexaBid.
You combine the discovery, parsing, BOQ, pricing and risk reports into a single
BID, NO-BID or NEEDS_INFO decision.

BID when relevance is high (> 70), we are eligible and compliant, risk is acceptable
(< 60), the bid is financially viable and win probability is reasonable (> 30%).
NO-BID when relevance is low (< 40), we are not eligible, critical risks are
unmitigated, the bid is not viable or win probability is very low (< 15%).
NEEDS_INFO when relevance is medium, eligibility is conditional, critical
information is missing or compliance gaps need clarification.

Respond with a single JSON object:
{
  "tender_id": "string",
  "decision": "BID|NO-BID|NEEDS_INFO",
  "confidence": number (0-1),
  "reasoning": "string",
  "decision_factors": {
    "discovery_score": number (0-100),
    "technical_feasibility": number (0-100),
    "pricing_competitiveness": number (0-100),
    "risk_score": number (0-100),
    "resource_availability": number (0-100),
    "strategic_importance": number (0-100)
  },
  "key_considerations": ["string"],
  "recommended_actions": ["string"],
  "conditions": ["string"],
  "expected_effort_hours": number,
  "expected_cost": number,
  "strategic_notes": "string",
  "decision_timestamp": "ISO datetime"
}"#;

pub const BID: &str = "BID";
pub const NO_BID: &str = "NO-BID";
pub const NEEDS_INFO: &str = "NEEDS_INFO";

/// Scores (0-100) the decision is weighed on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionFactors {
    pub discovery_score: f64,
    pub technical_feasibility: f64,
    pub pricing_competitiveness: f64,
    pub risk_score: f64,
    pub resource_availability: f64,
    pub strategic_importance: f64,
}

impl DecisionFactors {
    /// Derive the factors from upstream agent outputs.
    pub fn derive(input: &Value) -> Self {
        let discovery = field(input, "discovery_result");
        let boq = field(input, "boq");
        let pricing = field(input, "pricing");
        let risk = field(input, "risk_report");

        let discovery_score = if is_blank(discovery) {
            70.0
        } else {
            array(discovery, "discovered_tenders")
                .first()
                .and_then(|t| t.get("relevance_score").or_else(|| t.get("match_score")))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };

        let gaps = array(boq, "compliance_gaps").len() as f64;
        let technical_feasibility = (100.0 - gaps * 10.0).max(0.0);

        let recommended = str_or(pricing, "recommended_scenario", "balanced");
        let pricing_competitiveness = array(pricing, "scenarios")
            .iter()
            .find(|s| s.get("scenario_name").and_then(Value::as_str) == Some(recommended))
            .map(|s| s.get("win_probability").and_then(Value::as_f64).unwrap_or(0.5) * 100.0)
            .unwrap_or(50.0);

        let risk_score = 100.0
            - risk
                .get("overall_risk_score")
                .and_then(Value::as_f64)
                .unwrap_or(50.0);

        Self {
            discovery_score,
            technical_feasibility,
            pricing_competitiveness,
            risk_score,
            resource_availability: 75.0,
            strategic_importance: 70.0,
        }
    }

    pub fn weighted_score(&self) -> f64 {
        self.discovery_score * 0.15
            + self.technical_feasibility * 0.20
            + self.pricing_competitiveness * 0.25
            + self.risk_score * 0.25
            + self.resource_availability * 0.10
            + self.strategic_importance * 0.05
    }
}

pub struct StrategyDecisionAgent;

#[async_trait]
impl Agent for StrategyDecisionAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::StrategyDecision
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
        let factors = DecisionFactors::derive(input);
        let reply = chat.send(build_prompt(input, tender_id, &factors)).await?;

        match parse_object(&reply) {
            Some(mut result) => {
                let valid = matches!(
                    result.get("decision").and_then(Value::as_str),
                    Some(BID | NO_BID | NEEDS_INFO)
                );
                if !valid {
                    result.insert(NEEDS_CORRECTION.to_string(), Value::Bool(true));
                }
                default_key(&mut result, "decision_timestamp", now_iso());
                default_key(&mut result, "confidence", json!(0.8));
                Ok(result)
            }
            None => Ok(into_object(json!({
                "tender_id": tender_id,
                "decision": NEEDS_INFO,
                "confidence": 0.5,
                "reasoning": "Unable to complete automated decision analysis. Manual review required.",
                "decision_factors": factors,
                "key_considerations": ["Automated analysis failed", "Manual review required"],
                "recommended_actions": ["Review all agent outputs manually", "Conduct team discussion"],
                "conditions": [],
                "strategic_notes": "Decision automation error",
                "error": "JSON parsing failed",
                NEEDS_CORRECTION: true,
            }))),
        }
    }
}

fn build_prompt(input: &Value, tender_id: &str, factors: &DecisionFactors) -> String {
    let discovery = field(input, "discovery_result");
    let parsed = field(input, "parsed_tender");
    let boq = field(input, "boq");
    let pricing = field(input, "pricing");
    let risk = field(input, "risk_report");

    let top_tender = discovery.pointer("/discovered_tenders/0");
    let gaps = array(boq, "compliance_gaps");
    let critical_risks = array(risk, "identified_risks")
        .iter()
        .filter(|r| r.get("severity").and_then(Value::as_str) == Some("critical"))
        .count();
    let technical_status = match gaps.first() {
        Some(gap) => display_or_na(gap.get("status")),
        None => "Compliant".to_string(),
    };

    format!(
        "Make the final BID / NO-BID decision for this tender.\n\n\
         Tender ID: {tender_id}\n\
         Title: {title}\n\
         Organization: {organization}\n\
         Value: ₹{value}\n\n\
         1. Discovery\n\
         - Relevance Score: {discovery_score}/100\n\
         - Source: {source}\n\
         - Win Probability: {discovery_win}\n\n\
         2. Technical Feasibility\n\
         - Compliance Gaps: {gap_count}\n\
         - Technical Score: {technical}/100\n\
         - Status: {technical_status}\n\n\
         3. Pricing Competitiveness\n\
         - Recommended: {recommended}\n\
         - Win Probability: {pricing_score}%\n\
         - Margin: {margin}%\n\n\
         4. Risk Assessment\n\
         - Risk Score: {risk_raw}/100\n\
         - Risk Level: {risk_level}\n\
         - Eligibility: {eligibility}\n\
         - Financial Viability: {viability}\n\
         - Critical Risks: {critical_risks}\n\n\
         5. Resources: assume adequate availability, score {resources}/100\n\
         6. Strategic Importance: government client, score {strategy}/100\n\n\
         Decision factors: {factors}\n\
         Weighted score: {weighted:.1}\n\n\
         Rules, in order:\n\
         1. Not eligible means NO-BID.\n\
         2. Any critical risk means NO-BID.\n\
         3. Not financially viable means NO-BID.\n\
         4. Weighted score of 70 or more means BID.\n\
         5. 50 to 70 with no critical issues means BID with conditions.\n\
         6. 30 to 50 means NEEDS_INFO.\n\
         7. Below 30 means NO-BID.\n\n\
         Give the decision, a confidence, 2-3 sentences of reasoning, 3-5 key considerations, \
         recommended next steps, any conditions, expected effort (40-200 hours), expected bid \
         preparation cost (₹5,000-50,000) and strategic notes.\n\n\
         Return ONLY valid JSON in the specified format.",
        title = display_or_na(parsed.get("title").or_else(|| parsed.pointer("/tender_info/title"))),
        organization = display_or_na(
            parsed
                .get("organization")
                .or_else(|| parsed.pointer("/tender_info/organization"))
        ),
        value = format_amount(boq_total(boq)),
        discovery_score = factors.discovery_score,
        source = display_or_na(top_tender.and_then(|t| t.get("source"))),
        discovery_win = display_or_na(top_tender.and_then(|t| t.get("win_probability"))),
        gap_count = gaps.len(),
        technical = factors.technical_feasibility,
        recommended = display_or_na(pricing.get("recommended_scenario")),
        pricing_score = factors.pricing_competitiveness,
        margin = display_or_na(pricing.pointer("/scenarios/0/margin_percentage")),
        risk_raw = display_or_na(risk.get("overall_risk_score")),
        risk_level = display_or_na(risk.get("risk_level")),
        eligibility = str_or(risk, "eligibility_status", "conditional"),
        viability = str_or(risk, "financial_viability", "marginal"),
        resources = factors.resource_availability,
        strategy = factors.strategic_importance,
        factors = json!(factors),
        weighted = factors.weighted_score(),
    )
}
