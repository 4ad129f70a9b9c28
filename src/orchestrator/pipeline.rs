//! Step tables for each workflow and the wiring of one step's output into
//! the next step's input.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::agents::reply::{array, field};
use crate::domain::agents::{AgentKind, UserContext};
use crate::domain::workflow::WorkflowType;

/// One stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub agent: AgentKind,
    /// A failed optional step is recorded and the pipeline moves on.
    pub optional: bool,
}

const fn required(agent: AgentKind) -> Step {
    Step {
        agent,
        optional: false,
    }
}

const fn optional(agent: AgentKind) -> Step {
    Step {
        agent,
        optional: true,
    }
}

const DISCOVER_AND_BID: &[Step] = &[
    required(AgentKind::TenderDiscovery),
    required(AgentKind::DocumentParser),
    required(AgentKind::BoqGenerator),
    optional(AgentKind::RfqVendor),
    required(AgentKind::PricingStrategy),
    required(AgentKind::RiskCompliance),
    required(AgentKind::StrategyDecision),
    required(AgentKind::DocumentAssembly),
];

const PARSE_AND_BID: &[Step] = &[
    required(AgentKind::DocumentParser),
    required(AgentKind::BoqGenerator),
    optional(AgentKind::RfqVendor),
    required(AgentKind::PricingStrategy),
    required(AgentKind::RiskCompliance),
    required(AgentKind::StrategyDecision),
    required(AgentKind::DocumentAssembly),
];

const FULL_ANALYSIS: &[Step] = &[
    required(AgentKind::TenderDiscovery),
    required(AgentKind::DocumentParser),
    required(AgentKind::BoqGenerator),
    optional(AgentKind::RfqVendor),
    required(AgentKind::PricingStrategy),
    required(AgentKind::RiskCompliance),
    required(AgentKind::StrategyDecision),
];

const GENERATE_BOQ: &[Step] = &[required(AgentKind::BoqGenerator)];
const ASSEMBLE_DOCUMENTS: &[Step] = &[required(AgentKind::DocumentAssembly)];
const RFQ_ONLY: &[Step] = &[required(AgentKind::RfqVendor)];
const PRICING_ANALYSIS: &[Step] = &[required(AgentKind::PricingStrategy)];
const RISK_ASSESSMENT: &[Step] = &[required(AgentKind::RiskCompliance)];
const DECISION_SUPPORT: &[Step] = &[required(AgentKind::StrategyDecision)];
const CHAT_ASSISTANT: &[Step] = &[required(AgentKind::Assistant)];

/// Steps run for `workflow`, in order.
pub fn steps(workflow: WorkflowType) -> &'static [Step] {
    match workflow {
        WorkflowType::DiscoverAndBid => DISCOVER_AND_BID,
        WorkflowType::ParseAndBid => PARSE_AND_BID,
        WorkflowType::FullAnalysis => FULL_ANALYSIS,
        WorkflowType::GenerateBoq => GENERATE_BOQ,
        WorkflowType::AssembleDocuments => ASSEMBLE_DOCUMENTS,
        WorkflowType::RfqOnly => RFQ_ONLY,
        WorkflowType::PricingAnalysis => PRICING_ANALYSIS,
        WorkflowType::RiskAssessment => RISK_ASSESSMENT,
        WorkflowType::DecisionSupport => DECISION_SUPPORT,
        WorkflowType::ChatAssistant => CHAT_ASSISTANT,
    }
}

/// The tender with the highest match score; the first one wins ties.
pub fn best_tender(tenders: &[Value]) -> Option<&Value> {
    let score = |t: &Value| {
        t.get("match_score")
            .or_else(|| t.get("relevance_score"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    tenders.iter().fold(None, |best, tender| match best {
        Some(current) if score(current) >= score(tender) => Some(current),
        _ => Some(tender),
    })
}

/// Outputs collected while a pipeline runs.
pub struct PipelineState<'a> {
    request: &'a Value,
    ctx: &'a UserContext,
    selected_tender: Option<Value>,
    outputs: HashMap<AgentKind, Value>,
}

impl<'a> PipelineState<'a> {
    pub fn new(request: &'a Value, ctx: &'a UserContext) -> Self {
        Self {
            request,
            ctx,
            selected_tender: None,
            outputs: HashMap::new(),
        }
    }

    pub fn record(&mut self, agent: AgentKind, output: Value) {
        self.outputs.insert(agent, output);
    }

    pub fn select_tender(&mut self, tender: Value) {
        self.selected_tender = Some(tender);
    }

    fn output(&self, agent: AgentKind) -> &Value {
        self.outputs.get(&agent).unwrap_or(&Value::Null)
    }

    fn requested(&self, key: &str) -> Option<&Value> {
        self.request.get(key).filter(|v| !v.is_null())
    }

    fn tender(&self, key: &str) -> &Value {
        self.selected_tender
            .as_ref()
            .map_or(&Value::Null, |t| field(t, key))
    }

    /// Tender number from discovery, the parsed document or the request.
    fn tender_id(&self) -> Value {
        [
            self.tender("tender_number"),
            self.output(AgentKind::DocumentParser)
                .pointer("/tender_info/tender_number")
                .unwrap_or(&Value::Null),
            self.requested("tender_number").unwrap_or(&Value::Null),
            self.requested("tender_id").unwrap_or(&Value::Null),
        ]
        .into_iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| json!("Unknown"))
    }

    fn requested_or(&self, key: &str, default: Value) -> Value {
        self.requested(key).cloned().unwrap_or(default)
    }

    /// Input for `agent` when it runs after earlier steps.
    pub fn input_for(&self, agent: AgentKind) -> Value {
        let parsed = self.output(AgentKind::DocumentParser);
        let boq = self.output(AgentKind::BoqGenerator);

        let mut input = Map::new();
        let mut put = |key: &str, value: Value| {
            if !value.is_null() {
                input.insert(key.to_string(), value);
            }
        };

        match agent {
            AgentKind::TenderDiscovery | AgentKind::Assistant => return self.request.clone(),
            AgentKind::DocumentParser => {
                put("tender_number", self.tender_id());
                put("document_url", self.tender("document_url").clone());
                put("document_text", self.requested_or("document_text", json!("")));
            }
            AgentKind::BoqGenerator => {
                put("tender_id", self.tender_id());
                put("boq_items", json!(array(parsed, "boq_items")));
                put("pricing_strategy", self.requested_or("pricing_strategy", json!("competitive")));
                put("target_margin", self.requested_or("target_margin", json!(12)));
                put("product_catalog", json!(self.ctx.product_catalog));
            }
            AgentKind::RfqVendor => {
                let items = match array(boq, "line_items") {
                    [] => array(parsed, "boq_items"),
                    items => items,
                };
                put("mode", json!("generate_rfq"));
                put("tender_id", self.tender_id());
                put("boq_items", json!(items));
                put("vendors", self.requested_or("vendors", json!(self.ctx.vendors)));
                put("deadline_days", self.requested_or("deadline_days", json!(7)));
            }
            AgentKind::PricingStrategy => {
                let estimated = self
                    .requested("estimated_value")
                    .unwrap_or(self.tender("tender_value"))
                    .clone();
                let emd = parsed
                    .pointer("/emd_details/amount")
                    .unwrap_or(self.tender("emd_amount"))
                    .clone();
                put("tender_id", self.tender_id());
                put("boq", boq.clone());
                put(
                    "vendor_quotes",
                    json!(array(self.output(AgentKind::RfqVendor), "quotes_received")),
                );
                put("estimated_value", estimated);
                put("emd_amount", emd);
                put("price_history", self.requested_or("price_history", json!([])));
                put("target_margin", self.requested_or("target_margin", json!(12)));
            }
            AgentKind::RiskCompliance => {
                put("tender_id", self.tender_id());
                put("parsed_tender", parsed.clone());
                put("boq", boq.clone());
                put("pricing", self.output(AgentKind::PricingStrategy).clone());
                put("past_performance", self.requested_or("past_performance", json!([])));
            }
            AgentKind::StrategyDecision => {
                put("tender_id", self.tender_id());
                put("discovery_result", self.output(AgentKind::TenderDiscovery).clone());
                put("parsed_tender", parsed.clone());
                put("boq", boq.clone());
                put("pricing", self.output(AgentKind::PricingStrategy).clone());
                put("risk_report", self.output(AgentKind::RiskCompliance).clone());
            }
            AgentKind::DocumentAssembly => {
                put("tender_info", field(parsed, "tender_info").clone());
                put("boq", boq.clone());
                put("company_profile", self.ctx.company_profile().clone());
                put(
                    "technical_requirements",
                    json!(array(parsed, "technical_requirements")),
                );
                put("mandatory_documents", json!(array(parsed, "mandatory_documents")));
            }
        }

        Value::Object(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rfq_is_optional() {
        for workflow in WorkflowType::ALL {
            for step in steps(workflow) {
                assert_eq!(
                    step.optional,
                    step.agent == AgentKind::RfqVendor && steps(workflow).len() > 1,
                    "{workflow}: {}",
                    step.agent
                );
            }
        }
    }

    #[test]
    fn single_agent_workflows_run_one_required_step() {
        let cases = [
            (WorkflowType::GenerateBoq, AgentKind::BoqGenerator),
            (WorkflowType::AssembleDocuments, AgentKind::DocumentAssembly),
            (WorkflowType::RfqOnly, AgentKind::RfqVendor),
            (WorkflowType::PricingAnalysis, AgentKind::PricingStrategy),
            (WorkflowType::RiskAssessment, AgentKind::RiskCompliance),
            (WorkflowType::DecisionSupport, AgentKind::StrategyDecision),
            (WorkflowType::ChatAssistant, AgentKind::Assistant),
        ];
        for (workflow, agent) in cases {
            assert_eq!(steps(workflow), &[required(agent)], "{workflow}");
        }
    }

    #[test]
    fn full_analysis_stops_before_assembly() {
        let agents: Vec<AgentKind> = steps(WorkflowType::FullAnalysis)
            .iter()
            .map(|s| s.agent)
            .collect();
        assert_eq!(agents.last(), Some(&AgentKind::StrategyDecision));
        assert_eq!(agents.len() + 1, steps(WorkflowType::DiscoverAndBid).len());
        assert_eq!(steps(WorkflowType::ParseAndBid)[0].agent, AgentKind::DocumentParser);
    }

    #[test]
    fn best_tender_prefers_highest_score_and_first_on_ties() {
        let tenders = vec![
            json!({ "tender_number": "A", "match_score": 60 }),
            json!({ "tender_number": "B", "match_score": 91 }),
            json!({ "tender_number": "C", "match_score": 91 }),
        ];
        assert_eq!(best_tender(&tenders).unwrap()["tender_number"], "B");

        let unscored = vec![json!({ "tender_number": "X" }), json!({ "tender_number": "Y" })];
        assert_eq!(best_tender(&unscored).unwrap()["tender_number"], "X");

        assert!(best_tender(&[]).is_none());
    }

    #[test]
    fn parser_input_comes_from_selected_tender() {
        let request = json!({ "search_query": "laptops", "document_text": "Tender text" });
        let ctx = UserContext::default();
        let mut state = PipelineState::new(&request, &ctx);
        state.select_tender(json!({ "tender_number": "GEM/1", "document_url": "https://gem.gov.in/1" }));

        let input = state.input_for(AgentKind::DocumentParser);

        assert_eq!(input["tender_number"], "GEM/1");
        assert_eq!(input["document_url"], "https://gem.gov.in/1");
        assert_eq!(input["document_text"], "Tender text");
    }

    #[test]
    fn boq_input_applies_request_overrides() {
        let request = json!({ "tender_number": "T-9", "target_margin": 8 });
        let ctx = UserContext {
            product_catalog: vec![json!({ "sku": "LAP-1" })],
            ..Default::default()
        };
        let mut state = PipelineState::new(&request, &ctx);
        state.record(
            AgentKind::DocumentParser,
            json!({ "boq_items": [{ "item_number": "1" }] }),
        );

        let input = state.input_for(AgentKind::BoqGenerator);

        assert_eq!(input["tender_id"], "T-9");
        assert_eq!(input["target_margin"], 8);
        assert_eq!(input["pricing_strategy"], "competitive");
        assert_eq!(input["boq_items"][0]["item_number"], "1");
        assert_eq!(input["product_catalog"][0]["sku"], "LAP-1");
    }

    #[test]
    fn pricing_input_uses_quotes_and_emd() {
        let request = json!({});
        let ctx = UserContext::default();
        let mut state = PipelineState::new(&request, &ctx);
        state.select_tender(json!({ "tender_number": "T-1", "tender_value": 5000000, "emd_amount": 1 }));
        state.record(AgentKind::DocumentParser, json!({ "emd_details": { "amount": 100000 } }));
        state.record(AgentKind::BoqGenerator, json!({ "line_items": [] }));
        state.record(
            AgentKind::RfqVendor,
            json!({ "quotes_received": [{ "total_quoted_value": 10 }] }),
        );

        let input = state.input_for(AgentKind::PricingStrategy);

        assert_eq!(input["estimated_value"], 5000000);
        assert_eq!(input["emd_amount"], 100000);
        assert_eq!(input["vendor_quotes"].as_array().unwrap().len(), 1);
        assert_eq!(input["target_margin"], 12);
    }

    #[test]
    fn decision_input_omits_missing_reports() {
        let request = json!({});
        let ctx = UserContext::default();
        let mut state = PipelineState::new(&request, &ctx);
        state.record(AgentKind::RiskCompliance, json!({ "overall_risk_score": 20 }));

        let input = state.input_for(AgentKind::StrategyDecision);

        assert!(input.get("discovery_result").is_none());
        assert_eq!(input["risk_report"]["overall_risk_score"], 20);
        assert_eq!(input["tender_id"], "Unknown");
    }
}
