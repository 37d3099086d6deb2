use tomato_contracts::{ReportSlot, SpecialistReport};
use tracing::{debug, warn};

use crate::endpoint::{error_chain_text, ChatEndpoint, ChatImage, ChatRequest};
use crate::error::AnalysisError;
use crate::parser::ReplyParser;

const PATHOLOGY_PROMPT: &str = include_str!("../resources/prompts/pathology.txt");
const ENTOMOLOGY_PROMPT: &str = include_str!("../resources/prompts/entomology.txt");
const NUTRITION_PROMPT: &str = include_str!("../resources/prompts/nutrition.txt");
const ENVIRONMENTAL_PROMPT: &str = include_str!("../resources/prompts/environmental.txt");
const TREATMENT_PROMPT_TEMPLATE: &str = include_str!("../resources/prompts/treatment.txt");

pub const TREATMENT_AGENT: &str = "Treatment Coordinator";
const TREATMENT_MAX_TOKENS: u32 = 1200;
const ERROR_TEXT_MAX_CHARS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Specialist {
    Pathology,
    Entomology,
    Nutrition,
    Environmental,
}

impl Specialist {
    pub const ALL: [Specialist; 4] = [
        Specialist::Pathology,
        Specialist::Entomology,
        Specialist::Nutrition,
        Specialist::Environmental,
    ];

    pub fn agent_name(self) -> &'static str {
        match self {
            Specialist::Pathology => "Plant Pathology Specialist",
            Specialist::Entomology => "Entomology Specialist",
            Specialist::Nutrition => "Plant Nutrition Specialist",
            Specialist::Environmental => "Environmental Stress Specialist",
        }
    }

    pub fn thread_name(self) -> &'static str {
        match self {
            Specialist::Pathology => "specialist-pathology",
            Specialist::Entomology => "specialist-entomology",
            Specialist::Nutrition => "specialist-nutrition",
            Specialist::Environmental => "specialist-environmental",
        }
    }

    /// Placeholder name for this report in the treatment prompt template.
    fn findings_marker(self) -> &'static str {
        match self {
            Specialist::Pathology => "PATHOLOGY_FINDINGS",
            Specialist::Entomology => "ENTOMOLOGY_FINDINGS",
            Specialist::Nutrition => "NUTRITION_FINDINGS",
            Specialist::Environmental => "ENVIRONMENTAL_FINDINGS",
        }
    }

    pub fn slot(self) -> ReportSlot {
        match self {
            Specialist::Pathology => ReportSlot::Pathology,
            Specialist::Entomology => ReportSlot::Entomology,
            Specialist::Nutrition => ReportSlot::Nutrition,
            Specialist::Environmental => ReportSlot::Environmental,
        }
    }

    pub fn system_instruction(self) -> String {
        let expertise = match self {
            Specialist::Pathology => "a plant pathology expert",
            Specialist::Entomology => "an entomology expert",
            Specialist::Nutrition => "a plant nutrition expert",
            Specialist::Environmental => "an environmental stress expert",
        };
        format!("You are {expertise}. Always respond with valid JSON.")
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Specialist::Pathology => PATHOLOGY_PROMPT,
            Specialist::Entomology => ENTOMOLOGY_PROMPT,
            Specialist::Nutrition => NUTRITION_PROMPT,
            Specialist::Environmental => ENVIRONMENTAL_PROMPT,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            Specialist::Pathology => 1200,
            Specialist::Entomology | Specialist::Nutrition | Specialist::Environmental => 1000,
        }
    }

    pub fn request(self, model: &str, image: &ChatImage) -> ChatRequest {
        ChatRequest {
            agent_name: self.agent_name().to_string(),
            model: model.to_string(),
            system: self.system_instruction(),
            prompt: self.prompt().to_string(),
            image: Some(image.clone()),
            max_tokens: self.max_tokens(),
        }
    }
}

/// The four specialist reports the treatment coordinator integrates.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistFindings {
    pub pathology: SpecialistReport,
    pub entomology: SpecialistReport,
    pub nutrition: SpecialistReport,
    pub environmental: SpecialistReport,
}

impl SpecialistFindings {
    pub fn get(&self, specialist: Specialist) -> &SpecialistReport {
        match specialist {
            Specialist::Pathology => &self.pathology,
            Specialist::Entomology => &self.entomology,
            Specialist::Nutrition => &self.nutrition,
            Specialist::Environmental => &self.environmental,
        }
    }
}

/// Text-only request embedding every finding verbatim, failures included.
pub fn treatment_request(model: &str, findings: &SpecialistFindings) -> ChatRequest {
    let prompt = fill_findings(TREATMENT_PROMPT_TEMPLATE, findings);
    ChatRequest {
        agent_name: TREATMENT_AGENT.to_string(),
        model: model.to_string(),
        system: "You are an integrated treatment specialist. Always respond with valid JSON."
            .to_string(),
        prompt,
        image: None,
        max_tokens: TREATMENT_MAX_TOKENS,
    }
}

/// Sends one request. Endpoint failures are contained in the returned report.
pub fn call_agent(
    endpoint: &dyn ChatEndpoint,
    parser: &dyn ReplyParser,
    request: &ChatRequest,
) -> SpecialistReport {
    match send(endpoint, request) {
        Ok(reply) => {
            debug!(agent = %request.agent_name, reply_chars = reply.len(), "reply received");
            SpecialistReport::Success(parser.parse(&reply))
        }
        Err(err) => {
            warn!(endpoint = endpoint.name(), "{err}");
            err.into_failure_report(&request.agent_name)
        }
    }
}

fn send(endpoint: &dyn ChatEndpoint, request: &ChatRequest) -> Result<String, AnalysisError> {
    endpoint
        .complete(request)
        .map_err(|err| AnalysisError::Endpoint {
            agent_name: request.agent_name.clone(),
            message: error_chain_text(&err, ERROR_TEXT_MAX_CHARS),
        })
}

/// Substitutes `{{<AREA>_FINDINGS}}` markers in a single pass; inserted
/// report text is never rescanned for markers.
fn fill_findings(template: &str, findings: &SpecialistFindings) -> String {
    let mut prompt = String::with_capacity(template.len() * 2);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        prompt.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            prompt.push_str(&rest[start..]);
            return prompt;
        };
        let marker = &after[..end];
        match Specialist::ALL
            .into_iter()
            .find(|specialist| specialist.findings_marker() == marker)
        {
            Some(specialist) => prompt.push_str(&pretty(findings.get(specialist))),
            None => prompt.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    prompt.push_str(rest);
    prompt
}

fn pretty(report: &SpecialistReport) -> String {
    serde_json::to_string_pretty(&report.to_value()).unwrap_or_else(|_| "{}".to_string())
}
