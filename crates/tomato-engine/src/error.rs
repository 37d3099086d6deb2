use serde_json::{json, Value};
use thiserror::Error;
use tomato_contracts::SpecialistReport;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("OpenAI API key not found: set OPENAI_API_KEY in the environment or in a .env file")]
    MissingCredential,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("{agent_name} request failed: {message}")]
    Endpoint { agent_name: String, message: String },

    #[error("Multi-agent analysis failed: {0}")]
    OrchestratorFault(String),
}

impl AnalysisError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::Configuration(_))
    }

    /// Failure record for the agent whose call raised this error. Endpoint
    /// failures keep their bare message; the agent is recorded separately.
    pub fn into_failure_report(self, agent_name: &str) -> SpecialistReport {
        match self {
            Self::Endpoint {
                agent_name,
                message,
            } => SpecialistReport::failure(agent_name, message),
            other => SpecialistReport::failure(agent_name, other.to_string()),
        }
    }

    /// Top-level error document, `{"error": <display text>}`.
    pub fn to_value(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use tomato_contracts::SpecialistReport;

    use super::AnalysisError;

    #[test]
    fn orchestrator_fault_renders_run_level_error() {
        let err = AnalysisError::OrchestratorFault("worker panicked".to_string());
        assert_eq!(
            err.to_value(),
            json!({"error": "Multi-agent analysis failed: worker panicked"})
        );
        assert!(!err.is_configuration());
    }

    #[test]
    fn endpoint_error_becomes_failure_record() {
        let err = AnalysisError::Endpoint {
            agent_name: "Entomology Specialist".to_string(),
            message: "OpenAI request failed (503): overloaded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Entomology Specialist request failed: OpenAI request failed (503): overloaded"
        );
        let report = err.into_failure_report("ignored");
        assert_eq!(
            report,
            SpecialistReport::failure(
                "Entomology Specialist",
                "OpenAI request failed (503): overloaded"
            )
        );
    }

    #[test]
    fn credential_errors_are_configuration_errors() {
        assert!(AnalysisError::MissingCredential.is_configuration());
        assert!(AnalysisError::Configuration("bad provider".to_string()).is_configuration());
    }
}
