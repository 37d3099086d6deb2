use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tomato_contracts::bundle::analysis_timestamp_now;
use tomato_contracts::events::EventWriter;
use tomato_contracts::{AnalysisBundle, SpecialistReport};
use tracing::{error, info, warn};

use crate::codec::{encode_jpeg_base64, jpeg_data_url, ImageBlob};
use crate::endpoint::{ChatEndpoint, ChatImage, ChatRequest};
use crate::error::AnalysisError;
use crate::parser::{BraceSpanParser, ReplyParser};
use crate::settings::{AnalyzerSettings, ExecutionMode};
use crate::specialists::{
    call_agent, treatment_request, Specialist, SpecialistFindings, TREATMENT_AGENT,
};

/// Runs the four specialists and the treatment coordinator for one image.
///
/// Each call contains its own endpoint failures, so a run always yields five
/// reports unless something panics; a panic anywhere in a step aborts the
/// whole run with [`AnalysisError::OrchestratorFault`] and no partial bundle.
pub struct TomatoAnalyzer {
    endpoint: Box<dyn ChatEndpoint>,
    parser: Box<dyn ReplyParser>,
    model: String,
    mode: ExecutionMode,
    events: Option<EventWriter>,
}

impl TomatoAnalyzer {
    pub fn new(endpoint: Box<dyn ChatEndpoint>, model: impl Into<String>) -> Self {
        Self {
            endpoint,
            parser: Box::new(BraceSpanParser),
            model: model.into(),
            mode: ExecutionMode::default(),
            events: None,
        }
    }

    /// Fails with a configuration error before any endpoint is contacted.
    pub fn from_settings(settings: &AnalyzerSettings) -> Result<Self, AnalysisError> {
        let endpoint = settings.build_endpoint()?;
        Ok(Self::new(endpoint, settings.model.clone())
            .with_parser(settings.parser.build())
            .with_mode(settings.mode))
    }

    pub fn with_parser(mut self, parser: Box<dyn ReplyParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn analyze(&self, image: &ImageBlob) -> Result<AnalysisBundle, AnalysisError> {
        let started = Instant::now();
        self.note(
            "analysis_started",
            json!({
                "endpoint": self.endpoint.name(),
                "model": self.model,
                "mode": self.mode.as_str(),
                "image_name": image.file_name(),
                "image_format": image.kind().label(),
                "width": image.width(),
                "height": image.height(),
            }),
        );

        let outcome = encode_jpeg_base64(image)
            .and_then(|encoded| self.run_agents(&ChatImage::high_detail(jpeg_data_url(&encoded))));

        match &outcome {
            Ok(bundle) => {
                let counts = bundle.issue_counts();
                info!(
                    total_issues = counts.total(),
                    elapsed_s = started.elapsed().as_secs_f64(),
                    "multi-agent analysis complete"
                );
                self.note(
                    "analysis_finished",
                    json!({
                        "analysis_timestamp": bundle.analysis_timestamp,
                        "total_issues": counts.total(),
                        "elapsed_s": started.elapsed().as_secs_f64(),
                    }),
                );
            }
            Err(err) => {
                error!("{err}");
                self.note("analysis_failed", json!({ "error": err.to_string() }));
            }
        }
        outcome
    }

    fn run_agents(&self, image: &ChatImage) -> Result<AnalysisBundle, AnalysisError> {
        let findings = match self.mode {
            ExecutionMode::Parallel => self.run_specialists_parallel(image)?,
            ExecutionMode::Sequential => self.run_specialists_sequential(image)?,
        };
        let request = treatment_request(&self.model, &findings);
        let treatment = guarded(TREATMENT_AGENT, || self.run_one(&request))?;
        Ok(AnalysisBundle {
            pathology: findings.pathology,
            entomology: findings.entomology,
            nutrition: findings.nutrition,
            environmental: findings.environmental,
            treatment,
            analysis_timestamp: analysis_timestamp_now(),
        })
    }

    fn run_specialists_sequential(
        &self,
        image: &ChatImage,
    ) -> Result<SpecialistFindings, AnalysisError> {
        let mut reports = Vec::with_capacity(Specialist::ALL.len());
        for specialist in Specialist::ALL {
            let request = specialist.request(&self.model, image);
            reports.push(guarded(specialist.agent_name(), || self.run_one(&request))?);
        }
        findings_from(reports)
    }

    fn run_specialists_parallel(
        &self,
        image: &ChatImage,
    ) -> Result<SpecialistFindings, AnalysisError> {
        // Every spawned handle is joined before leaving the scope so a
        // panicking worker surfaces here instead of re-panicking the scope.
        let joined: Vec<Result<SpecialistReport, AnalysisError>> =
            thread::scope(|scope| {
                let handles: Vec<_> = Specialist::ALL
                    .into_iter()
                    .map(|specialist| {
                        let request = specialist.request(&self.model, image);
                        let handle = thread::Builder::new()
                            .name(specialist.thread_name().to_string())
                            .spawn_scoped(scope, move || self.run_one(&request));
                        (specialist, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(specialist, handle)| {
                        let agent_name = specialist.agent_name();
                        match handle {
                            Ok(handle) => handle.join().map_err(|payload| fault(agent_name, payload)),
                            Err(err) => Err(AnalysisError::OrchestratorFault(format!(
                                "{agent_name}: thread spawn failed: {err}"
                            ))),
                        }
                    })
                    .collect()
            });

        findings_from(joined.into_iter().collect::<Result<Vec<_>, _>>()?)
    }

    fn run_one(&self, request: &ChatRequest) -> SpecialistReport {
        let started = Instant::now();
        self.note(
            "specialist_started",
            json!({ "agent_name": request.agent_name }),
        );
        let report = call_agent(self.endpoint.as_ref(), self.parser.as_ref(), request);
        self.note(
            "specialist_finished",
            json!({
                "agent_name": request.agent_name,
                "ok": !report.is_failure(),
                "elapsed_s": started.elapsed().as_secs_f64(),
            }),
        );
        report
    }

    fn note(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let payload: Map<String, Value> = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = events.emit(event_type, payload) {
            warn!("failed to record {event_type} event: {err:#}");
        }
    }
}

fn findings_from(reports: Vec<SpecialistReport>) -> Result<SpecialistFindings, AnalysisError> {
    let count = reports.len();
    let [pathology, entomology, nutrition, environmental]: [SpecialistReport; 4] =
        reports.try_into().map_err(|_| {
            AnalysisError::OrchestratorFault(format!("expected 4 specialist reports, got {count}"))
        })?;
    Ok(SpecialistFindings {
        pathology,
        entomology,
        nutrition,
        environmental,
    })
}

fn guarded<T>(agent_name: &str, step: impl FnOnce() -> T) -> Result<T, AnalysisError> {
    panic::catch_unwind(AssertUnwindSafe(step)).map_err(|payload| fault(agent_name, payload))
}

fn fault(agent_name: &str, payload: Box<dyn Any + Send>) -> AnalysisError {
    let message = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    };
    AnalysisError::OrchestratorFault(format!("{agent_name}: {message}"))
}
