pub mod bundle;
pub mod events;
pub mod export;
pub mod report;

pub use bundle::{AnalysisBundle, HealthAssessment, IssueCounts, ReportSlot};
pub use report::SpecialistReport;
