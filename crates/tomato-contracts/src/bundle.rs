use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::report::SpecialistReport;

/// The five reports of one analysis run plus its completion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub pathology: SpecialistReport,
    pub entomology: SpecialistReport,
    pub nutrition: SpecialistReport,
    pub environmental: SpecialistReport,
    pub treatment: SpecialistReport,
    pub analysis_timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportSlot {
    Pathology,
    Entomology,
    Nutrition,
    Environmental,
    Treatment,
}

impl ReportSlot {
    pub const ALL: [ReportSlot; 5] = [
        ReportSlot::Pathology,
        ReportSlot::Entomology,
        ReportSlot::Nutrition,
        ReportSlot::Environmental,
        ReportSlot::Treatment,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ReportSlot::Pathology => "pathology",
            ReportSlot::Entomology => "entomology",
            ReportSlot::Nutrition => "nutrition",
            ReportSlot::Environmental => "environmental",
            ReportSlot::Treatment => "treatment",
        }
    }

    /// List-valued field whose length counts as this slot's issues.
    pub fn issue_field(self) -> Option<&'static str> {
        match self {
            ReportSlot::Pathology => Some("diseases_identified"),
            ReportSlot::Entomology => Some("pest_damage_detected"),
            ReportSlot::Nutrition => Some("nutrient_deficiencies"),
            ReportSlot::Environmental => Some("stress_factors"),
            ReportSlot::Treatment => None,
        }
    }
}

impl AnalysisBundle {
    pub fn report(&self, slot: ReportSlot) -> &SpecialistReport {
        match slot {
            ReportSlot::Pathology => &self.pathology,
            ReportSlot::Entomology => &self.entomology,
            ReportSlot::Nutrition => &self.nutrition,
            ReportSlot::Environmental => &self.environmental,
            ReportSlot::Treatment => &self.treatment,
        }
    }

    pub fn issue_counts(&self) -> IssueCounts {
        let count = |slot: ReportSlot| {
            slot.issue_field()
                .map(|field| self.report(slot).list_len(field) as u64)
                .unwrap_or(0)
        };
        IssueCounts {
            diseases: count(ReportSlot::Pathology),
            pest_problems: count(ReportSlot::Entomology),
            nutrition_issues: count(ReportSlot::Nutrition),
            environmental_stress: count(ReportSlot::Environmental),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not an analysis bundle", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IssueCounts {
    pub diseases: u64,
    pub pest_problems: u64,
    pub nutrition_issues: u64,
    pub environmental_stress: u64,
}

impl IssueCounts {
    pub fn total(&self) -> u64 {
        self.diseases + self.pest_problems + self.nutrition_issues + self.environmental_stress
    }

    pub fn assessment(&self) -> HealthAssessment {
        match self.total() {
            0 => HealthAssessment::Healthy,
            1..=3 => HealthAssessment::NeedsAttention,
            _ => HealthAssessment::Serious,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAssessment {
    Healthy,
    NeedsAttention,
    Serious,
}

impl HealthAssessment {
    pub fn headline(self, total: u64) -> String {
        match self {
            HealthAssessment::Healthy => {
                "Plant appears healthy with no major issues detected".to_string()
            }
            HealthAssessment::NeedsAttention => {
                format!("Plant has {total} issues that need attention")
            }
            HealthAssessment::Serious => {
                format!("Plant has {total} serious issues requiring immediate intervention")
            }
        }
    }
}

/// UTC RFC 3339 with microseconds; also stamps every run event.
pub fn analysis_timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
