use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::AnalysisBundle;

/// Downloadable analysis report. Field names are part of the file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExport {
    #[serde(rename = "Analysis Date")]
    pub analysis_date: String,
    #[serde(rename = "Total Issues Found")]
    pub total_issues: u64,
    #[serde(rename = "Diseases")]
    pub diseases: u64,
    #[serde(rename = "Pest Problems")]
    pub pest_problems: u64,
    #[serde(rename = "Nutrition Issues")]
    pub nutrition_issues: u64,
    #[serde(rename = "Environmental Stress")]
    pub environmental_stress: u64,
    #[serde(rename = "Detailed Results")]
    pub detailed_results: AnalysisBundle,
}

impl AnalysisExport {
    pub fn from_bundle(bundle: &AnalysisBundle) -> Self {
        let counts = bundle.issue_counts();
        Self {
            analysis_date: bundle.analysis_timestamp.clone(),
            total_issues: counts.total(),
            diseases: counts.diseases,
            pest_problems: counts.pest_problems,
            nutrition_issues: counts.nutrition_issues,
            environmental_stress: counts.environmental_stress,
            detailed_results: bundle.clone(),
        }
    }
}

pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("tomato_analysis_{}.json", at.format("%Y%m%d_%H%M%S"))
}

pub fn write_export(out_dir: &Path, bundle: &AnalysisBundle) -> anyhow::Result<PathBuf> {
    write_export_at(out_dir, bundle, Utc::now())
}

pub fn write_export_at(
    out_dir: &Path,
    bundle: &AnalysisBundle,
    at: DateTime<Utc>,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(export_file_name(at));
    let document = AnalysisExport::from_bundle(bundle);
    std::fs::write(&path, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::{export_file_name, write_export_at};
    use crate::bundle::AnalysisBundle;
    use crate::report::SpecialistReport;

    fn success(value: Value) -> SpecialistReport {
        SpecialistReport::Success(value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn file_name_embeds_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 7, 5, 9).unwrap();
        assert_eq!(export_file_name(at), "tomato_analysis_20261016_070509.json");
    }

    #[test]
    fn export_document_carries_counts_and_results() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let bundle = AnalysisBundle {
            pathology: success(json!({
                "agent_name": "Plant Pathology Specialist",
                "diseases_identified": ["Late Blight (70%)"],
            })),
            entomology: success(json!({
                "agent_name": "Entomology Specialist",
                "pest_damage_detected": ["Aphids (60%)", "Thrips (20%)"],
            })),
            nutrition: SpecialistReport::failure("Plant Nutrition Specialist", "HTTP 500"),
            environmental: success(json!({"agent_name": "Environmental Stress Specialist"})),
            treatment: success(json!({
                "agent_name": "Treatment Coordinator",
                "priority_treatments": ["Remove infected leaves"],
            })),
            analysis_timestamp: "2026-10-16T07:05:09.000000+00:00".to_string(),
        };
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 7, 5, 9).unwrap();
        let path = write_export_at(&temp.path().join("exports"), &bundle, at)?;
        assert!(path.ends_with("tomato_analysis_20261016_070509.json"));

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["Analysis Date"], json!("2026-10-16T07:05:09.000000+00:00"));
        assert_eq!(parsed["Total Issues Found"], json!(3));
        assert_eq!(parsed["Diseases"], json!(1));
        assert_eq!(parsed["Pest Problems"], json!(2));
        assert_eq!(parsed["Nutrition Issues"], json!(0));
        assert_eq!(parsed["Environmental Stress"], json!(0));
        assert_eq!(
            parsed["Detailed Results"]["nutrition"],
            json!({"error": "HTTP 500", "agent_name": "Plant Nutrition Specialist"})
        );
        assert_eq!(
            parsed["Detailed Results"]["analysis_timestamp"],
            json!("2026-10-16T07:05:09.000000+00:00")
        );
        Ok(())
    }
}
