use tomato_contracts::{AnalysisBundle, HealthAssessment, ReportSlot, SpecialistReport};
use tomato_engine::ImageBlob;

pub fn render_image_info(image: &ImageBlob) -> String {
    let mut out = String::new();
    out.push_str("Image Information\n");
    let name = image.file_name().unwrap_or("<memory>");
    out.push_str(&format!("  Filename:  {name}\n"));
    out.push_str(&format!(
        "  Size:      {} x {} pixels\n",
        image.width(),
        image.height()
    ));
    out.push_str(&format!("  Format:    {}\n", image.kind().label()));
    out.push_str(&format!("  File Size: {:.1} KB\n", image.size_kb()));
    out
}

/// Terminal rendering of a finished run: one section per report, then the
/// issue summary and health headline.
pub fn render_bundle(bundle: &AnalysisBundle) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Multi-Agent Analysis Complete - {}\n",
        bundle.analysis_timestamp
    ));
    for slot in ReportSlot::ALL {
        out.push('\n');
        let report = bundle.report(slot);
        out.push_str(&format!("== {} ==\n", section_title(slot)));
        if let Some(error) = failure_text(report) {
            out.push_str(&format!("{} analysis error: {error}\n", error_label(slot)));
            continue;
        }
        match slot {
            ReportSlot::Pathology => render_pathology(&mut out, report),
            ReportSlot::Entomology => render_entomology(&mut out, report),
            ReportSlot::Nutrition => render_nutrition(&mut out, report),
            ReportSlot::Environmental => render_environmental(&mut out, report),
            ReportSlot::Treatment => render_treatment(&mut out, report),
        }
    }
    out.push('\n');
    render_summary(&mut out, bundle);
    out
}

fn section_title(slot: ReportSlot) -> &'static str {
    match slot {
        ReportSlot::Pathology => "Plant Pathology Analysis",
        ReportSlot::Entomology => "Entomology Analysis",
        ReportSlot::Nutrition => "Plant Nutrition Analysis",
        ReportSlot::Environmental => "Environmental Stress Analysis",
        ReportSlot::Treatment => "Integrated Treatment Plan",
    }
}

fn error_label(slot: ReportSlot) -> &'static str {
    match slot {
        ReportSlot::Pathology => "Pathology",
        ReportSlot::Entomology => "Entomology",
        ReportSlot::Nutrition => "Nutrition",
        ReportSlot::Environmental => "Environmental",
        ReportSlot::Treatment => "Treatment",
    }
}

fn failure_text(report: &SpecialistReport) -> Option<String> {
    if report.is_failure() || report.get("error").is_some() {
        return Some(
            report
                .error_message()
                .unwrap_or("Unknown error")
                .to_string(),
        );
    }
    None
}

fn render_pathology(out: &mut String, report: &SpecialistReport) {
    list(out, report, "Diseases Identified", "diseases_identified", "-");
    scalar(out, report, "Pathogen Type", "pathogen_type");
    if let Some(score) = report.text("severity_score") {
        out.push_str(&format!("Severity Score: {score}/10\n"));
    }
    scalar(out, report, "Disease Stage", "disease_stage");
    list(out, report, "Key Symptoms", "key_symptoms", "*");
    list(out, report, "Differential Diagnosis", "differential_diagnosis", "?");
}

fn render_entomology(out: &mut String, report: &SpecialistReport) {
    list(out, report, "Pest Damage Detected", "pest_damage_detected", "-");
    if let Some(level) = report.text("infestation_level") {
        let marker = infestation_marker(&level);
        out.push_str(&format!("Infestation Level: {level} [{marker}]\n"));
    }
    if let Some(pattern) = report.text("damage_pattern") {
        out.push_str(&format!("Damage Pattern\n  {pattern}\n"));
    }
    list(out, report, "Beneficial Insects", "beneficial_insects", "+");
}

fn infestation_marker(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "light" => "ok",
        "moderate" => "watch",
        _ => "alert",
    }
}

fn render_nutrition(out: &mut String, report: &SpecialistReport) {
    list(out, report, "Nutrient Deficiencies", "nutrient_deficiencies", "-");
    list(out, report, "Physiological Disorders", "physiological_disorders", "!");
    scalar(out, report, "Soil pH Indication", "soil_ph_indication");
    list(
        out,
        report,
        "Fertilizer Recommendations",
        "fertilizer_recommendations",
        "+",
    );
}

fn render_environmental(out: &mut String, report: &SpecialistReport) {
    list(out, report, "Environmental Stress Factors", "stress_factors", "!");
    list(out, report, "Climate Conditions", "climate_conditions", "*");
    list(out, report, "Water Management", "water_management", "+");
}

fn render_treatment(out: &mut String, report: &SpecialistReport) {
    list(
        out,
        report,
        "Priority Treatments (Immediate Action)",
        "priority_treatments",
        "!",
    );
    list(out, report, "Organic Treatments", "organic_treatments", "+");
    list(out, report, "Cultural Practices", "cultural_practices", "*");
    list(out, report, "Chemical Treatments", "chemical_treatments", "-");
    list(out, report, "Prevention Strategies", "prevention_strategies", "*");
    list(out, report, "Treatment Timeline", "treatment_timeline", ">");
}

fn render_summary(out: &mut String, bundle: &AnalysisBundle) {
    let counts = bundle.issue_counts();
    let total = counts.total();
    out.push_str("== Analysis Summary ==\n");
    out.push_str(&format!("Diseases Found:  {}\n", counts.diseases));
    out.push_str(&format!("Pest Issues:     {}\n", counts.pest_problems));
    out.push_str(&format!("Nutrient Issues: {}\n", counts.nutrition_issues));
    out.push_str(&format!("Stress Factors:  {}\n", counts.environmental_stress));
    let assessment = counts.assessment();
    let tag = match assessment {
        HealthAssessment::Healthy => "healthy",
        HealthAssessment::NeedsAttention => "attention",
        HealthAssessment::Serious => "critical",
    };
    out.push_str(&format!(
        "Overall Plant Health Assessment: [{tag}] {}\n",
        assessment.headline(total)
    ));
}

/// Lists are shown only when the field is present; absent fields are skipped.
fn list(out: &mut String, report: &SpecialistReport, title: &str, key: &str, bullet: &str) {
    if report.get(key).is_none() {
        return;
    }
    out.push_str(&format!("{title}\n"));
    let items = report.string_list(key);
    if items.is_empty() {
        out.push_str("  (none)\n");
    }
    for item in items {
        out.push_str(&format!("  {bullet} {item}\n"));
    }
}

fn scalar(out: &mut String, report: &SpecialistReport, title: &str, key: &str) {
    if let Some(value) = report.text(key) {
        out.push_str(&format!("{title}: {value}\n"));
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::{json, Value};
    use tomato_contracts::{AnalysisBundle, SpecialistReport};
    use tomato_engine::ImageBlob;

    use super::{infestation_marker, render_bundle, render_image_info};

    fn success(value: Value) -> SpecialistReport {
        SpecialistReport::Success(value.as_object().cloned().unwrap_or_default())
    }

    fn bundle() -> AnalysisBundle {
        AnalysisBundle {
            pathology: success(json!({
                "agent_name": "Plant Pathology Specialist",
                "diseases_identified": ["Early Blight (90%)"],
                "pathogen_type": "fungal",
                "severity_score": 6,
                "key_symptoms": ["Concentric rings"],
            })),
            entomology: SpecialistReport::failure("Entomology Specialist", "HTTP 429"),
            nutrition: success(json!({
                "agent_name": "Plant Nutrition Specialist",
                "nutrient_deficiencies": [],
                "soil_ph_indication": "acidic",
            })),
            environmental: success(json!({
                "error": "model refused",
                "stress_factors": ["Heat"],
            })),
            treatment: success(json!({
                "agent_name": "Treatment Coordinator",
                "priority_treatments": ["Remove infected leaves"],
                "treatment_timeline": ["Day 0: prune"],
            })),
            analysis_timestamp: "2026-03-14T09:30:00.000000+00:00".to_string(),
        }
    }

    #[test]
    fn renders_sections_and_failures() {
        let text = render_bundle(&bundle());
        assert!(text.starts_with("Multi-Agent Analysis Complete - 2026-03-14T09:30:00"));
        assert!(text.contains("  - Early Blight (90%)"));
        assert!(text.contains("Severity Score: 6/10"));
        assert!(text.contains("Entomology analysis error: HTTP 429"));
        assert!(text.contains("Environmental analysis error: model refused"));
        assert!(!text.contains("Heat"));
        assert!(text.contains("Nutrient Deficiencies\n  (none)"));
        assert!(text.contains("Soil pH Indication: acidic"));
        assert!(text.contains("  ! Remove infected leaves"));
    }

    #[test]
    fn summary_counts_follow_issue_lists() {
        let text = render_bundle(&bundle());
        assert!(text.contains("Diseases Found:  1"));
        assert!(text.contains("Pest Issues:     0"));
        assert!(text.contains("Stress Factors:  1"));
        assert!(text.contains("[attention] Plant has 2 issues that need attention"));
    }

    #[test]
    fn image_info_lists_every_fact_on_its_own_line() -> anyhow::Result<()> {
        let image = RgbImage::from_pixel(40, 30, Rgb([80, 150, 60]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        let text = render_image_info(&ImageBlob::from_bytes(bytes)?);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "  Filename:  <memory>");
        assert_eq!(lines[2], "  Size:      40 x 30 pixels");
        assert_eq!(lines[3], "  Format:    PNG");
        assert!(lines[4].starts_with("  File Size: ") && lines[4].ends_with(" KB"));
        Ok(())
    }

    #[test]
    fn infestation_levels_map_to_markers() {
        assert_eq!(infestation_marker("Light"), "ok");
        assert_eq!(infestation_marker("moderate"), "watch");
        assert_eq!(infestation_marker("severe"), "alert");
    }
}
