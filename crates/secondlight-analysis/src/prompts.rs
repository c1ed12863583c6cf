//! Prompts sent to the Analysis Service.

/// Key in the model's reply that marks a non-medical rejection.
pub const REJECTION_KEY: &str = "error";

/// System prompt for the main analysis call.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a clinical document analyst. You receive text extracted from a patient's medical document (lab report, discharge summary, prescription, imaging report or similar).

If the text is not in English, translate it to English silently and analyze the translation. Never mention the translation.

Respond with ONE JSON object and nothing else, using exactly these keys:
{
  "summary": "plain-language overview of the document for the patient",
  "key_findings": [
    {
      "marker": "name of the test, diagnosis or observation",
      "value": "measured value or finding, with units",
      "reference_range": "normal range if stated, otherwise null",
      "interpretation": "Normal | High | Low | Abnormal | short explanation",
      "category": "Diagnosis | Symptom | Medication | Allergy | Lab Result | History | Other"
    }
  ],
  "patient_info": {"name": null, "age": null, "sex": null, "date_of_birth": null},
  "provider_info": {"name": null, "facility": null, "date": null},
  "recommendations": ["follow-up actions for the patient, one per entry"],
  "critical_values": ["any value that needs urgent attention"]
}

Every key finding must have a non-empty "marker" and "value".

If the text is clearly not a medical document, respond with exactly:
{"error": "short reason the document is not medical"}"#;

/// System prompt for the findings-only fallback call.
pub const FINDINGS_SYSTEM_PROMPT: &str = r#"You extract structured findings from medical text.

Respond with ONE JSON array and nothing else. Each element is an object:
{"marker": "...", "value": "...", "reference_range": null, "interpretation": null, "category": "Lab Result"}

Every element must have a non-empty "marker" and "value". If there are no findings, respond with []."#;

/// User message for the main analysis call.
pub fn analysis_prompt(title: &str, document_type: &str, text: &str) -> String {
    format!(
        "Document title: {}\nDocument type: {}\n\nDocument text:\n{}",
        title, document_type, text
    )
}

/// User message for the findings-only fallback call.
pub fn findings_prompt(text: &str) -> String {
    format!(
        "Extract every test result, diagnosis, medication and other clinical finding from this text:\n\n{}",
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_prompt_carries_metadata() {
        let prompt = analysis_prompt("CBC March", "PDF", "Hemoglobin 13.5 g/dL");
        assert!(prompt.contains("CBC March"));
        assert!(prompt.contains("Document type: PDF"));
        assert!(prompt.ends_with("Hemoglobin 13.5 g/dL"));
    }

    #[test]
    fn test_system_prompt_names_required_keys() {
        for key in ["summary", "key_findings", "recommendations", "critical_values"] {
            assert!(ANALYSIS_SYSTEM_PROMPT.contains(key), "missing {}", key);
        }
        assert!(ANALYSIS_SYSTEM_PROMPT.contains(r#"{"error":"#));
    }

    #[test]
    fn test_findings_prompt_asks_for_array() {
        assert!(FINDINGS_SYSTEM_PROMPT.contains("JSON array"));
        assert!(findings_prompt("LDL 160").contains("LDL 160"));
    }
}
