//! Analysis request/response data model.
//!
//! [`ScreeningInput`] is what the patient-facing editor assembles;
//! [`ScreeningReport`] is the structured reply. Report sections the model
//! may omit are `Option`al so consumers match on presence exhaustively
//! instead of poking at half-filled structs. Field names mirror the wire
//! JSON exactly, including its mixed snake/camel casing.

use serde::{Deserialize, Serialize};

use crate::audio::pcm;

/// A metric the model reports either as a label ("low", "normal", "high")
/// or as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Text(String),
    Number(f64),
}

impl Metric {
    pub fn is_label(&self, label: &str) -> bool {
        matches!(self, Metric::Text(t) if t == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeUnit {
    Years,
    Months,
    Days,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub age: u32,
    pub age_unit: AgeUnit,
    pub sex: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePointer {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_s: Option<f64>,
    pub confidence: f64,
}

/// A candidate phenotype term from the Human Phenotype Ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpoCandidate {
    pub term: String,
    pub code: String,
    pub probability: f64,
    #[serde(default)]
    pub evidence: Vec<EvidencePointer>,
}

/// Vocal biomarkers; defaults describe a healthy, clear speaker. A default
/// `speech_rate` of "normal" is what marks the whole block as "auto-infer".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub speech_rate: Metric,
    pub f0_mean: f64,
    pub pause_rate: Metric,
    pub articulation_score: f64,
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self {
            speech_rate: Metric::Text("normal".into()),
            f0_mean: 200.0,
            pause_rate: Metric::Text("normal".into()),
            articulation_score: 0.95,
        }
    }
}

/// An uploaded document, image, or video, carried inline as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub data: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MediaFile {
    /// The MIME type to declare on the wire: the recorded one, or a value
    /// inferred from the file extension when the source left it empty.
    pub fn effective_mime(&self) -> &str {
        if !self.mime_type.is_empty() {
            return &self.mime_type;
        }
        self.file_name
            .as_deref()
            .map(infer_mime)
            .unwrap_or("application/octet-stream")
    }
}

/// Infer a MIME type from a file extension. Browsers report an empty type
/// for some office documents; this fixed table covers those.
pub fn infer_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "xlsx" | "xls" => {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        }
        "docx" | "doc" => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        "pptx" | "ppt" => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        _ => "application/octet-stream",
    }
}

/// A recorded voice note (or live-session recording), carried inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNote {
    pub data: String,
    pub mime_type: String,
}

impl VoiceNote {
    /// Wrap 16 kHz mono f32 samples as an inline WAV attachment.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: pcm::to_base64(&encode_wav(samples, sample_rate)),
            mime_type: "audio/wav".to_string(),
        }
    }
}

/// Encode f32 samples as 16-bit PCM WAV bytes (mono).
fn encode_wav(audio: &[f32], sample_rate: u32) -> Vec<u8> {
    let num_samples = audio.len() as u32;
    let bytes_per_sample: u16 = 2;
    let num_channels: u16 = 1;
    let data_size = num_samples * bytes_per_sample as u32;
    let file_size = 36 + data_size; // RIFF header is 44 bytes, minus 8 for RIFF+size

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * num_channels as u32 * bytes_per_sample as u32;
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    let block_align = num_channels * bytes_per_sample;
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &pcm_sample in &pcm::float_to_pcm16(audio) {
        buf.extend_from_slice(&pcm_sample.to_le_bytes());
    }

    buf
}

/// Everything the "Analyze" action submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningInput {
    pub patient: Patient,
    #[serde(default)]
    pub hpo_candidates: Vec<HpoCandidate>,
    #[serde(default)]
    pub audio_features: AudioFeatures,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,
    #[serde(
        rename = "mediaFiles",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub media_files: Vec<MediaFile>,
    #[serde(rename = "voiceNote", skip_serializing_if = "Option::is_none")]
    pub voice_note: Option<VoiceNote>,
    #[serde(rename = "reportLanguage", skip_serializing_if = "Option::is_none")]
    pub report_language: Option<String>,
}

impl ScreeningInput {
    pub fn has_media(&self) -> bool {
        !self.media_files.is_empty() || self.voice_note.is_some()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportingTerm {
    pub term: String,
    pub code: String,
    pub term_confidence: f64,
    #[serde(default)]
    pub evidence_pointers: Vec<EvidencePointer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCondition {
    pub name: String,
    pub estimated_probability: f64,
    #[serde(default)]
    pub supporting_terms: Vec<SupportingTerm>,
    #[serde(default)]
    pub brief_rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_analysis: Option<String>,
    #[serde(default)]
    pub suggested_next_steps: Vec<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// A web-grounding source attached to the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Stable,
    Improving,
    Declining,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionPoint {
    pub date: String,
    pub gait_score: f64,
    pub speech_clarity: f64,
    pub facial_expressivity: f64,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionAnalysis {
    pub trend_summary: String,
    pub alert_level: AlertLevel,
    #[serde(default)]
    pub data_points: Vec<ProgressionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub usable: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_authenticity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_relevance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticity_reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prognosis {
    pub trajectory: String,
    pub prediction_6_month: String,
    pub prediction_12_month: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateDiagnosis {
    pub name: String,
    pub rule_out_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningMetadata {
    #[serde(default)]
    pub chain_of_thought: Vec<String>,
    #[serde(default)]
    pub alternate_possibilities: Vec<AlternateDiagnosis>,
    #[serde(default)]
    pub error_triggers: Vec<String>,
    #[serde(default)]
    pub false_positive_analysis: String,
    #[serde(default)]
    pub counterarguments: String,
    #[serde(default)]
    pub bias_check: String,
    #[serde(default)]
    pub trust_level: String,
}

/// The structured analysis reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub patient: Patient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_summaries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranked_conditions: Option<Vec<RankedCondition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_confidence: Option<bool>,
    #[serde(default)]
    pub disclaimer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_sources: Option<Vec<WebSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_friendly_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progression: Option<ProgressionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_check: Option<QualityCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prognosis: Option<Prognosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_metadata: Option<ReasoningMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
    /// Model-extracted phenotype terms, fed back into the input form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_hpo: Option<Vec<HpoCandidate>>,
    /// Model-extracted vocal biomarkers, fed back into the input form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_audio_features: Option<AudioFeatures>,
}

/// One retained analysis: the request/result pair plus identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub input: ScreeningInput,
    pub output: ScreeningReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_inference_covers_the_office_table() {
        assert_eq!(infer_mime("referral.pdf"), "application/pdf");
        assert_eq!(infer_mime("vitals.CSV"), "text/csv");
        assert_eq!(
            infer_mime("history.xlsx"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(infer_mime("mystery.bin"), "application/octet-stream");
        assert_eq!(infer_mime("noextension"), "application/octet-stream");
    }

    #[test]
    fn effective_mime_prefers_recorded_type() {
        let file = MediaFile {
            data: String::new(),
            mime_type: "video/webm".into(),
            file_name: Some("clip.xlsx".into()),
        };
        assert_eq!(file.effective_mime(), "video/webm");

        let blank = MediaFile {
            data: String::new(),
            mime_type: String::new(),
            file_name: Some("notes.docx".into()),
        };
        assert_eq!(
            blank.effective_mime(),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn wav_header_matches_sample_count() {
        let note = VoiceNote::from_samples(&[0.0f32; 160], 16_000);
        assert_eq!(note.mime_type, "audio/wav");
        let bytes = crate::audio::pcm::from_base64(&note.data).unwrap();
        assert_eq!(bytes.len(), 44 + 160 * 2);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let data_size = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        assert_eq!(data_size, 320);
    }

    #[test]
    fn metric_accepts_label_or_number() {
        let features: AudioFeatures = serde_json::from_str(
            r#"{ "speech_rate": "low", "f0_mean": 120, "pause_rate": 0.4, "articulation_score": 0.6 }"#,
        )
        .unwrap();
        assert!(features.speech_rate.is_label("low"));
        assert_eq!(features.pause_rate, Metric::Number(0.4));
    }
}
