//! One-shot analysis path: request assembly, invocation with fallback
//! recovery, reply parsing, and merge-back of model-extracted fields.

pub mod client;
pub mod parse;
pub mod types;

use std::collections::HashSet;
use std::future::Future;

use chrono::DateTime;
use serde_json::json;
use tracing::warn;

use crate::config::ReasoningDepth;
use crate::error::{Error, Result};
use client::InferenceClient;
use types::{HistoryItem, ScreeningInput, ScreeningReport, WebSource};

/// Default system instruction for the deep analysis call.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
SYSTEM: You are a clinical-grade, conservative multimodal reasoning \
assistant for phenotype screening.

*** CORE DIRECTIVES ***
1. SPEED & ACCURACY: be rigorous but efficient; prioritize the most likely \
phenotypes.
2. NO MARKDOWN: return ONLY valid JSON, no code fences.
3. SAFETY: if media is fake or irrelevant, flag it but still analyze the \
text.

*** DATA SOURCES & SCOPE ***
Ground reasoning in HPO, OMIM, Orphanet, GeneReviews, DSM-5-TR, and ICD-11.

*** FORENSIC MEDIA ANALYSIS ***
Check media for AI/deepfake artifacts and set 'media_authenticity'. If \
media is blank or noise, set 'media_relevance' to \"Irrelevant\". Ignore \
background chatter; focus on the patient.

*** MANDATORY TASKS ***
1. AUTO-PHENOTYPING: extract HPO terms from text/media into \
'extracted_hpo', and infer audio features (when media exists) into \
'extracted_audio_features', every time, including refinements.
2. DIFFERENTIAL DIAGNOSIS: up to 3 ranked conditions with \
'match_analysis'; the diagnosis must fit the patient's age.
3. CONFIDENCE: score 0.0-1.0 with an explanation.
4. FOLLOW-UP: generate 'follow_up_questions' only when the top \
probability is under 0.75 and a specific missing detail would \
differentiate the top candidates; at most 5.

Respond with one JSON object matching the agreed report shape.";

/// Prompt for the daily self-training sweep.
const SELF_TRAINING_PROMPT: &str = "\
Use web search to find significant, verified medical updates, new \
guidelines, or newly discovered phenotypes in Neurology or Psychiatry \
from the last 24-48 hours. Verify that the sources are reputable (e.g. \
PubMed, major medical journals, CDC, WHO). Summarize any *confirmed* new \
findings in 2-3 bullet points. If nothing significant, say \"No \
significant updates.\"";

/// Disclaimer suffix stamped on reports produced by fallback recovery.
const RECOVERY_NOTE: &str = " [Note: Analysis recovered from a faulty configuration.]";

/// One part of the multipart request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Inline { mime_type: String, data: String },
}

/// Fully assembled request: instruction plus ordered parts (text first,
/// then inline attachments).
#[derive(Debug, Clone)]
pub struct AnalysisPayload {
    pub instruction: String,
    pub parts: Vec<Part>,
}

/// Caller knobs for one analysis invocation.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub reasoning_depth: ReasoningDepth,
    /// Prior retained analyses, newest first, for progression context.
    pub history: Vec<HistoryItem>,
    /// Developer instruction override; triggers fallback recovery on
    /// failure.
    pub instruction_override: Option<String>,
    /// Verified self-training summaries to fold into the instruction.
    pub learned_knowledge: Vec<String>,
}

/// Whether the request must ask the model to infer vocal biomarkers.
///
/// True only when media is present and the audio features still carry the
/// default "normal" speech rate. This deliberately conflates "left at
/// defaults" with "not provided": a user who manually types the default
/// values is treated as asking for auto-inference, matching long-standing
/// behavior.
fn needs_speech_inference(input: &ScreeningInput) -> bool {
    input.has_media() && input.audio_features.speech_rate.is_label("normal")
}

/// Serialize the structured fields (media stripped, history folded in)
/// into the clinical-data JSON embedded in the text part.
fn clinical_json(input: &ScreeningInput, history: &[HistoryItem]) -> String {
    let mut value = serde_json::to_value(input).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("mediaFiles");
        obj.remove("voiceNote");
        if !history.is_empty() {
            let entries: Vec<serde_json::Value> = history
                .iter()
                .map(|h| {
                    let date = DateTime::from_timestamp_millis(h.timestamp)
                        .map(|dt| dt.format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    json!({ "date": date, "output": h.output })
                })
                .collect();
            obj.insert("historyContext".into(), json!(entries));
        }
    }
    value.to_string()
}

/// Assemble the multipart payload for one analysis invocation.
pub fn build_request(input: &ScreeningInput, options: &AnalysisOptions) -> AnalysisPayload {
    let mut instruction = options
        .instruction_override
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());
    if options.reasoning_depth == ReasoningDepth::Concise {
        instruction.push_str(" KEEP RATIONALE BRIEF.");
    }
    if !options.learned_knowledge.is_empty() {
        instruction.push_str(&format!(
            "\n\n*** UPDATED CLINICAL KNOWLEDGE (VERIFIED) ***\n{}\nUse this recent knowledge to inform your analysis.",
            options.learned_knowledge.join("\n")
        ));
    }

    let target_lang = input.report_language.as_deref().unwrap_or("English");
    let mut text = format!("Generate a rigorous clinical report in language: {target_lang}.");
    text.push_str(&format!(
        "\n\nClinical Data JSON: {}",
        clinical_json(input, &options.history)
    ));

    text.push_str("\n\n*** AUTOMATIC UNIVERSAL DOCUMENT & MEDIA ANALYSIS ***");
    text.push_str("\nFor EACH attachment, automatically identify its type and process it accordingly:");
    text.push_str("\n1. IF HANDWRITING/NOTES: perform expert OCR, transcribe verbatim, analyze intent.");
    text.push_str("\n2. IF SPREADSHEET/CSV: analyze the tabular data, trends, and values.");
    text.push_str("\n3. IF WORD/PDF/DOC: summarize clinical findings, history, and referral letters.");
    text.push_str("\n4. IF SLIDES: extract key points from the presentation.");
    text.push_str("\n5. IF PATIENT VIDEO/IMAGE: analyze phenotype, ignore background noise, check for AI/deepfake artifacts.");
    text.push_str("\nSynthesize all findings into the final JSON report.");

    text.push_str("\n\n*** CONTEXTUAL ANALYSIS ***");
    text.push_str("\nExplain symptoms in the context of lifestyle and environment.");

    if input.hpo_candidates.is_empty() {
        text.push_str("\n\n*** INFERENCE REQUIRED: SYMPTOMS ***");
        text.push_str("\nThe user provided NO manual HPO terms (\"I don't know\"). You MUST infer symptoms/phenotypes strictly from the 'note' text and any media attachments. Do NOT hallucinate if no evidence exists.");
    }

    if needs_speech_inference(input) {
        text.push_str("\n\n*** INFERENCE REQUIRED: SPEECH ***");
        text.push_str("\nThe user provided NO manual speech metrics (\"I don't know\"). You MUST analyze any attached audio/video for vocal biomarkers (pitch, rate, prosody, articulation) and infer them yourself.");
    }

    text.push_str("\n\n*** CONFIDENCE SCORING ***");
    text.push_str("\n1. Provide 'overall_confidence' (0.0-1.0).");
    text.push_str("\n2. Provide 'confidence_explanation' justifying the score.");

    text.push_str("\n\n*** SAFETY & REASONING CHECKLIST ***");
    text.push_str("\nComplete the 'reasoning_metadata' object: chain_of_thought, alternate_possibilities (top 3 ruled-out conditions), error_triggers, false_positive_analysis, counterarguments, bias_check, and trust_level (\"Safe\", \"Caution\", or \"Expert Review\").");

    if !input.source_urls.is_empty() {
        text.push_str("\n\n*** EXTERNAL MEDIA ***");
        text.push_str(&format!(
            "\nUser provided URLs: {}. Use web search to analyze them.",
            serde_json::to_string(&input.source_urls).unwrap_or_default()
        ));
    }

    if !options.history.is_empty() {
        text.push_str(&format!(
            "\n\n*** PROGRESSION ANALYSIS ***: Compare current data to {} previous sessions.",
            options.history.len()
        ));
    }

    if !input.has_media() {
        text.push_str("\n\n*** IMPORTANT: NO MEDIA FILES ATTACHED ***\n1. Set 'quality_check.media_relevance' to 'None'.\n2. Add 'No media given, only text analysis has been done.' to 'evidence_summaries'.\n3. Do NOT comment on recording quality, background noise, or lighting. Base your analysis SOLELY on the provided text history and parameters.");
    }

    let mut parts = vec![Part::Text(text)];
    for file in &input.media_files {
        parts.push(Part::Inline {
            mime_type: file.effective_mime().to_string(),
            data: file.data.clone(),
        });
    }
    if let Some(note) = &input.voice_note {
        parts.push(Part::Inline {
            mime_type: note.mime_type.clone(),
            data: note.data.clone(),
        });
    }

    AnalysisPayload { instruction, parts }
}

/// Result of [`with_fallback`]: the value plus whether the fallback path
/// produced it.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub recovered: bool,
}

/// Run `primary`; on failure, run the lazily-built `fallback` once. The
/// retry policy lives here, independent of request construction.
pub async fn with_fallback<T, P, B, F>(primary: P, fallback: B) -> Result<Outcome<T>>
where
    P: Future<Output = Result<T>>,
    B: FnOnce() -> F,
    F: Future<Output = Result<T>>,
{
    match primary.await {
        Ok(value) => Ok(Outcome {
            value,
            recovered: false,
        }),
        Err(primary_err) => {
            warn!("Primary attempt failed ({primary_err}); retrying with fallback");
            let value = fallback().await?;
            Ok(Outcome {
                value,
                recovered: true,
            })
        }
    }
}

/// Issue one assembled payload and post-process the reply.
async fn run_call(client: &InferenceClient, payload: &AnalysisPayload) -> Result<ScreeningReport> {
    let reply = client.generate(payload).await?;
    let mut report = parse::parse_report(&reply.text)?;
    report.web_sources = Some(dedupe_sources(reply.sources));
    Ok(report)
}

/// The full "Analyze" action: assemble, invoke, recover if a custom
/// instruction misbehaved, parse.
///
/// When `options.instruction_override` is set and the first attempt fails,
/// the call is retried once with the default instruction and the report is
/// marked as recovered. If the retry fails too, the error surfaces as
/// [`Error::RecoverableConfig`].
pub async fn analyze(
    client: &InferenceClient,
    input: &ScreeningInput,
    options: &AnalysisOptions,
) -> Result<ScreeningReport> {
    let payload = build_request(input, options);

    if options.instruction_override.is_none() {
        return run_call(client, &payload).await;
    }

    let default_options = AnalysisOptions {
        instruction_override: None,
        ..options.clone()
    };
    let fallback_payload = build_request(input, &default_options);

    match with_fallback(run_call(client, &payload), || {
        run_call(client, &fallback_payload)
    })
    .await
    {
        Ok(outcome) => {
            let mut report = outcome.value;
            if outcome.recovered {
                report.disclaimer.push_str(RECOVERY_NOTE);
            }
            Ok(report)
        }
        Err(Error::QuotaExceeded) => Err(Error::QuotaExceeded),
        Err(e) => Err(Error::RecoverableConfig(e.to_string())),
    }
}

/// Deduplicate grounding sources by URI, preserving first-seen order.
pub fn dedupe_sources(sources: Vec<WebSource>) -> Vec<WebSource> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.uri.clone()))
        .collect()
}

/// Fold model-extracted fields back into a copy of the original input, to
/// serve as the baseline for a follow-up refinement call. The original is
/// untouched.
pub fn merge_extracted(report: &ScreeningReport, input: &ScreeningInput) -> ScreeningInput {
    let mut updated = input.clone();
    if let Some(hpo) = &report.extracted_hpo {
        if !hpo.is_empty() {
            updated.hpo_candidates = hpo.clone();
        }
    }
    if let Some(features) = &report.extracted_audio_features {
        updated.audio_features = features.clone();
    }
    updated
}

/// One-shot Q&A about an existing report.
pub async fn chat_about_report(
    client: &InferenceClient,
    report: &ScreeningReport,
    question: &str,
) -> Result<String> {
    let report_json = serde_json::to_string(report)?;
    let truncated: String = report_json.chars().take(5000).collect();
    let prompt = format!(
        "You are an expert clinical assistant discussing a phenotype report.\nREPORT: {truncated}... (truncated)\nQUESTION: {question}\nAnswer briefly and helpfully."
    );
    client.generate_text(&prompt, false).await
}

/// Help-desk one-shot query.
pub async fn ask_help_center(client: &InferenceClient, query: &str) -> Result<String> {
    let prompt = format!("Help Desk for a clinical screening app. User Query: {query}. Explain briefly.");
    client.generate_text(&prompt, false).await
}

/// Daily self-training sweep: returns the knowledge summary text (possibly
/// "No significant updates.").
pub async fn run_self_training(client: &InferenceClient) -> Result<String> {
    client.generate_text(SELF_TRAINING_PROMPT, true).await
}
