use crate::error::GenerationError;
use crate::generation::PromptMessage;
use crate::traits::GenerationEngine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const AUTO_DETECT: &str = "auto";

const LANGUAGES: [(&str, &str); 12] = [
    ("pt", "Portuguese"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("ru", "Russian"),
    ("ar", "Arabic"),
    (AUTO_DETECT, "auto-detect"),
];

pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationResult {
    pub detected_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improved_text: Option<String>,
    pub translated_text: String,
}

const CODE_FENCE: &str = r"(?s)\A```[a-zA-Z]*\s*\n(.*?)\n?```\z";

pub struct Translator<G> {
    engine: Arc<G>,
    fence: Regex,
}

impl<G: GenerationEngine> Translator<G> {
    pub fn new(engine: Arc<G>) -> Result<Self, GenerationError> {
        Ok(Self {
            engine,
            fence: Regex::new(CODE_FENCE)?,
        })
    }

    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        improve: bool,
    ) -> Result<TranslationResult, GenerationError> {
        if text.trim().is_empty() {
            return Err(GenerationError::InvalidArgument("text is empty".to_string()));
        }
        let source = language_name(source_lang).ok_or_else(|| {
            GenerationError::InvalidArgument(format!("unsupported source language {source_lang}"))
        })?;
        let target = language_name(target_lang)
            .filter(|_| !target_lang.eq_ignore_ascii_case(AUTO_DETECT))
            .ok_or_else(|| {
                GenerationError::InvalidArgument(format!("unsupported target language {target_lang}"))
            })?;

        let messages = [
            PromptMessage::system(instructions(source, target, improve)),
            PromptMessage::user(text),
        ];
        let output = self.engine.complete(&messages).await?;
        debug!(chars = output.len(), "translation received");

        let result = parse_translation(&self.fence, &output)?;
        if improve && result.improved_text.is_none() {
            warn!("translation is missing the improved text");
            return Err(GenerationError::MalformedGenerationOutput(
                "improved_text is missing".to_string(),
            ));
        }
        Ok(result)
    }
}

fn instructions(source: &str, target: &str, improve: bool) -> String {
    let direction = if source == "auto-detect" {
        format!("Translate the user's text to {target}.")
    } else {
        format!("Translate the user's text from {source} to {target}.")
    };
    let improved = if improve {
        "First rewrite the text in its original language with grammar, clarity and style fixed, \
         put that in \"improved_text\", then translate the improved version.\n"
    } else {
        ""
    };

    format!(
        "{direction}\n{improved}\
         Respond with exactly one JSON object and nothing else:\n\
         {{\"detected_language\": \"<ISO 639-1 code of the source text>\", {}\"translated_text\": \"<translation>\"}}",
        if improve { "\"improved_text\": \"<improved source text>\", " } else { "" }
    )
}

/// Accepts one JSON object, optionally wrapped in a markdown code fence. Anything else is
/// rejected as malformed.
pub fn parse_translation(fence: &Regex, output: &str) -> Result<TranslationResult, GenerationError> {
    let trimmed = output.trim();
    let body = fence
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map_or(trimmed, |inner| inner.as_str().trim());

    let result: TranslationResult = serde_json::from_str(body).map_err(|error| {
        GenerationError::MalformedGenerationOutput(format!("expected a translation object: {error}"))
    })?;

    if result.translated_text.trim().is_empty() {
        return Err(GenerationError::MalformedGenerationOutput(
            "translated_text is empty".to_string(),
        ));
    }
    Ok(result)
}
