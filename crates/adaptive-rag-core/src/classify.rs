//! Query categories, function-call validation and the deterministic fallback.
//!
//! The LLM classifier is asked to call a single function whose arguments
//! carry a category, a rationale and a confidence. Those arguments are
//! untrusted JSON: [`parse_function_arguments`] validates them against the
//! fixed four-category enumeration and anything else is rejected with a
//! [`ClassifyError`], which sends the caller to [`fallback_classify`].
//!
//! The fallback is pure and total: it never fails and always returns one of
//! the four categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::sparse::{content_terms, words};

/// Name of the classification function offered to the LLM.
pub const FUNCTION_NAME: &str = "classify_query";

/// System prompt for the LLM classifier.
pub const CLASSIFIER_PROMPT: &str = "\
You are an expert query classifier for an adaptive retrieval-augmented assistant. \
Classify the user's query into exactly one of four categories.

GENERAL: greetings, small talk, questions about the assistant itself, or questions that need no specific knowledge. \
Examples: \"hi\", \"how are you\", \"who are you\".

WEBSEARCH: current events, recent or real-time information, or external-world facts that need up-to-date knowledge. \
Examples: \"latest news about AI\", \"current stock prices\", \"weather in Paris today\".

VECTORSTORE: questions about the content of the user's uploaded documents. \
Examples: \"what does the paper say about attention\", \"summarize the uploaded report\".

VAGUE_DOCUMENT: questions that refer to documents but are too underspecified to answer. \
Examples: \"help me with my documents\", \"tell me about my files\".

Use the recent conversation to resolve references. Always call the classify_query function.";

/// Intent category of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    General,
    Websearch,
    Vectorstore,
    VagueDocument,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::General,
        Category::Websearch,
        Category::Vectorstore,
        Category::VagueDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "GENERAL",
            Category::Websearch => "WEBSEARCH",
            Category::Vectorstore => "VECTORSTORE",
            Category::VagueDocument => "VAGUE_DOCUMENT",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ClassifyError;

    /// Accepts only the four exact upper-case names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ClassifyError::UnknownCategory(s.to_string()))
    }
}

/// Which path produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Llm,
    Fallback,
}

/// Outcome of classifying one question. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub rationale: String,
    /// In `[0.0, 1.0]`.
    pub confidence: f32,
    pub source: ClassificationSource,
}

/// Rejected function-call payload.
#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("function arguments are not valid JSON: {0}")]
    MalformedArguments(String),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
}

const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Deserialize)]
struct RawArguments {
    classification: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl TryFrom<RawArguments> for ClassificationResult {
    type Error = ClassifyError;

    fn try_from(raw: RawArguments) -> Result<Self, Self::Error> {
        let category = raw.classification.trim().parse::<Category>()?;
        let confidence = raw
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(DEFAULT_CONFIDENCE);
        Ok(ClassificationResult {
            category,
            rationale: raw.reasoning.unwrap_or_default(),
            confidence,
            source: ClassificationSource::Llm,
        })
    }
}

/// Validate the JSON arguments of a `classify_query` function call.
pub fn parse_function_arguments(arguments: &str) -> Result<ClassificationResult, ClassifyError> {
    let raw: RawArguments = serde_json::from_str(arguments)
        .map_err(|e| ClassifyError::MalformedArguments(e.to_string()))?;
    raw.try_into()
}

/// JSON-schema parameters of the `classify_query` function.
pub fn function_parameters() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "classification": {
                "type": "string",
                "enum": Category::ALL.iter().map(Category::as_str).collect::<Vec<_>>(),
                "description": "The classification of the query"
            },
            "reasoning": {
                "type": "string",
                "description": "Short reasoning for the classification"
            },
            "confidence": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Confidence score for this classification"
            }
        },
        "required": ["classification", "reasoning", "confidence"]
    })
}

const WEBSEARCH_PATTERNS: &[&str] = &[
    "latest",
    "recent",
    "recently",
    "news",
    "current",
    "currently",
    "today",
    "tonight",
    "yesterday",
    "this week",
    "stock price",
    "weather",
    "covid",
    "election",
    "breaking",
    "right now",
];

const GENERAL_PATTERNS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "what's up",
    "who am i",
    "who are you",
    "what am i",
    "tell me about yourself",
    "thanks",
    "thank you",
    "bye",
    "goodbye",
    "see you",
];

const VAGUE_DOCUMENT_PATTERNS: &[&str] = &[
    "my documents",
    "my files",
    "my docs",
    "the documents",
    "the files",
    "help me with",
    "answer questions about",
    "tell me about my",
];

const DOCUMENT_PATTERNS: &[&str] = &[
    "pdf",
    "document",
    "paper",
    "report",
    "article",
    "file",
    "upload",
    "uploaded",
    "section",
    "chapter",
    "figure",
    "table",
    "summarize",
    "explain",
    "according to",
];

/// First pattern in `patterns` found in `words` as a whole-word phrase.
fn find_phrase<'p>(words: &[String], patterns: &[&'p str]) -> Option<&'p str> {
    patterns.iter().copied().find(|pattern| {
        let phrase: Vec<&str> = pattern.split(' ').collect();
        words
            .windows(phrase.len())
            .any(|w| w.iter().zip(&phrase).all(|(a, b)| a == b))
    })
}

fn fallback(category: Category, confidence: f32, rationale: String) -> ClassificationResult {
    ClassificationResult {
        category,
        rationale,
        confidence,
        source: ClassificationSource::Fallback,
    }
}

/// Deterministic keyword classification used when the LLM path fails.
///
/// Rules, first match wins:
/// 1. no content words and no indexed documents → GENERAL
/// 2. temporal/news keyword → WEBSEARCH
/// 3. greeting or small talk → GENERAL
/// 4. documents indexed: vague document phrase → VAGUE_DOCUMENT, else VECTORSTORE
/// 5. otherwise → GENERAL
///
/// All phrase matching is on whole words.
pub fn fallback_classify(question: &str, has_documents: bool) -> ClassificationResult {
    let words = words(question);

    if !has_documents && content_terms(question).is_empty() {
        return fallback(
            Category::General,
            0.6,
            "No content words and no indexed documents".to_string(),
        );
    }

    if let Some(p) = find_phrase(&words, WEBSEARCH_PATTERNS) {
        return fallback(
            Category::Websearch,
            0.8,
            format!("Query contains web search pattern: '{}'", p),
        );
    }

    if let Some(p) = find_phrase(&words, GENERAL_PATTERNS) {
        return fallback(
            Category::General,
            0.8,
            format!("Query contains general conversation pattern: '{}'", p),
        );
    }

    if has_documents {
        if let Some(p) = find_phrase(&words, VAGUE_DOCUMENT_PATTERNS) {
            return fallback(
                Category::VagueDocument,
                0.7,
                format!("Query contains vague document reference: '{}'", p),
            );
        }
        return match find_phrase(&words, DOCUMENT_PATTERNS) {
            Some(p) => fallback(
                Category::Vectorstore,
                0.8,
                format!("Query contains document-related pattern: '{}'", p),
            ),
            None => fallback(
                Category::Vectorstore,
                0.6,
                "Documents are indexed; searching them".to_string(),
            ),
        };
    }

    fallback(
        Category::General,
        0.5,
        "No documents indexed and no specific pattern matched".to_string(),
    )
}
