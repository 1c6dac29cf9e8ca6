//! Adaptive Router: classify a question, dispatch it, answer it.
//!
//! Routing is an explicit state machine:
//!
//! ```text
//! Classifying ─┬─ GENERAL ────────► DispatchGeneral ─────────────┐
//!              ├─ WEBSEARCH ──────► DispatchWebSearch ──(fail)──►│ (general_fallback)
//!              ├─ VECTORSTORE ────► DispatchVectorstore ─(empty)─► DispatchVague
//!              └─ VAGUE_DOCUMENT ─► DispatchVague                │
//!                                        every dispatch ────────► Responding
//! ```
//!
//! Each external call in a dispatch state is bounded by a timeout; a
//! timeout produces an answer tagged `error` instead of hanging. Responding
//! appends the exchange to the session's memory.
//!
//! A whole route runs under one shared [`IndexGate`] guard, so a clear
//! either waits for the memory append or rejects the query up front.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use adaptive_rag_core::classify::Category;
use adaptive_rag_core::memory::SessionMemories;
use adaptive_rag_core::models::{ConversationTurn, RetrievalResult, Role};
use adaptive_rag_core::store::VectorStore;

use crate::classifier::QueryClassifier;
use crate::error::{truncate, RagError};
use crate::gate::IndexGate;
use crate::llm::{ChatMessage, ChatModel};
use crate::retrieval::RetrievalEngine;
use crate::websearch::{WebResult, WebSearch};

/// Fixed answer for questions that reference documents too loosely.
pub const GUIDANCE: &str = "\
I'd be happy to help you with your documents! However, your question is quite general.

To get the most helpful answer, please try asking more specific questions like:
• \"What does the document say about [specific topic]?\"
• \"Summarize the main points from my uploaded files\"
• \"Find information about [specific subject] in my documents\"
• \"What are the key findings in the uploaded documents?\"

If you haven't uploaded any documents yet, please upload them first.";

const UNAVAILABLE: &str =
    "I'm experiencing technical difficulties. Please try again later.";

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Memory,
    WebSearch,
    VectorstoreSearch,
    Guidance,
    Error,
    GeneralFallback,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Memory => "memory",
            Method::WebSearch => "web_search",
            Method::VectorstoreSearch => "vectorstore_search",
            Method::Guidance => "guidance",
            Method::Error => "error",
            Method::GeneralFallback => "general_fallback",
        }
    }
}

/// Attribution for an answer: a document chunk or a web page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Source {
    fn from_chunk(result: &RetrievalResult) -> Self {
        Self {
            file_name: Some(result.source_label.clone()),
            content_preview: Some(result.preview_text.clone()),
            ..Default::default()
        }
    }

    fn from_web(result: &WebResult, preview_chars: usize) -> Self {
        Self {
            title: Some(result.title.clone()),
            url: Some(result.url.clone()),
            content_preview: Some(truncate(&result.content, preview_chars)),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub method: Method,
}

impl QueryResponse {
    fn new(answer: impl Into<String>, sources: Vec<Source>, method: Method) -> Self {
        Self {
            answer: answer.into(),
            sources,
            method,
        }
    }

    fn error(answer: impl Into<String>) -> Self {
        Self::new(answer, Vec::new(), Method::Error)
    }

    fn timed_out(service: &str) -> Self {
        Self::error(format!(
            "Sorry, the {} took too long to respond. Please try again.",
            service
        ))
    }
}

#[derive(Debug)]
enum RouteState {
    Classifying,
    /// `method` is `Memory`, or `GeneralFallback` after a failed web search.
    DispatchGeneral { method: Method },
    DispatchWebSearch,
    DispatchVectorstore,
    DispatchVague,
    Responding(QueryResponse),
}

impl RouteState {
    fn name(&self) -> &'static str {
        match self {
            RouteState::Classifying => "classifying",
            RouteState::DispatchGeneral { .. } => "dispatch_general",
            RouteState::DispatchWebSearch => "dispatch_web_search",
            RouteState::DispatchVectorstore => "dispatch_vectorstore",
            RouteState::DispatchVague => "dispatch_vague",
            RouteState::Responding(_) => "responding",
        }
    }
}

/// Tunables taken from config.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub top_k: usize,
    /// Memory turns given to the classifier and the general answer.
    pub context_turns: usize,
    pub synthesis_timeout: Duration,
    pub web_search_timeout: Duration,
    pub preview_chars: usize,
}

/// Per-query context carried through the state machine.
struct Turn<'a> {
    session: &'a str,
    question: &'a str,
    recent: Vec<ConversationTurn>,
}

pub struct Router {
    classifier: QueryClassifier,
    retrieval: Arc<RetrievalEngine>,
    web: Arc<dyn WebSearch>,
    chat: Arc<dyn ChatModel>,
    memories: Arc<SessionMemories>,
    store: Arc<dyn VectorStore>,
    gate: IndexGate,
    settings: RouterSettings,
}

enum WebOutcome {
    Found(Vec<WebResult>),
    Failed(anyhow::Error),
    TimedOut,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: QueryClassifier,
        retrieval: Arc<RetrievalEngine>,
        web: Arc<dyn WebSearch>,
        chat: Arc<dyn ChatModel>,
        memories: Arc<SessionMemories>,
        store: Arc<dyn VectorStore>,
        gate: IndexGate,
        settings: RouterSettings,
    ) -> Self {
        Self {
            classifier,
            retrieval,
            web,
            chat,
            memories,
            store,
            gate,
            settings,
        }
    }

    /// Answer `question` for `session`.
    ///
    /// Fails only for an empty question ([`RagError::Validation`]) or when a
    /// clear holds the index past the busy budget ([`RagError::StoreBusy`]).
    /// Every other failure becomes a degraded answer.
    pub async fn route(&self, session: &str, question: &str) -> Result<QueryResponse, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::validation("question must not be empty"));
        }
        let _guard = self.gate.shared().await?;

        let turn = Turn {
            session,
            question,
            recent: self.memories.recent(session, self.settings.context_turns),
        };

        let mut state = RouteState::Classifying;
        loop {
            let next = self.step(state, &turn).await?;
            tracing::debug!(state = next.name(), "router transition");
            state = match next {
                RouteState::Responding(response) => {
                    self.memories
                        .append_exchange(turn.session, turn.question, &response.answer);
                    tracing::info!(
                        session = turn.session,
                        method = response.method.as_str(),
                        sources = response.sources.len(),
                        "query answered"
                    );
                    return Ok(response);
                }
                other => other,
            };
        }
    }

    async fn step(&self, state: RouteState, turn: &Turn<'_>) -> Result<RouteState, RagError> {
        let next = match state {
            RouteState::Classifying => {
                let has_documents = self.has_documents().await;
                let result = self
                    .classifier
                    .classify(turn.question, &turn.recent, has_documents)
                    .await;
                tracing::info!(
                    category = result.category.as_str(),
                    source = ?result.source,
                    confidence = result.confidence,
                    rationale = %result.rationale,
                    "query classified"
                );
                match result.category {
                    Category::General => RouteState::DispatchGeneral {
                        method: Method::Memory,
                    },
                    Category::Websearch => RouteState::DispatchWebSearch,
                    Category::Vectorstore => RouteState::DispatchVectorstore,
                    Category::VagueDocument => RouteState::DispatchVague,
                }
            }

            RouteState::DispatchGeneral { method } => {
                let messages = general_messages(turn.question, &turn.recent);
                RouteState::Responding(match self.synthesize(&messages).await {
                    Ok(answer) => QueryResponse::new(answer, Vec::new(), method),
                    Err(degraded) => degraded,
                })
            }

            RouteState::DispatchWebSearch => match self.web_search(turn.question).await {
                WebOutcome::Found(results) => {
                    let messages = vec![ChatMessage::user(web_prompt(turn.question, &results))];
                    let sources = results
                        .iter()
                        .map(|r| Source::from_web(r, self.settings.preview_chars))
                        .collect();
                    RouteState::Responding(match self.synthesize(&messages).await {
                        Ok(answer) => QueryResponse::new(answer, sources, Method::WebSearch),
                        Err(degraded) => degraded,
                    })
                }
                WebOutcome::Failed(e) => {
                    tracing::warn!(error = %e, "web search failed, answering from memory");
                    RouteState::DispatchGeneral {
                        method: Method::GeneralFallback,
                    }
                }
                WebOutcome::TimedOut => {
                    tracing::warn!("web search timed out");
                    RouteState::Responding(QueryResponse::timed_out("web search"))
                }
            },

            RouteState::DispatchVectorstore => {
                match self.retrieval.search(turn.question, self.settings.top_k).await {
                    Ok(results) if results.is_empty() => RouteState::DispatchVague,
                    Ok(results) => {
                        let messages =
                            vec![ChatMessage::user(rag_prompt(turn.question, &results))];
                        let sources = results.iter().map(Source::from_chunk).collect();
                        RouteState::Responding(match self.synthesize(&messages).await {
                            Ok(answer) => {
                                QueryResponse::new(answer, sources, Method::VectorstoreSearch)
                            }
                            Err(degraded) => degraded,
                        })
                    }
                    Err(_) => RouteState::Responding(QueryResponse::timed_out("document search")),
                }
            }

            RouteState::DispatchVague => {
                RouteState::Responding(QueryResponse::new(GUIDANCE, Vec::new(), Method::Guidance))
            }

            RouteState::Responding(response) => RouteState::Responding(response),
        };
        Ok(next)
    }

    async fn has_documents(&self) -> bool {
        match self.gate.timed(self.store.count()).await {
            Ok(n) => n > 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not count index records");
                false
            }
        }
    }

    /// LLM completion under the synthesis timeout. `Err` is the degraded
    /// answer to send instead.
    async fn synthesize(&self, messages: &[ChatMessage]) -> Result<String, QueryResponse> {
        match tokio::time::timeout(self.settings.synthesis_timeout, self.chat.complete(messages))
            .await
        {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "answer synthesis failed");
                Err(QueryResponse::error(UNAVAILABLE))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.synthesis_timeout.as_secs_f32(),
                    "answer synthesis timed out"
                );
                Err(QueryResponse::timed_out("language model"))
            }
        }
    }

    /// One search plus one retry after a short backoff, all within the web
    /// search timeout. An empty result set counts as a failure.
    async fn web_search(&self, question: &str) -> WebOutcome {
        let attempts = async {
            match self.web.search(question).await {
                Ok(results) => Ok(results),
                Err(e) => {
                    tracing::debug!(error = %e, "web search failed, retrying once");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    self.web.search(question).await
                }
            }
        };

        match tokio::time::timeout(self.settings.web_search_timeout, attempts).await {
            Ok(Ok(results)) if results.is_empty() => {
                WebOutcome::Failed(anyhow::anyhow!("web search returned no results"))
            }
            Ok(Ok(results)) => WebOutcome::Found(results),
            Ok(Err(e)) => WebOutcome::Failed(e),
            Err(_) => WebOutcome::TimedOut,
        }
    }
}

fn general_messages(question: &str, recent: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = recent
        .iter()
        .map(|t| match t.role {
            Role::User => ChatMessage::user(t.text.clone()),
            Role::Assistant => ChatMessage::assistant(t.text.clone()),
        })
        .collect();
    messages.push(ChatMessage::user(question));
    messages
}

fn web_prompt(question: &str, results: &[WebResult]) -> String {
    let context: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    format!(
        "Based on the following web search results, provide a comprehensive and accurate \
         answer to the question: \"{}\"\n\nSearch Results:\n{}\n\nAnswer:",
        question,
        context.join("\n\n")
    )
}

fn rag_prompt(question: &str, results: &[RetrievalResult]) -> String {
    let context: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    format!(
        "You are a helpful AI assistant that answers questions based on the provided context.\n\
         Use only the information from the context to answer the question. If the context doesn't\n\
         contain enough information to answer the question, say \"I don't have enough information\n\
         to answer this question based on the provided context.\"\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context.join("\n\n"),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_wire_names() {
        for m in [
            Method::Memory,
            Method::WebSearch,
            Method::VectorstoreSearch,
            Method::Guidance,
            Method::Error,
            Method::GeneralFallback,
        ] {
            assert_eq!(
                serde_json::to_value(m).unwrap(),
                serde_json::Value::String(m.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_source_omits_missing_fields() {
        let s = Source {
            file_name: Some("report.pdf".to_string()),
            content_preview: Some("Revenue".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"file_name": "report.pdf", "content_preview": "Revenue"})
        );
    }

    #[test]
    fn test_web_source_preview_is_truncated() {
        let r = WebResult {
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            content: "a".repeat(300),
        };
        let s = Source::from_web(&r, 200);
        assert_eq!(s.content_preview.unwrap().chars().count(), 203);
    }

    #[test]
    fn test_general_messages_replay_memory() {
        let recent = vec![
            ConversationTurn::user("My name is Ada"),
            ConversationTurn::assistant("Hello Ada"),
        ];
        let messages = general_messages("What is my name?", &recent);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
        assert_eq!(messages[2].content, "What is my name?");
    }

    #[test]
    fn test_prompts_embed_context() {
        let r = RetrievalResult {
            chunk_id: "c".to_string(),
            document_id: "d".to_string(),
            ordinal: 0,
            score: 1.0,
            source_label: "report.pdf".to_string(),
            preview_text: "Revenue grew 12%.".to_string(),
            text: "Revenue grew 12%. Costs fell 3% after the plant closure.".to_string(),
        };
        let p = rag_prompt("How much did revenue grow?", &[r]);
        assert!(p.contains("Context:\nRevenue grew 12%. Costs fell 3% after the plant closure."));
        assert!(p.contains("Question: How much did revenue grow?"));

        let w = WebResult {
            title: "CPI".to_string(),
            url: "u".to_string(),
            content: "Inflation eased.".to_string(),
        };
        let p = web_prompt("inflation?", &[w]);
        assert!(p.contains("question: \"inflation?\""));
        assert!(p.contains("Search Results:\nInflation eased."));
    }
}
