//! Query Classifier: LLM function call with a deterministic fallback.
//!
//! The LLM is forced to call `classify_query`; its arguments are validated
//! against the four categories. A failed call gets one more attempt after
//! a short backoff, all within the classify timeout. Anything that still
//! goes wrong (timeout, provider error, malformed or unknown output) is
//! logged and answered by [`fallback_classify`]. `classify` never fails.

use std::sync::Arc;
use std::time::Duration;

use adaptive_rag_core::classify::{
    fallback_classify, function_parameters, parse_function_arguments, Category,
    ClassificationResult, CLASSIFIER_PROMPT, FUNCTION_NAME,
};
use adaptive_rag_core::models::{ConversationTurn, Role};

use crate::llm::{ChatMessage, ChatModel, FunctionSpec};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

pub struct QueryClassifier {
    chat: Arc<dyn ChatModel>,
    timeout: Duration,
    function: FunctionSpec,
}

impl QueryClassifier {
    pub fn new(chat: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self {
            chat,
            timeout,
            function: FunctionSpec {
                name: FUNCTION_NAME.to_string(),
                description: "Classify a user query into one of four categories".to_string(),
                parameters: function_parameters(),
            },
        }
    }

    pub async fn classify(
        &self,
        question: &str,
        recent: &[ConversationTurn],
        has_documents: bool,
    ) -> ClassificationResult {
        let messages = classifier_messages(question, recent);

        let outcome = tokio::time::timeout(self.timeout, self.call_with_retry(&messages)).await;
        let arguments = match outcome {
            Ok(Ok(arguments)) => arguments,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "classifier call failed, using fallback");
                return fallback_classify(question, has_documents);
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f32(),
                    "classifier timed out, using fallback"
                );
                return fallback_classify(question, has_documents);
            }
        };

        match parse_function_arguments(&arguments) {
            Ok(result) => restrict_to_index(result, has_documents),
            Err(e) => {
                tracing::warn!(error = %e, "classifier returned invalid arguments, using fallback");
                fallback_classify(question, has_documents)
            }
        }
    }

    async fn call_with_retry(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        match self.chat.call_function(messages, &self.function).await {
            Ok(arguments) => Ok(arguments),
            Err(e) => {
                tracing::debug!(error = %e, "classifier call failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.chat.call_function(messages, &self.function).await
            }
        }
    }
}

/// A VECTORSTORE answer over an empty index can only end in guidance, so
/// say so up front.
fn restrict_to_index(mut result: ClassificationResult, has_documents: bool) -> ClassificationResult {
    if result.category == Category::Vectorstore && !has_documents {
        result.category = Category::VagueDocument;
        result.rationale = format!("{} (no documents are indexed)", result.rationale);
    }
    result
}

fn classifier_messages(question: &str, recent: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(CLASSIFIER_PROMPT)];

    if !recent.is_empty() {
        let context: Vec<String> = recent
            .iter()
            .map(|t| {
                let who = match t.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", who, t.text)
            })
            .collect();
        messages.push(ChatMessage::system(format!(
            "Recent conversation:\n{}",
            context.join("\n")
        )));
    }

    messages.push(ChatMessage::user(format!("Classify this query: {}", question)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_rag_core::classify::ClassificationSource;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted function-call outcomes in order.
    struct Scripted {
        replies: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            bail!("not scripted")
        }
        async fn call_function(
            &self,
            _messages: &[ChatMessage],
            _function: &FunctionSpec,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                bail!("no more replies");
            }
            replies.remove(0)
        }
    }

    struct Slow;

    #[async_trait]
    impl ChatModel for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            bail!("not used")
        }
        async fn call_function(
            &self,
            _messages: &[ChatMessage],
            _function: &FunctionSpec,
        ) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(r#"{"classification":"GENERAL"}"#.to_string())
        }
    }

    fn args(category: &str) -> Result<String> {
        Ok(format!(
            r#"{{"classification":"{}","reasoning":"test","confidence":0.9}}"#,
            category
        ))
    }

    #[tokio::test]
    async fn test_llm_result_is_used() {
        let chat = Arc::new(Scripted::new(vec![args("WEBSEARCH")]));
        let c = QueryClassifier::new(chat, Duration::from_secs(5));
        let r = c.classify("what is new", &[], true).await;
        assert_eq!(r.category, Category::Websearch);
        assert_eq!(r.source, ClassificationSource::Llm);
    }

    #[tokio::test]
    async fn test_one_retry_after_failure() {
        let chat = Arc::new(Scripted::new(vec![Err(anyhow::anyhow!("503")), args("GENERAL")]));
        let c = QueryClassifier::new(chat.clone(), Duration::from_secs(5));
        let r = c.classify("hello", &[], false).await;
        assert_eq!(r.source, ClassificationSource::Llm);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_failures_fall_back() {
        let chat = Arc::new(Scripted::new(vec![
            Err(anyhow::anyhow!("503")),
            Err(anyhow::anyhow!("503")),
        ]));
        let c = QueryClassifier::new(chat.clone(), Duration::from_secs(5));
        let r = c.classify("What is the latest news on inflation?", &[], false).await;
        assert_eq!(r.category, Category::Websearch);
        assert_eq!(r.source, ClassificationSource::Fallback);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back() {
        let chat = Arc::new(Scripted::new(vec![args("SPORTS")]));
        let c = QueryClassifier::new(chat, Duration::from_secs(5));
        let r = c.classify("hi there", &[], false).await;
        assert_eq!(r.category, Category::General);
        assert_eq!(r.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let c = QueryClassifier::new(Arc::new(Slow), Duration::from_millis(50));
        let r = c.classify("Tell me about the report", &[], false).await;
        assert_eq!(r.source, ClassificationSource::Fallback);
        assert_ne!(r.category, Category::Vectorstore);
    }

    #[tokio::test]
    async fn test_vectorstore_without_documents_is_vague() {
        let chat = Arc::new(Scripted::new(vec![args("VECTORSTORE")]));
        let c = QueryClassifier::new(chat, Duration::from_secs(5));
        let r = c.classify("Tell me about the report", &[], false).await;
        assert_eq!(r.category, Category::VagueDocument);
    }

    #[test]
    fn test_messages_include_memory_context() {
        let recent = vec![
            ConversationTurn::user("I uploaded the Q3 report"),
            ConversationTurn::assistant("Thanks"),
        ];
        let messages = classifier_messages("what about it", &recent);
        assert_eq!(messages.len(), 3);
        assert!(messages[1].content.contains("User: I uploaded the Q3 report"));
        assert!(messages[2].content.ends_with("what about it"));
        assert_eq!(classifier_messages("hi", &[]).len(), 2);
    }
}
