//! Retrieval-grounded answering against a single partition.

use crate::completion::{ChatMessage, Completer, CompletionRequest};
use crate::embedding::Embedder;
use crate::index::{IndexStore, PartitionHandle, ScoredChunk};
use crate::processing::retry::{RetryOutcome, RetryPolicy};
use crate::processing::types::{AnswerError, AttemptError};
use std::sync::Arc;

/// Reply the model is instructed to give when the context lacks the answer.
pub const NOT_FOUND_ANSWER: &str = "Not found in document.";

/// System instruction constraining answers to the retrieved context.
pub const SYSTEM_PROMPT: &str = "You are a QA bot. Answer ONLY using the provided context. \
If the context does not contain the answer, say exactly: \"Not found in document.\" \
Be concise and specific. If relevant, cite page numbers from metadata.";

/// Retrieval and generation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerSettings {
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on answer tokens.
    pub max_output_tokens: u32,
    /// Attempt budget per question.
    pub retry: RetryPolicy,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            top_k: 4,
            temperature: 0.0,
            max_output_tokens: 300,
            retry: RetryPolicy::default(),
        }
    }
}

/// Answers questions from the chunks of one partition.
pub struct AnsweringEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    completer: Arc<dyn Completer>,
    settings: AnswerSettings,
}

impl AnsweringEngine {
    /// Compose an engine from its capabilities.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        completer: Arc<dyn Completer>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            completer,
            settings,
        }
    }

    /// Active settings.
    pub fn settings(&self) -> &AnswerSettings {
        &self.settings
    }

    /// Answer `question`, retrying failed attempts per the configured policy.
    pub async fn answer(
        &self,
        partition: &PartitionHandle,
        question: &str,
    ) -> Result<String, AnswerError> {
        let outcome = self
            .settings
            .retry
            .run(|_attempt| self.answer_once(partition, question))
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                tracing::debug!(partition = %partition, attempts, "Question answered");
                Ok(value)
            }
            RetryOutcome::Exhausted { error, attempts } => {
                tracing::error!(
                    partition = %partition,
                    attempts,
                    kind = error.kind(),
                    error = %error,
                    "Giving up on question"
                );
                Err(AnswerError::Exhausted {
                    attempts,
                    source: error,
                })
            }
        }
    }

    /// One retrieve, render and invoke pass without retries.
    pub async fn answer_once(
        &self,
        partition: &PartitionHandle,
        question: &str,
    ) -> Result<String, AttemptError> {
        let query = self.embedder.embed_query(question).await?;
        let hits = self
            .store
            .similarity_search(partition.name(), &query, self.settings.top_k)
            .await?;
        tracing::debug!(partition = %partition, hits = hits.len(), "Retrieved context");

        let context = render_context(&hits);
        let response = self
            .completer
            .complete(CompletionRequest {
                messages: build_messages(&context, question),
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            })
            .await?;
        Ok(response.content.trim().to_string())
    }
}

/// Render retrieved chunks in rank order as `[meta: k=v, ...] content` blocks.
pub fn render_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|hit| format!("[meta: {}] {}", hit.chunk.render_metadata(), hit.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System instruction plus the user turn carrying context and question.
pub fn build_messages(context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {question}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{ChatRole, CompletionError, CompletionResponse};
    use crate::embedding::HashEmbedder;
    use crate::index::{IndexError, IndexRecord};
    use crate::processing::types::{Chunk, Metadata, MetadataValue};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedStore {
        hits: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl IndexStore for FixedStore {
        async fn count(&self, _partition: &str) -> Result<usize, IndexError> {
            Ok(self.hits.len())
        }

        async fn add(
            &self,
            _partition: &str,
            _records: Vec<IndexRecord>,
        ) -> Result<(), IndexError> {
            Ok(())
        }

        async fn similarity_search(
            &self,
            _partition: &str,
            _query: &[f32],
            k: usize,
        ) -> Result<Vec<ScoredChunk>, IndexError> {
            Ok(self.hits.iter().take(k).cloned().collect())
        }
    }

    /// Fails the first `failures` calls, then replies with `reply`; records every request.
    struct ScriptedCompleter {
        failures: usize,
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompleter {
        fn new(failures: usize, reply: &str) -> Self {
            Self {
                failures,
                reply: reply.into(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Completer for ScriptedCompleter {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                requests.len()
            };
            if call <= self.failures {
                Err(CompletionError::GenerationFailed(format!("failure {call}")))
            } else {
                Ok(CompletionResponse {
                    content: format!("  {}  ", self.reply),
                })
            }
        }
    }

    fn hit(content: &str, page: i64, score: f32) -> ScoredChunk {
        let mut metadata = Metadata::new();
        metadata.insert("page".into(), MetadataValue::from(page));
        metadata.insert("source".into(), MetadataValue::from("pdf"));
        ScoredChunk {
            chunk: Chunk::new(content, metadata),
            score,
        }
    }

    fn engine(completer: Arc<ScriptedCompleter>, hits: Vec<ScoredChunk>) -> AnsweringEngine {
        AnsweringEngine::new(
            Arc::new(HashEmbedder::new(8)),
            Arc::new(FixedStore { hits }),
            completer,
            AnswerSettings {
                top_k: 2,
                temperature: 0.0,
                max_output_tokens: 300,
                retry: RetryPolicy {
                    max_attempts: 3,
                    initial_backoff: Duration::from_secs(1),
                    max_backoff: Duration::from_secs(8),
                },
            },
        )
    }

    #[test]
    fn context_keeps_rank_order_and_metadata() {
        let context = render_context(&[hit("first", 2, 0.9), hit("second", 1, 0.5)]);
        assert_eq!(
            context,
            "[meta: page=2, source=pdf] first\n\n[meta: page=1, source=pdf] second"
        );
    }

    #[test]
    fn messages_carry_sentinel_instruction_and_question() {
        let messages = build_messages("ctx", "What is due?");
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("say exactly: \"Not found in document.\""));
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].content, "Context:\nctx\n\nQuestion: What is due?");
    }

    #[tokio::test(start_paused = true)]
    async fn answer_uses_top_k_context_and_trims_reply() {
        let completer = Arc::new(ScriptedCompleter::new(0, "Net 30 (page 2)."));
        let engine = engine(
            completer.clone(),
            vec![hit("a", 1, 0.9), hit("b", 2, 0.8), hit("c", 3, 0.1)],
        );

        let answer = engine
            .answer(&PartitionHandle::new("doc_x"), "When is payment due?")
            .await
            .unwrap();

        assert_eq!(answer, "Net 30 (page 2).");
        let requests = completer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let user = &requests[0].messages[1].content;
        assert!(user.contains("] a\n\n[meta: page=2, source=pdf] b"));
        assert!(!user.contains("] c"));
        assert_eq!(requests[0].max_output_tokens, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let completer = Arc::new(ScriptedCompleter::new(2, "ok"));
        let engine = engine(completer.clone(), vec![hit("a", 1, 0.9)]);

        let answer = engine
            .answer(&PartitionHandle::new("doc_x"), "q")
            .await
            .unwrap();

        assert_eq!(answer, "ok");
        assert_eq!(completer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_failure() {
        let completer = Arc::new(ScriptedCompleter::new(usize::MAX, "never"));
        let engine = engine(completer.clone(), vec![hit("a", 1, 0.9)]);

        let error = engine
            .answer(&PartitionHandle::new("doc_x"), "q")
            .await
            .unwrap_err();

        assert_eq!(completer.calls(), 3);
        assert_eq!(error.kind(), "GenerationFailed");
        let AnswerError::Exhausted { attempts, source } = error;
        assert_eq!(attempts, 3);
        assert!(source.to_string().contains("failure 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_partition_still_asks_the_model() {
        let completer = Arc::new(ScriptedCompleter::new(0, NOT_FOUND_ANSWER));
        let engine = engine(completer.clone(), Vec::new());

        let answer = engine
            .answer(&PartitionHandle::new("doc_x"), "q")
            .await
            .unwrap();

        assert_eq!(answer, NOT_FOUND_ANSWER);
        let requests = completer.requests.lock().unwrap();
        assert!(requests[0].messages[1].content.starts_with("Context:\n\n\nQuestion: q"));
    }
}
