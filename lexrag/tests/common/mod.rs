#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;

use lexrag::backends::{
    CallPurpose, ExampleStore, FewShotExample, GenerationOptions, GenerationStats, Generator,
    Reranker, Retriever, StreamChunk, TokenStream,
};
use lexrag::classify::Intent;
use lexrag::config::Config;
use lexrag::error::{LexError, Result};
use lexrag::models::{ChatMessage, RerankOutcome, RetrievalOutcome, RetrievedDocument, SearchFilter};
use lexrag::services::Orchestrator;

static LOGGER: Once = Once::new();

/// Installs a test subscriber once per binary; `RUST_LOG` controls output.
pub fn init_test_logger() {
    LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "lexrag=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub const GRADE_YES: &str = r#"{"verdict": "yes", "score": 0.9, "reason": "Dokumentet behandlar frågan."}"#;
pub const GRADE_NO: &str = r#"{"verdict": "no", "score": 0.1, "reason": "Dokumentet handlar om annat."}"#;

pub const LONG_ANSWER: &str = "Enligt 7 § lagen om anställningsskydd ska en uppsägning från \
arbetsgivarens sida vara sakligt grundad [1]. Det innebär att arbetsgivaren måste kunna visa \
ett godtagbart skäl, till exempel arbetsbrist eller personliga skäl, innan anställningen sägs upp [1].";

/// A structured answer citing the first LAS document with a verbatim quote.
pub fn structured_answer(mode: &str, answer: &str) -> String {
    serde_json::json!({
        "mode": mode,
        "evidenceLacking": false,
        "answer": answer,
        "sources": [{
            "docId": "sfs-las-7",
            "chunkId": "",
            "quote": "ska vara sakligt grundad",
            "location": "7 §"
        }],
        "unsourcedFacts": [],
        "selfCheck": "Alla påståenden stöds av källa 1."
    })
    .to_string()
}

pub fn las_documents() -> Vec<RetrievedDocument> {
    vec![
        RetrievedDocument::new(
            "sfs-las-7",
            "Lag om anställningsskydd 7 §",
            "En uppsägning från arbetsgivarens sida ska vara sakligt grundad.",
        )
        .with_source("SFS", "statute")
        .with_score(0.82),
        RetrievedDocument::new(
            "sfs-las-11",
            "Lag om anställningsskydd 11 §",
            "För både arbetsgivare och arbetstagare gäller en minsta uppsägningstid av en månad.",
        )
        .with_source("SFS", "statute")
        .with_score(0.74),
    ]
}

/// Generator double replying from per-purpose queues. A purpose with an
/// empty queue falls back to its default reply, or fails.
pub struct ScriptedGenerator {
    queued: Mutex<HashMap<CallPurpose, VecDeque<String>>>,
    defaults: HashMap<CallPurpose, String>,
    calls: Mutex<Vec<(CallPurpose, Vec<ChatMessage>)>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            defaults: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn reply(mut self, purpose: CallPurpose, text: impl Into<String>) -> Self {
        self.queued
            .get_mut()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(text.into());
        self
    }

    pub fn default_reply(mut self, purpose: CallPurpose, text: impl Into<String>) -> Self {
        self.defaults.insert(purpose, text.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, purpose: CallPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == purpose)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Messages sent with each call of `purpose`, in call order.
    pub fn messages(&self, purpose: CallPurpose) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == purpose)
            .map(|(_, messages)| messages.clone())
            .collect()
    }

    fn next_reply(&self, purpose: CallPurpose) -> Option<String> {
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&purpose)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| self.defaults.get(&purpose).cloned())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        self.calls
            .lock()
            .unwrap()
            .push((options.purpose, messages.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .next_reply(options.purpose)
            .ok_or_else(|| LexError::Llm(format!("no scripted reply for {}", options.purpose)))?;

        let chunks = vec![
            Ok(StreamChunk::token(reply)),
            Ok(StreamChunk::finished(GenerationStats {
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
                ..Default::default()
            })),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub struct StaticRetriever {
    outcome: RetrievalOutcome,
    fail: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            outcome: RetrievalOutcome {
                documents,
                ..Default::default()
            },
            fail: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_detected_intent(mut self, label: &str) -> Self {
        self.outcome.detected_intent = Some(label.to_string());
        self
    }

    pub fn failing() -> Self {
        let mut retriever = Self::new(Vec::new());
        retriever.fail = true;
        retriever
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search_with_routing(
        &self,
        query: &str,
        k: usize,
        _filter: Option<&SearchFilter>,
        _history: &[ChatMessage],
    ) -> Result<RetrievalOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());

        if self.fail {
            return Err(LexError::Retrieval(
                "connection refused: 10.0.3.7:8900".to_string(),
            ));
        }

        let mut outcome = self.outcome.clone();
        outcome.documents.truncate(k);
        Ok(outcome)
    }
}

/// Reranker whose calls never complete.
pub struct StalledReranker {
    calls: AtomicUsize,
}

impl StalledReranker {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for StalledReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: Vec<RetrievedDocument>,
        _top_k: usize,
    ) -> Result<RerankOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending().await
    }
}

/// Example store that sleeps before answering and records whether the
/// lookup ever completed.
pub struct SlowExampleStore {
    delay: Duration,
    completed: Arc<AtomicBool>,
}

impl SlowExampleStore {
    pub fn new(delay: Duration) -> (Self, Arc<AtomicBool>) {
        let completed = Arc::new(AtomicBool::new(false));
        (
            Self {
                delay,
                completed: completed.clone(),
            },
            completed,
        )
    }
}

#[async_trait]
impl ExampleStore for SlowExampleStore {
    async fn examples_for(&self, intent: Intent, _limit: usize) -> Result<Vec<FewShotExample>> {
        tokio::time::sleep(self.delay).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(vec![FewShotExample {
            intent,
            question: "Exempelfråga".to_string(),
            answer: "Exempelsvar [1].".to_string(),
        }])
    }
}

/// Defaults with timeouts short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retrieval.timeout_secs = 5;
    config.generation.timeout_secs = 5;
    config.grading.timeout_ms = 2000;
    config.decontextualize.timeout_ms = 2000;
    config
}

pub fn orchestrator(
    config: Config,
    retriever: Arc<StaticRetriever>,
    generator: Arc<ScriptedGenerator>,
) -> Orchestrator {
    let (examples, _) = SlowExampleStore::new(Duration::from_millis(1));
    Orchestrator::new(config, retriever, generator, Arc::new(examples))
}
