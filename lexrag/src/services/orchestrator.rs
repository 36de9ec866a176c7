use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::events::{Phase, StreamEvent};
use super::metrics::{MetricsRecorder, Stage};
use super::prefetch::FewShotPrefetch;
use super::streaming::{split_tokens, EventSink};
use crate::backends::{
    CallPurpose, ExampleStore, Generation, GenerationOptions, Generator, Reranker, Retriever,
};
use crate::classify::{answer_contract, Decontextualizer, Intent, QueryClassifier};
use crate::config::Config;
use crate::error::{LexError, Result, SECURITY_REJECTION_MESSAGE};
use crate::generation::{
    answer_schema, assemble_context, fallback_answer, format_sources, CriticOutcome, CriticReviser,
    ParseOutcome, StructuredOutputParser, TruncationGuard,
};
use crate::grading::{GradingCoordinator, SelfReflector};
use crate::guardrail::{client_fingerprint, evidence_level, JailWarden, QueryVerdict};
use crate::llm::prompts;
use crate::models::{
    ChatMessage, EvidenceLevel, GuardrailStatus, GuardrailVerdict, Outcome, ProcessOptions, Query,
    RagResult, ResponseMode, RetrievedDocument, Role, SourceRef, StructuredAnswer,
};

const FEW_SHOT_LIMIT: usize = 3;
/// Longest wait for few-shot examples once the prompt is ready to assemble.
const PREFETCH_WAIT: Duration = Duration::from_secs(2);

/// Runs `work` under a deadline, giving up early if the request is cancelled.
async fn bounded<T>(
    stage: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LexError::Cancelled),
        outcome = tokio::time::timeout(limit, work) => match outcome {
            Ok(result) => result,
            Err(_) => Err(LexError::Timeout {
                stage,
                after_ms: limit.as_millis() as u64,
            }),
        },
    }
}

async fn cancellable<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LexError::Cancelled),
        value = work => Ok(value),
    }
}

/// Last `max_messages` non-system, non-blank history messages.
fn recent_history(history: &[ChatMessage], max_messages: usize) -> Vec<ChatMessage> {
    let relevant: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
        .collect();
    let start = relevant.len().saturating_sub(max_messages);
    relevant[start..].iter().map(|m| (*m).clone()).collect()
}

/// Mutable state of a single run.
struct RunState {
    recorder: MetricsRecorder,
    mode: ResponseMode,
    intent: Intent,
    trail: Vec<String>,
}

impl RunState {
    fn new(query: &Query) -> Self {
        Self {
            recorder: MetricsRecorder::start(),
            mode: ResponseMode::resolve(query.mode, ResponseMode::Assist),
            intent: Intent::General,
            trail: Vec::new(),
        }
    }
}

/// The RAG pipeline. Cheap to clone; every collaborator is shared.
///
/// Collaborator failures (retrieval, generation) end the run with the generic
/// failure result. Quality stages (grading, reflection, reranking, parsing,
/// anti-truncation, critic) degrade instead of failing the request.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    retriever: Arc<dyn Retriever>,
    reranker: Option<Arc<dyn Reranker>>,
    generator: Arc<dyn Generator>,
    examples: Arc<dyn ExampleStore>,
    warden: JailWarden,
    classifier: QueryClassifier,
    decontextualizer: Decontextualizer,
    grading: GradingCoordinator,
    reflector: SelfReflector,
    parser: StructuredOutputParser,
    truncation: TruncationGuard,
    critic: CriticReviser,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        examples: Arc<dyn ExampleStore>,
    ) -> Self {
        let generation = &config.generation;

        Self {
            retriever,
            reranker: None,
            examples,
            warden: JailWarden::new(&config.guardrail),
            classifier: QueryClassifier::new(),
            decontextualizer: Decontextualizer::new(
                generator.clone(),
                &config.decontextualize,
                generation.max_history_turns,
            ),
            grading: GradingCoordinator::new(generator.clone(), &config.grading),
            reflector: SelfReflector::new(
                generator.clone(),
                Duration::from_millis(config.grading.timeout_ms),
            ),
            parser: StructuredOutputParser::new(
                generator.clone(),
                generation.max_tokens,
                generation.temperature,
                generation.refusal_template.clone(),
            ),
            truncation: TruncationGuard::new(
                generator.clone(),
                generation.max_tokens,
                generation.temperature,
            ),
            critic: CriticReviser::new(
                generator.clone(),
                config.effective_critic_rounds(),
                generation.max_tokens,
                generation.temperature,
                generation.refusal_template.clone(),
            ),
            generator,
            config: Arc::new(config),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replaces the default warden, e.g. to share a violation store.
    pub fn with_warden(mut self, warden: JailWarden) -> Self {
        self.warden = warden;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Answers one question. Never fails: errors become the generic failure
    /// result and security refusals the fixed rejection text.
    pub async fn process(&self, query: Query, options: ProcessOptions) -> RagResult {
        self.execute(query, options, &EventSink::disabled(), &CancellationToken::new())
            .await
    }

    /// Shared by `process` and the streaming entry point. Emits exactly one
    /// terminal event on `sink`.
    pub(crate) async fn execute(
        &self,
        query: Query,
        options: ProcessOptions,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> RagResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("rag_request", %request_id, hint = %query.mode);
        self.execute_in_span(query, options, sink, cancel)
            .instrument(span)
            .await
    }

    async fn execute_in_span(
        &self,
        query: Query,
        options: ProcessOptions,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> RagResult {
        let mut state = RunState::new(&query);
        sink.emit(StreamEvent::phase(Phase::Start)).await;

        match self.run(&query, &options, &mut state, sink, cancel).await {
            Ok(result) => {
                if result.outcome == Outcome::Blocked {
                    sink.emit(StreamEvent::Error {
                        message: result.answer.clone(),
                        code: "security_violation".to_string(),
                    })
                    .await;
                } else {
                    sink.emit(StreamEvent::Done {
                        result: Box::new(result.clone()),
                    })
                    .await;
                }
                result
            }
            Err(e) => {
                match &e {
                    LexError::Cancelled => tracing::debug!("Request cancelled"),
                    LexError::SecurityViolation { reason } => {
                        tracing::warn!(%reason, mode = %state.mode, "Security violation in generated answer")
                    }
                    _ => tracing::error!(error = %e, code = e.code(), mode = %state.mode, "Pipeline failed"),
                }

                let mut result = RagResult::from_error(&e, state.mode, state.recorder.snapshot());
                result.intent = state.intent;
                sink.emit(StreamEvent::Error {
                    message: e.user_message().to_string(),
                    code: e.code().to_string(),
                })
                .await;
                result
            }
        }
    }

    async fn run(
        &self,
        query: &Query,
        options: &ProcessOptions,
        state: &mut RunState,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RagResult> {
        let started = Instant::now();
        let verdict = self
            .warden
            .check_query(options.client_id.as_deref(), &query.text, Instant::now());
        state.recorder.record(Stage::Safety, started);

        match &verdict {
            QueryVerdict::Pass { .. } => {}
            QueryVerdict::Compassionate(_) => {
                let message = verdict.user_message().unwrap_or_default();
                sink.emit(StreamEvent::Refusal {
                    message: message.clone(),
                    evidence_level: EvidenceLevel::None,
                })
                .await;
                return Ok(RagResult::compassionate(
                    &message,
                    state.mode,
                    state.recorder.snapshot(),
                ));
            }
            _ => {
                tracing::warn!(
                    verdict = verdict.label(),
                    client = ?options.client_id.as_deref().map(client_fingerprint),
                    "Query refused before generation"
                );
                let message = verdict
                    .user_message()
                    .unwrap_or_else(|| SECURITY_REJECTION_MESSAGE.to_string());
                return Ok(RagResult::blocked(
                    &message,
                    state.mode,
                    state.recorder.snapshot(),
                ));
            }
        }

        let started = Instant::now();
        let classification = self.classifier.classify(&query.text);
        state.mode = ResponseMode::resolve(query.mode, classification.suggested_mode);
        state.intent = classification.intent;
        state.recorder.record(Stage::Classify, started);

        tracing::info!(
            mode = %state.mode,
            intent = %state.intent,
            confidence = classification.confidence,
            hint = %query.mode,
            "Query classified"
        );

        if state.mode == ResponseMode::Chat {
            return self.chat(query, state, sink, cancel).await;
        }

        let prefetch = FewShotPrefetch::spawn(
            self.examples.clone(),
            state.intent,
            FEW_SHOT_LIMIT,
            cancel,
        );
        self.answer(query, options, state, prefetch, sink, cancel).await
    }

    /// Direct low-temperature generation without retrieval.
    async fn chat(
        &self,
        query: &Query,
        state: &mut RunState,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RagResult> {
        let generation_config = &self.config.generation;
        let mut messages = vec![ChatMessage::system(prompts::system_prompt(
            ResponseMode::Chat,
            None,
            &[],
        ))];
        messages.extend(recent_history(&query.history, generation_config.max_history_turns));
        messages.push(ChatMessage::user(query.text.clone()));

        sink.emit(StreamEvent::Metadata {
            mode: state.mode,
            intent: state.intent,
            evidence_level: EvidenceLevel::None,
            sources: Vec::new(),
        })
        .await;
        sink.emit(StreamEvent::phase(Phase::GenerationStart)).await;

        let options = GenerationOptions::for_purpose(CallPurpose::Answer)
            .temperature(generation_config.chat_temperature)
            .max_tokens(generation_config.max_tokens);
        let generation = self.generate(&messages, &options, state, cancel).await?;

        let started = Instant::now();
        let verdict =
            self.warden
                .validate_response(generation.text.trim(), ResponseMode::Chat, None, &[])?;
        state.recorder.record(Stage::Guardrail, started);
        state.recorder.metrics_mut().corrections = verdict.corrections.len();

        self.emit_answer(&verdict, sink).await;

        Ok(RagResult {
            answer: verdict.corrected_text.clone(),
            outcome: Outcome::Answered,
            mode: state.mode,
            intent: state.intent,
            evidence_level: EvidenceLevel::None,
            evidence_lacking: false,
            structured: None,
            sources: Vec::new(),
            guardrail: Some(verdict),
            reasoning: std::mem::take(&mut state.trail),
            metrics: state.recorder.snapshot(),
        })
    }

    /// Retrieval-backed path for ASSIST and EVIDENCE.
    async fn answer(
        &self,
        query: &Query,
        options: &ProcessOptions,
        state: &mut RunState,
        mut prefetch: FewShotPrefetch,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<RagResult> {
        let question = if query.has_history() {
            let started = Instant::now();
            let rewrite = cancellable(
                cancel,
                self.decontextualizer
                    .decontextualize(&query.text, &query.history),
            )
            .await?;
            state.recorder.record(Stage::Decontextualize, started);

            if rewrite.rewritten {
                sink.emit(StreamEvent::Decontextualized {
                    original: query.text.clone(),
                    rewritten: rewrite.question.clone(),
                })
                .await;
            }
            rewrite.question
        } else {
            query.text.clone()
        };

        let history = recent_history(&query.history, self.config.generation.max_history_turns);
        let top_k = options.top_k.unwrap_or(self.config.retrieval.top_k).max(1);

        let started = Instant::now();
        let retrieval = bounded(
            "retrieval",
            Duration::from_secs(self.config.retrieval.timeout_secs),
            cancel,
            self.retriever
                .search_with_routing(&question, top_k, options.filter.as_ref(), &history),
        )
        .await;
        state.recorder.record(Stage::Retrieval, started);
        let retrieval = retrieval?;

        state.recorder.metrics_mut().documents_retrieved = retrieval.documents.len();
        tracing::info!(
            documents = retrieval.documents.len(),
            strategy = ?retrieval.metrics.strategy,
            detected_intent = ?retrieval.detected_intent,
            "Retrieval complete"
        );

        if state.intent == Intent::General {
            let detected = retrieval
                .detected_intent
                .as_deref()
                .and_then(Intent::from_label)
                .filter(|intent| *intent != Intent::General);
            if let Some(detected) = detected {
                tracing::debug!(intent = %detected, "Using intent detected by retrieval");
                state.intent = detected;
                prefetch = FewShotPrefetch::spawn(
                    self.examples.clone(),
                    detected,
                    FEW_SHOT_LIMIT,
                    cancel,
                );
            }
        }

        sink.emit(StreamEvent::Phase {
            phase: Phase::RetrievalComplete,
            detail: Some(format!("{} dokument", retrieval.documents.len())),
        })
        .await;

        let mut relevant = retrieval.documents;
        if self.config.grading.enabled && !relevant.is_empty() {
            sink.emit(StreamEvent::phase(Phase::GradingStart)).await;
            let grading =
                cancellable(cancel, self.grading.grade_documents(&question, &relevant)).await?;

            state.trail.push(format!(
                "Relevansbedömning: {} av {} dokument bedömdes relevanta",
                grading.metrics.relevant, grading.metrics.total
            ));
            sink.emit(StreamEvent::Grading {
                metrics: grading.metrics.clone(),
            })
            .await;
            state.recorder.metrics_mut().grading = Some(grading.metrics);
            relevant = grading.relevant;
        }
        state.recorder.metrics_mut().documents_after_grading = relevant.len();

        let mut evidence_missing = false;
        if relevant.is_empty() {
            state.trail.push("Inga relevanta källor hittades".to_string());
            if state.mode.is_evidence_bound() {
                return Ok(self.refuse(state, prefetch, sink).await);
            }
            evidence_missing = true;
        }

        if self.config.grading.self_reflection && !relevant.is_empty() {
            let reflection = cancellable(
                cancel,
                self.reflector.reflect(&question, &format_sources(&relevant)),
            )
            .await?;

            if reflection.degraded {
                state
                    .trail
                    .push("Självreflektionen kunde inte genomföras, underlaget godtogs".to_string());
            } else if !reflection.sufficient {
                state.trail.extend(reflection.trail());
                if state.mode.is_evidence_bound() {
                    return Ok(self.refuse(state, prefetch, sink).await);
                }
                evidence_missing = true;
            }
        }

        let ranked = match &self.reranker {
            Some(reranker) if !relevant.is_empty() => {
                let started = Instant::now();
                let ranked = self.rerank(reranker.as_ref(), &question, relevant, cancel).await?;
                state.recorder.record(Stage::Rerank, started);

                if ranked.is_empty() && !evidence_missing {
                    state
                        .trail
                        .push("Ingen källa nådde omrankningens tröskelvärde".to_string());
                    if state.mode.is_evidence_bound() {
                        return Ok(self.refuse(state, prefetch, sink).await);
                    }
                    evidence_missing = true;
                }
                ranked
            }
            _ => relevant,
        };
        state.recorder.metrics_mut().documents_after_rerank = ranked.len();

        let context = assemble_context(ranked, self.config.generation.max_context_tokens);
        state.recorder.metrics_mut().sources_dropped = context.dropped;
        state.recorder.metrics_mut().context_tokens = context.tokens;
        if context.dropped > 0 {
            tracing::info!(
                dropped = context.dropped,
                kept = context.sources.len(),
                "Context budget exceeded, dropped lowest-ranked sources"
            );
        }

        let examples = prefetch.join_within(PREFETCH_WAIT).await;
        let mut messages = vec![ChatMessage::system(prompts::system_prompt(
            state.mode,
            answer_contract(state.intent),
            &examples,
        ))];
        messages.extend(history);
        messages.push(ChatMessage::user(prompts::answer_prompt(
            &question,
            &context.text,
        )));

        let source_refs: Vec<SourceRef> = context.sources.iter().map(SourceRef::from).collect();
        sink.emit(StreamEvent::Metadata {
            mode: state.mode,
            intent: state.intent,
            evidence_level: evidence_level(&context.sources),
            sources: source_refs.clone(),
        })
        .await;
        sink.emit(StreamEvent::phase(Phase::GenerationStart)).await;

        let generation_config = &self.config.generation;
        let mut generation_options = GenerationOptions::for_purpose(CallPurpose::Answer)
            .temperature(generation_config.temperature)
            .max_tokens(generation_config.max_tokens);
        if generation_config.structured_output {
            generation_options = generation_options.json_schema("structured_answer", answer_schema());
        }
        let generation = self
            .generate(&messages, &generation_options, state, cancel)
            .await?;

        let started = Instant::now();
        let mut answer = self
            .postprocess(&question, &messages, &context.text, generation.text, state, cancel)
            .await?;
        state.recorder.record(Stage::Postprocess, started);

        let started = Instant::now();
        let text = answer.answer.clone();
        let mut verdict =
            self.warden
                .validate_response(&text, state.mode, Some(&mut answer), &context.sources)?;
        state.recorder.record(Stage::Guardrail, started);
        state.recorder.metrics_mut().corrections = verdict.corrections.len();

        if state.mode.is_evidence_bound() && !answer.evidence_lacking && answer.sources.is_empty() {
            tracing::warn!(
                status = %verdict.status,
                "Evidence answer kept no grounded citation, refusing"
            );
            state
                .trail
                .push("Svaret saknade hänvisningar till de hämtade källorna".to_string());
            answer = fallback_answer(state.mode, &self.config.generation.refusal_template);
            verdict.corrected_text = answer.answer.clone();
        }

        let refused =
            state.mode.is_evidence_bound() && answer.evidence_lacking && answer.sources.is_empty();
        if refused {
            verdict.evidence_level = EvidenceLevel::None;
        }

        self.emit_answer(&verdict, sink).await;

        let evidence_lacking = answer.evidence_lacking || evidence_missing;

        tracing::info!(
            mode = %state.mode,
            intent = %state.intent,
            status = %verdict.status,
            evidence = %verdict.evidence_level,
            sources = source_refs.len(),
            refused,
            "Answer ready"
        );

        Ok(RagResult {
            answer: verdict.corrected_text.clone(),
            outcome: if refused {
                Outcome::Refused
            } else {
                Outcome::Answered
            },
            mode: state.mode,
            intent: state.intent,
            evidence_level: verdict.evidence_level,
            evidence_lacking,
            structured: Some(answer),
            sources: if refused { Vec::new() } else { source_refs },
            guardrail: Some(verdict),
            reasoning: std::mem::take(&mut state.trail),
            metrics: state.recorder.snapshot(),
        })
    }

    /// Early refusal: no generation call is made.
    async fn refuse(
        &self,
        state: &mut RunState,
        prefetch: FewShotPrefetch,
        sink: &EventSink,
    ) -> RagResult {
        prefetch.cancel();
        drop(prefetch);

        let template = self.config.generation.refusal_template.clone();
        tracing::info!(
            mode = %state.mode,
            intent = %state.intent,
            "Insufficient evidence, refusing without generation"
        );

        sink.emit(StreamEvent::ThoughtChain {
            steps: state.trail.clone(),
        })
        .await;
        sink.emit(StreamEvent::Refusal {
            message: template.clone(),
            evidence_level: EvidenceLevel::None,
        })
        .await;

        RagResult {
            answer: template.clone(),
            outcome: Outcome::Refused,
            mode: state.mode,
            intent: state.intent,
            evidence_level: EvidenceLevel::None,
            evidence_lacking: true,
            structured: Some(StructuredAnswer::refusal(state.mode, &template)),
            sources: Vec::new(),
            guardrail: None,
            reasoning: std::mem::take(&mut state.trail),
            metrics: state.recorder.snapshot(),
        }
    }

    /// Cross-encoder ordering with the score threshold and `top_n` applied.
    /// A reranker failure or timeout keeps the graded order.
    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        question: &str,
        documents: Vec<RetrievedDocument>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedDocument>> {
        let top_n = self.config.reranker.top_n.max(1);
        let threshold = self.config.reranker.score_threshold;

        let limit = Duration::from_millis(self.config.reranker.timeout_ms);
        let outcome = bounded(
            "rerank",
            limit,
            cancel,
            reranker.rerank(question, documents.clone(), top_n),
        )
        .await;

        match outcome {
            Ok(outcome) => {
                let before = outcome.documents.len();
                let kept: Vec<RetrievedDocument> = outcome
                    .documents
                    .into_iter()
                    .zip(outcome.scores)
                    .filter(|(_, score)| *score >= threshold)
                    .map(|(mut document, score)| {
                        document.score = score;
                        document
                    })
                    .collect();
                tracing::debug!(before, after = kept.len(), threshold, "Reranked sources");
                Ok(kept)
            }
            Err(LexError::Cancelled) => Err(LexError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Reranking failed, keeping graded order");
                let mut documents = documents;
                documents.truncate(top_n);
                Ok(documents)
            }
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        let started = Instant::now();
        let generation = bounded(
            "generation",
            Duration::from_secs(self.config.generation.timeout_secs),
            cancel,
            self.generator.chat(messages, options),
        )
        .await;
        state.recorder.record(Stage::Generation, started);
        let generation = generation?;

        let metrics = state.recorder.metrics_mut();
        metrics.prompt_tokens = generation.stats.prompt_tokens;
        metrics.completion_tokens = generation.stats.completion_tokens;

        if generation.text.trim().is_empty() {
            return Err(LexError::Llm("Generation returned no text".to_string()));
        }

        Ok(generation)
    }

    /// Structured parsing with escalation, then anti-truncation, then the
    /// optional critic. Fallbacks skip the later stages.
    async fn postprocess(
        &self,
        question: &str,
        messages: &[ChatMessage],
        context: &str,
        raw: String,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<StructuredAnswer> {
        let mode = state.mode;
        let structured = self.config.generation.structured_output;

        let (answer, raw) = if structured {
            let parsed =
                cancellable(cancel, self.parser.parse_with_retry(messages, raw, mode)).await?;
            state.recorder.metrics_mut().parse_attempts = parsed.attempts();

            match parsed {
                ParseOutcome::Parsed { answer, raw, .. } => (answer, raw),
                ParseOutcome::Exhausted {
                    fallback,
                    last_error,
                    attempts,
                } => {
                    tracing::warn!(attempts, error = %last_error, "Using fallback answer");
                    state.recorder.metrics_mut().parse_error = true;
                    state
                        .trail
                        .push("Svaret kunde inte tolkas, ett reservsvar används".to_string());
                    return Ok(fallback);
                }
            }
        } else {
            let text = raw.trim().to_string();
            (StructuredAnswer::plain(mode, text.clone()), text)
        };

        let answer = if answer.evidence_lacking {
            answer
        } else {
            let outcome = cancellable(
                cancel,
                self.truncation
                    .ensure_complete(messages, answer, raw, mode, structured),
            )
            .await?;
            state.recorder.metrics_mut().truncation_retries = outcome.retries;
            if outcome.still_truncated {
                state
                    .trail
                    .push("Svaret kan vara ofullständigt efter upprepade försök".to_string());
            }
            outcome.answer
        };

        if !structured
            || !self.config.generation.critic_revise
            || self.config.effective_critic_rounds() == 0
        {
            return Ok(answer);
        }

        let mut trail = std::mem::take(&mut state.trail);
        let outcome = cancellable(
            cancel,
            self.critic
                .review(question, context, answer, mode, &mut trail),
        )
        .await;
        state.trail = trail;
        let outcome = outcome?;

        let metrics = state.recorder.metrics_mut();
        metrics.critic_rounds = outcome.rounds();
        metrics.critic_exhausted = matches!(outcome, CriticOutcome::Exhausted { .. });
        Ok(outcome.into_answer())
    }

    /// Token events are only produced from validated text.
    async fn emit_answer(&self, verdict: &GuardrailVerdict, sink: &EventSink) {
        if !sink.is_enabled() {
            return;
        }

        for token in split_tokens(&verdict.corrected_text) {
            sink.emit(StreamEvent::Token { content: token }).await;
        }

        if verdict.status != GuardrailStatus::Unchanged {
            sink.emit(StreamEvent::Corrections {
                status: verdict.status,
                corrections: verdict.corrections.clone(),
                confidence: verdict.confidence,
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_history_skips_system_and_blank() {
        let history = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("a"),
            ChatMessage::assistant(" "),
            ChatMessage::assistant("b"),
            ChatMessage::user("c"),
        ];
        let recent = recent_history(&history, 2);
        assert_eq!(
            recent,
            vec![ChatMessage::assistant("b"), ChatMessage::user("c")]
        );
        assert!(recent_history(&history, 0).is_empty());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<()> = bounded("retrieval", Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(LexError::Timeout {
                stage: "retrieval",
                after_ms: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_cancellable_observes_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { 1 }).await;
        assert!(matches!(result, Err(LexError::Cancelled)));
    }
}
