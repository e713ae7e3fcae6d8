//! The answering pipeline.
//!
//! ```text
//! question ─► persist user turn ─► reformulate ─► embed ─► over-fetch
//!          ─► filter ─► rerank ─► truncate + assemble ─► generate
//!          ─► refusal check ─► verify ─► score ─► record ─► respond
//! ```
//!
//! Every terminal branch (no materials, no matches, self-declared refusal,
//! verifier refusal, success) writes exactly one query log and, for session
//! requests, exactly one assistant turn before returning. Error exits after
//! that point write a log with a null answer and status `retrieval_failed`,
//! `generation_failed` or `verification_error`, then return the error; the
//! user turn already persisted stays in place.
//!
//! Scores on sources and `confidence` are cosine similarities when
//! reranking is off and cross-encoder relevance scores when it is on.
//! [`ScoreKind`] on the response says which.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::{self, AssembledContext};
use crate::error::AskError;
use crate::filter;
use crate::models::{NewMessage, NewQueryLog, QueryFilters, SourceInfo, VerificationSummary};
use crate::prompts::{self, SYSTEM_PROMPT};
use crate::recorder::{self, AssistantTurn, AuditReceipt};
use crate::reformulate;
use crate::scorer::{self, Band, Evaluation, Scorer};
use crate::services::Services;

pub const NO_MATERIALS_ANSWER: &str =
    "I don't have any materials to answer this question. Please upload course materials first.";

pub const NO_MATCHES_ANSWER: &str =
    "No materials match your filters. Try adjusting the filters or uploading more materials.";

const MIN_QUESTION_CHARS: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub filters: Option<QueryFilters>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// Status reported to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NoMaterials,
    NoMatches,
    LlmRefused,
    Failed,
    Warning,
    Passed,
    Disabled,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::NoMaterials => "no_materials",
            VerificationStatus::NoMatches => "no_matches",
            VerificationStatus::LlmRefused => "llm_refused",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Warning => "warning",
            VerificationStatus::Passed => "passed",
            VerificationStatus::Disabled => "disabled",
        }
    }

    /// Status string stored in the query log. Differs from the response
    /// only for a verifier refusal.
    pub fn log_status(&self) -> &'static str {
        match self {
            VerificationStatus::Failed => "verification_failed",
            other => other.as_str(),
        }
    }

    fn from_band(band: Band) -> Self {
        match band {
            Band::Disabled => VerificationStatus::Disabled,
            Band::Passed => VerificationStatus::Passed,
            Band::Warning => VerificationStatus::Warning,
            Band::Failed => VerificationStatus::Failed,
        }
    }
}

/// Scale of source scores and `confidence`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Inner product of unit embeddings, in `[-1, 1]`.
    Similarity,
    /// Cross-encoder relevance on the reranker's own scale.
    Rerank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// The generator itself said the context was insufficient.
    SelfDeclared,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Answered(Evaluation),
    NoMaterials,
    NoMatches,
    Refused(RefusalReason),
    VerificationFailed(Evaluation),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceInfo>,
    pub faithfulness_score: Option<f64>,
    pub verification_status: VerificationStatus,
    pub confidence: f64,
    pub score_kind: ScoreKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_log_id: Option<i64>,
    /// Set when the exchange could not be fully recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AskResult {
    pub outcome: Outcome,
    pub response: AskResponse,
}

/// Per-request state carried into the recording step.
struct Exchange<'a> {
    request: &'a AskRequest,
    top_k: i64,
    score_kind: ScoreKind,
}

/// An error exit reached after validation. The query log records it under
/// `status` together with any sources already resolved.
struct Failure {
    error: AskError,
    status: &'static str,
    sources: Vec<SourceInfo>,
}

impl Failure {
    fn retrieval(error: AskError) -> Self {
        Self {
            error,
            status: "retrieval_failed",
            sources: Vec::new(),
        }
    }
}

impl Exchange<'_> {
    async fn finish(
        &self,
        services: &Services,
        outcome: Outcome,
        answer: String,
        sources: Vec<SourceInfo>,
        faithfulness_score: Option<f64>,
        status: VerificationStatus,
    ) -> AskResult {
        let confidence = context::mean_score(&sources);

        let log = NewQueryLog {
            question: self.request.question.clone(),
            answer: Some(answer.clone()),
            sources: (!sources.is_empty()).then(|| sources.clone()),
            faithfulness_score,
            verification_status: status.log_status().to_string(),
            filters: self.request.filters.clone(),
            top_k: self.top_k,
            session_id: self.request.session_id.clone(),
        };
        let turn = self.request.session_id.as_deref().map(|session_id| AssistantTurn {
            session_id,
            answer: &answer,
            sources: &sources,
            verification: VerificationSummary {
                faithfulness: faithfulness_score,
                status: status.as_str().to_string(),
            },
        });
        let AuditReceipt {
            query_log_id,
            error,
        } = recorder::record_exchange(services.store.as_ref(), &log, turn).await;

        info!(
            status = status.as_str(),
            sources = sources.len(),
            faithfulness = ?faithfulness_score,
            confidence,
            session_id = ?self.request.session_id,
            "ask finished"
        );

        AskResult {
            outcome,
            response: AskResponse {
                answer,
                sources,
                faithfulness_score,
                verification_status: status,
                confidence,
                score_kind: self.score_kind,
                query_log_id,
                audit_error: error,
            },
        }
    }

    /// Log an error exit with a null answer. No assistant turn is written.
    async fn record_failure(
        &self,
        services: &Services,
        status: &str,
        sources: &[SourceInfo],
    ) -> AuditReceipt {
        let log = NewQueryLog {
            question: self.request.question.clone(),
            answer: None,
            sources: (!sources.is_empty()).then(|| sources.to_vec()),
            faithfulness_score: None,
            verification_status: status.to_string(),
            filters: self.request.filters.clone(),
            top_k: self.top_k,
            session_id: self.request.session_id.clone(),
        };
        recorder::record_exchange(services.store.as_ref(), &log, None).await
    }
}

/// Answer `request` from the indexed materials.
///
/// Once the request is valid (and, for a session, the user turn is stored)
/// every exit writes one query log, error exits included.
pub async fn ask(services: &Services, request: AskRequest) -> Result<AskResult, AskError> {
    let config = &services.config;

    if request.question.trim().chars().count() < MIN_QUESTION_CHARS {
        return Err(AskError::InvalidRequest(format!(
            "question must be at least {} characters",
            MIN_QUESTION_CHARS
        )));
    }
    let top_k = request.top_k.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        return Err(AskError::InvalidRequest("top_k must be >= 1".to_string()));
    }
    let logged_top_k = i64::try_from(top_k)
        .map_err(|_| AskError::InvalidRequest(format!("top_k is too large: {}", top_k)))?;

    if let Some(session_id) = &request.session_id {
        persist_user_turn(services, session_id, &request.question).await?;
    }

    let exchange = Exchange {
        request: &request,
        top_k: logged_top_k,
        score_kind: if services.reranker.is_enabled() {
            ScoreKind::Rerank
        } else {
            ScoreKind::Similarity
        },
    };

    match answer(services, &exchange, top_k).await {
        Ok(result) => Ok(result),
        Err(Failure {
            error,
            status,
            sources,
        }) => {
            warn!(error = %error, status, "ask failed");
            let receipt = exchange.record_failure(services, status, &sources).await;
            Err(match receipt.error {
                Some(audit) => error.with_audit_error(&audit),
                None => error,
            })
        }
    }
}

/// Everything after the user turn is stored.
async fn answer(
    services: &Services,
    exchange: &Exchange<'_>,
    top_k: usize,
) -> Result<AskResult, Failure> {
    let config = &services.config;
    let request = exchange.request;

    let history = match &request.session_id {
        Some(session_id) => services
            .store
            .recent_history(session_id, config.retrieval.history_messages as i64 + 1)
            .await
            .map_err(|e| Failure::retrieval(AskError::Storage(e)))?,
        None => Vec::new(),
    };

    // Retrieval
    let rerank = services.reranker.is_enabled();
    let prior = reformulate::strip_echo(&request.question, &history);
    let retrieval_query =
        reformulate::retrieval_query(&request.question, &history, config.retrieval.history_turns);

    let query_vector = services
        .embedder
        .embed_text(&retrieval_query)
        .await
        .map_err(|e| Failure::retrieval(AskError::Retrieval(e)))?;
    let multiplier = if rerank {
        config.retrieval.rerank_fetch_multiplier
    } else {
        config.retrieval.fetch_multiplier
    };
    let hits = services
        .index
        .search(&query_vector, top_k.saturating_mul(multiplier))
        .await
        .map_err(|e| Failure::retrieval(AskError::Retrieval(e)))?;

    if hits.is_empty() {
        return Ok(exchange
            .finish(
                services,
                Outcome::NoMaterials,
                NO_MATERIALS_ANSWER.to_string(),
                Vec::new(),
                Some(0.0),
                VerificationStatus::NoMaterials,
            )
            .await);
    }

    let filters = request.filters.clone().unwrap_or_default();
    let candidates = filter::resolve_and_filter(services.store.as_ref(), &hits, &filters)
        .await
        .map_err(|e| Failure::retrieval(AskError::Storage(e)))?;
    let candidates = if candidates.is_empty() {
        candidates
    } else {
        services
            .reranker
            .rerank(&retrieval_query, candidates)
            .await
            .map_err(|e| Failure::retrieval(AskError::Retrieval(e)))?
    };

    let assembled = context::assemble(
        services.store.as_ref(),
        candidates,
        top_k,
        &request.question,
        prior,
    )
    .await
    .map_err(|e| Failure::retrieval(AskError::Storage(e)))?;

    if assembled.chunks.is_empty() {
        return Ok(exchange
            .finish(
                services,
                Outcome::NoMatches,
                NO_MATCHES_ANSWER.to_string(),
                Vec::new(),
                Some(0.0),
                VerificationStatus::NoMatches,
            )
            .await);
    }

    // Generation
    let answer = generate(services, &assembled)
        .await
        .map_err(|error| Failure {
            error,
            status: "generation_failed",
            sources: assembled.sources.clone(),
        })?;

    if prompts::is_refusal(&answer) {
        return Ok(exchange
            .finish(
                services,
                Outcome::Refused(RefusalReason::SelfDeclared),
                answer,
                assembled.sources,
                Some(0.0),
                VerificationStatus::LlmRefused,
            )
            .await);
    }

    // Verification
    if !services.scorer.is_enabled() {
        return Ok(exchange
            .finish(
                services,
                Outcome::Answered(Scorer::disabled()),
                answer,
                assembled.sources,
                None,
                VerificationStatus::Disabled,
            )
            .await);
    }

    let report = match services.verifier.verify(&answer, &assembled.texts()).await {
        Ok(report) => report,
        Err(e) => {
            return Err(Failure {
                error: AskError::Retrieval(e),
                status: "verification_error",
                sources: assembled.sources,
            })
        }
    };
    let evaluation = services.scorer.evaluate(&report);
    let status = VerificationStatus::from_band(evaluation.status);
    let score = Some(report.faithfulness_score);

    if evaluation.passed {
        Ok(exchange
            .finish(
                services,
                Outcome::Answered(evaluation),
                answer,
                assembled.sources,
                score,
                status,
            )
            .await)
    } else {
        let refusal = scorer::refusal_message(&evaluation);
        Ok(exchange
            .finish(
                services,
                Outcome::VerificationFailed(evaluation),
                refusal,
                assembled.sources,
                score,
                status,
            )
            .await)
    }
}

/// Check the session exists and store the user turn. Nothing is logged if
/// this fails.
async fn persist_user_turn(
    services: &Services,
    session_id: &str,
    question: &str,
) -> Result<(), AskError> {
    let store = services.store.as_ref();
    if store
        .get_session(session_id)
        .await
        .map_err(AskError::Storage)?
        .is_none()
    {
        return Err(AskError::SessionNotFound(session_id.to_string()));
    }

    store
        .append_message(session_id, &NewMessage::user(question))
        .await
        .map_err(AskError::Storage)?;
    Ok(())
}

async fn generate(services: &Services, assembled: &AssembledContext) -> Result<String, AskError> {
    let timeout_secs = services.config.generation.timeout_secs;
    match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        services.generator.generate(&assembled.prompt, SYSTEM_PROMPT),
    )
    .await
    {
        Ok(Ok(answer)) => Ok(answer),
        Ok(Err(e)) => Err(AskError::Generation(e)),
        Err(_) => Err(AskError::GenerationTimeout(timeout_secs)),
    }
}

/// CLI entry point for `prep ask`.
pub async fn run_ask(services: &Services, request: AskRequest) -> anyhow::Result<()> {
    let result = ask(services, request).await?;
    let r = &result.response;

    println!("{}", r.answer);
    println!();
    println!("status:       {}", r.verification_status.as_str());
    match r.faithfulness_score {
        Some(score) => println!("faithfulness: {:.2}", score),
        None => println!("faithfulness: -"),
    }
    let kind = match r.score_kind {
        ScoreKind::Similarity => "similarity",
        ScoreKind::Rerank => "rerank",
    };
    println!("confidence:   {:.3} ({})", r.confidence, kind);
    if let Some(id) = r.query_log_id {
        println!("query log:    {}", id);
    }
    if let Some(err) = &r.audit_error {
        println!("warning: exchange not fully recorded: {}", err);
    }

    if !r.sources.is_empty() {
        println!();
        println!("--- Sources ({}) ---", r.sources.len());
        for (i, s) in r.sources.iter().enumerate() {
            let location = match (&s.page, &s.section) {
                (Some(page), _) => format!(", Page {}", page),
                (None, Some(section)) => format!(", Section: {}", section),
                (None, None) => String::new(),
            };
            println!(
                "{}. {}{} [{}] {:.3}",
                i + 1,
                s.title,
                location,
                s.material_type,
                s.score
            );
        }
    }
    Ok(())
}
