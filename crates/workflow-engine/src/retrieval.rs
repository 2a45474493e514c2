use common::types::{CorpusScopeType, JsonValue, RetrievalEventStatus};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::node_api::{NodeContext, NodeExecutionError, RetrievalAttemptRecord};

/// One branch of a `retrieval` config block (§4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieverSpec {
    pub key: String,
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub corpus_id: Option<Uuid>,
    #[serde(default)]
    pub scope_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub retrievers: Vec<RetrieverSpec>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub speculative: bool,
    #[serde(default)]
    pub preferred_retriever_memory_key: Option<String>,
}

fn default_strategy() -> String {
    "single".to_string()
}

fn default_top_k() -> usize {
    5
}

fn parse_scope(s: &str) -> Option<CorpusScopeType> {
    match s {
        "user" => Some(CorpusScopeType::User),
        "workflow" => Some(CorpusScopeType::Workflow),
        "execution" => Some(CorpusScopeType::Execution),
        _ => None,
    }
}

struct BranchRun {
    index: u32,
    key: String,
    matches: Vec<(Uuid, String, f32)>,
    error: Option<String>,
    record: RetrievalAttemptRecord,
}

async fn run_branch(
    ctx: &dyn NodeContext,
    strategy: &str,
    index: u32,
    spec: &RetrieverSpec,
    top_k: usize,
) -> BranchRun {
    let effective_top_k = spec.top_k.unwrap_or(top_k);
    let started = std::time::Instant::now();
    let result = ctx
        .retrieve_knowledge(
            &spec.key,
            &spec.query,
            effective_top_k,
            spec.corpus_id,
            spec.scope_type.as_deref().and_then(parse_scope),
        )
        .await;
    let duration_ms = started.elapsed().as_millis() as i64;

    let (matches, status, error) = match result {
        Ok(scored) if !scored.is_empty() => (
            scored.into_iter().map(|m| (m.chunk.id, m.chunk.content, m.score)).collect(),
            RetrievalEventStatus::Success,
            None,
        ),
        Ok(_) => (Vec::new(), RetrievalEventStatus::Empty, None),
        Err(e) => (Vec::new(), RetrievalEventStatus::Failed, Some(e.to_string())),
    };

    let record = RetrievalAttemptRecord {
        retriever_key: spec.key.clone(),
        strategy: strategy.to_string(),
        branch_index: index,
        attempt: 1,
        max_attempts: 1,
        status,
        matches_count: matches.len() as u32,
        duration_ms,
        selected: false,
        error_message: error.clone(),
        query: spec.query.clone(),
        top_k: effective_top_k as u32,
        scope_type: spec.scope_type.clone(),
        corpus_id: spec.corpus_id,
    };

    BranchRun { index, key: spec.key.clone(), matches, error, record }
}

/// Emits one event per branch that was actually run, marking only the
/// branch matching `selected_index` (if any) as the winner per §4.4 — the
/// winner is only known once every branch in this call has finished, so
/// emission is deferred until after selection rather than done inside
/// `run_branch`.
fn emit_runs(ctx: &dyn NodeContext, runs: Vec<BranchRun>, selected_index: Option<u32>) {
    for run in runs {
        let mut record = run.record;
        record.selected = selected_index == Some(run.index);
        ctx.on_retrieval_event(record);
    }
}

fn dedupe_and_truncate(all: Vec<(Uuid, String, f32)>, top_k: usize) -> Vec<(Uuid, String, f32)> {
    let mut best: HashMap<Uuid, (String, f32)> = HashMap::new();
    for (id, content, score) in all {
        best.entry(id)
            .and_modify(|existing| {
                if score > existing.1 {
                    *existing = (content.clone(), score);
                }
            })
            .or_insert((content, score));
    }
    let mut merged: Vec<(Uuid, String, f32)> = best.into_iter().map(|(id, (c, s))| (id, c, s)).collect();
    merged.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    merged
}

pub struct RetrievalOutcome {
    pub matches: Vec<(Uuid, String, f32)>,
    pub strategy: String,
    pub speculative: bool,
    pub retrievers_tried: u32,
    pub selected_retriever_key: Option<String>,
    pub branch_count: u32,
}

impl RetrievalOutcome {
    pub fn to_json(&self) -> JsonValue {
        let matches: Vec<JsonValue> = self
            .matches
            .iter()
            .map(|(id, content, score)| json!({"chunk_id": id, "content": content, "score": score}))
            .collect();
        json!({
            "matches": matches,
            "orchestration": {
                "strategy": self.strategy,
                "speculative": self.speculative,
                "retrievers_tried": self.retrievers_tried,
                "selected_retriever_key": self.selected_retriever_key,
                "branch_count": self.branch_count,
            }
        })
    }
}

/// Runs the §4.4 retrieval orchestration against whichever retrievers the
/// node's `retrieval` config block names, honoring the configured strategy
/// and emitting one `RetrievalAttemptRecord` per branch attempt.
pub async fn orchestrate(
    ctx: &dyn NodeContext,
    config: &RetrievalConfig,
) -> Result<RetrievalOutcome, NodeExecutionError> {
    if config.retrievers.is_empty() {
        return Err(NodeExecutionError::Failed(
            "retrieval config requires at least one entry under `retrievers`".to_string(),
        ));
    }

    let budget = ctx.retrieval_budget();
    if budget.total_failures > budget.max_failures || budget.total_duration_ms > budget.max_duration_ms {
        return Err(NodeExecutionError::Failed(
            "retrieval budget already exceeded for this execution".to_string(),
        ));
    }

    let strategy = config.strategy.as_str();
    let mut tried = 0u32;

    match strategy {
        "single" => {
            let run = run_branch(ctx, strategy, 0, &config.retrievers[0], config.top_k).await;
            tried += 1;
            let matches = run.matches.clone();
            let key = run.key.clone();
            let index = run.index;
            emit_runs(ctx, vec![run], Some(index));
            Ok(RetrievalOutcome {
                matches,
                strategy: strategy.to_string(),
                speculative: false,
                retrievers_tried: tried,
                selected_retriever_key: Some(key),
                branch_count: config.retrievers.len() as u32,
            })
        }
        "first-non-empty" | "adaptive" => {
            let mut order: Vec<usize> = (0..config.retrievers.len()).collect();
            if strategy == "adaptive" {
                if let Some(preferred_key) = config
                    .preferred_retriever_memory_key
                    .as_ref()
                    .and_then(|k| ctx.get_memory(k))
                    .and_then(|v| v.as_str().map(str::to_string))
                {
                    if let Some(pos) = order.iter().position(|&i| config.retrievers[i].key == preferred_key) {
                        order.swap(0, pos);
                    }
                }
            }

            if config.speculative {
                let mut runs = Vec::with_capacity(order.len());
                for i in &order {
                    runs.push(run_branch(ctx, strategy, *i as u32, &config.retrievers[*i], config.top_k).await);
                }
                tried = runs.len() as u32;
                let selected = runs
                    .iter()
                    .find(|r| !r.matches.is_empty())
                    .map(|r| (r.index, r.key.clone(), r.matches.clone()));
                emit_runs(ctx, runs, selected.as_ref().map(|(index, _, _)| *index));
                match selected {
                    Some((_, key, matches)) => Ok(RetrievalOutcome {
                        matches,
                        strategy: strategy.to_string(),
                        speculative: true,
                        retrievers_tried: tried,
                        selected_retriever_key: Some(key),
                        branch_count: config.retrievers.len() as u32,
                    }),
                    None => Ok(RetrievalOutcome {
                        matches: Vec::new(),
                        strategy: strategy.to_string(),
                        speculative: true,
                        retrievers_tried: tried,
                        selected_retriever_key: None,
                        branch_count: config.retrievers.len() as u32,
                    }),
                }
            } else {
                let mut runs: Vec<BranchRun> = Vec::new();
                let mut selected: Option<(u32, String, Vec<(Uuid, String, f32)>)> = None;
                for i in order {
                    let run = run_branch(ctx, strategy, i as u32, &config.retrievers[i], config.top_k).await;
                    tried += 1;
                    let is_match = !run.matches.is_empty();
                    if is_match {
                        selected = Some((run.index, run.key.clone(), run.matches.clone()));
                    }
                    runs.push(run);
                    if is_match {
                        break;
                    }
                }
                emit_runs(ctx, runs, selected.as_ref().map(|(index, _, _)| *index));
                match selected {
                    Some((_, key, matches)) => Ok(RetrievalOutcome {
                        matches,
                        strategy: strategy.to_string(),
                        speculative: false,
                        retrievers_tried: tried,
                        selected_retriever_key: Some(key),
                        branch_count: config.retrievers.len() as u32,
                    }),
                    None => Ok(RetrievalOutcome {
                        matches: Vec::new(),
                        strategy: strategy.to_string(),
                        speculative: false,
                        retrievers_tried: tried,
                        selected_retriever_key: None,
                        branch_count: config.retrievers.len() as u32,
                    }),
                }
            }
        }
        "best-score" => {
            let mut runs = Vec::with_capacity(config.retrievers.len());
            for (i, spec) in config.retrievers.iter().enumerate() {
                runs.push(run_branch(ctx, strategy, i as u32, spec, config.top_k).await);
            }
            tried = runs.len() as u32;
            let best_pos = runs
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    let a_top = a.matches.first().map(|m| m.2).unwrap_or(f32::NEG_INFINITY);
                    let b_top = b.matches.first().map(|m| m.2).unwrap_or(f32::NEG_INFINITY);
                    a_top.partial_cmp(&b_top).unwrap_or(std::cmp::Ordering::Equal)
                })
                .filter(|(pos, _)| !runs[*pos].matches.is_empty())
                .map(|(pos, _)| pos);
            let selected = best_pos.map(|pos| (runs[pos].index, runs[pos].key.clone(), runs[pos].matches.clone()));
            emit_runs(ctx, runs, selected.as_ref().map(|(index, _, _)| *index));
            match selected {
                Some((_, key, matches)) => Ok(RetrievalOutcome {
                    matches,
                    strategy: strategy.to_string(),
                    speculative: false,
                    retrievers_tried: tried,
                    selected_retriever_key: Some(key),
                    branch_count: config.retrievers.len() as u32,
                }),
                None => Ok(RetrievalOutcome {
                    matches: Vec::new(),
                    strategy: strategy.to_string(),
                    speculative: false,
                    retrievers_tried: tried,
                    selected_retriever_key: None,
                    branch_count: config.retrievers.len() as u32,
                }),
            }
        }
        "merge" => {
            let mut runs = Vec::with_capacity(config.retrievers.len());
            let mut all = Vec::new();
            for (i, spec) in config.retrievers.iter().enumerate() {
                let run = run_branch(ctx, strategy, i as u32, spec, config.top_k).await;
                all.extend(run.matches.clone());
                runs.push(run);
            }
            tried = runs.len() as u32;
            emit_runs(ctx, runs, None);
            let merged = dedupe_and_truncate(all, config.top_k);
            Ok(RetrievalOutcome {
                matches: merged,
                strategy: strategy.to_string(),
                speculative: false,
                retrievers_tried: tried,
                selected_retriever_key: None,
                branch_count: config.retrievers.len() as u32,
            })
        }
        other => Err(NodeExecutionError::Failed(format!("unknown retrieval strategy `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPatch;
    use knowledge_service::ScoredChunk;
    use std::sync::Mutex;

    struct FakeContext {
        responses: HashMap<String, Vec<ScoredChunk>>,
        events: Mutex<Vec<RetrievalAttemptRecord>>,
    }

    fn chunk(content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: common::types::KnowledgeChunk {
                id: Uuid::new_v4(),
                corpus_id: Uuid::nil(),
                document_id: Uuid::nil(),
                chunk_index: 0,
                content: content.to_string(),
                token_count: None,
                embedding: vec![],
                embedding_model: "stub".to_string(),
                metadata: json!({}),
                created_at: chrono::Utc::now(),
            },
            score,
        }
    }

    #[async_trait::async_trait]
    impl NodeContext for FakeContext {
        fn execution_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn workflow_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn node_id(&self) -> Uuid {
            Uuid::nil()
        }
        fn node_type(&self) -> &str {
            "knowledge-retrieve"
        }
        async fn get_api_key(&self, _provider: &str) -> Result<String, NodeExecutionError> {
            Err(NodeExecutionError::Failed("n/a".to_string()))
        }
        async fn llm_generate(
            &self,
            _provider: ai_service::ModelProvider,
            _model: &str,
            _prompt: &str,
            _options: ai_service::GenerateOptions,
        ) -> Result<ai_service::GenerateResponse, NodeExecutionError> {
            Err(NodeExecutionError::Failed("n/a".to_string()))
        }
        fn get_memory(&self, _key: &str) -> Option<JsonValue> {
            None
        }
        fn set_memory(&self, _key: &str, _value: JsonValue) {}
        fn get_knowledge(&self, _key: &str) -> Option<JsonValue> {
            None
        }
        fn retrieval_budget(&self) -> common::types::RetrievalState {
            common::types::RetrievalState {
                total_requests: 0,
                total_successes: 0,
                total_empties: 0,
                total_failures: 0,
                total_duration_ms: 0,
                max_requests: 50,
                max_failures: 10,
                max_duration_ms: 60_000,
            }
        }
        fn update_execution_context(&self, _patch: ContextPatch) {}
        async fn ingest_knowledge(
            &self,
            _corpus_id: Uuid,
            _user_id: Uuid,
            _title: String,
            _content_text: String,
        ) -> Result<knowledge_service::IngestionOutcome, NodeExecutionError> {
            Err(NodeExecutionError::CapabilityMissing("n/a".to_string()))
        }
        async fn retrieve_knowledge(
            &self,
            retriever_key: &str,
            _query: &str,
            _top_k: usize,
            _corpus_id: Option<Uuid>,
            _scope_type: Option<CorpusScopeType>,
        ) -> Result<Vec<ScoredChunk>, NodeExecutionError> {
            Ok(self.responses.get(retriever_key).cloned().unwrap_or_default())
        }
        fn on_retrieval_event(&self, record: RetrievalAttemptRecord) {
            self.events.lock().unwrap().push(record);
        }
    }

    fn spec(key: &str, query: &str) -> RetrieverSpec {
        RetrieverSpec { key: key.to_string(), query: query.to_string(), top_k: None, corpus_id: None, scope_type: None }
    }

    #[tokio::test]
    async fn first_non_empty_skips_remaining_branches_once_matched() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), vec![]);
        responses.insert("b".to_string(), vec![chunk("hit", 0.9)]);
        let ctx = FakeContext { responses, events: Mutex::new(vec![]) };
        let config = RetrievalConfig {
            strategy: "first-non-empty".to_string(),
            retrievers: vec![spec("a", "q"), spec("b", "q"), spec("c", "q")],
            top_k: 5,
            speculative: false,
            preferred_retriever_memory_key: None,
        };
        let outcome = orchestrate(&ctx, &config).await.unwrap();
        assert_eq!(outcome.selected_retriever_key.as_deref(), Some("b"));
        assert_eq!(outcome.retrievers_tried, 2);
        assert_eq!(ctx.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn merge_dedupes_by_chunk_id_keeping_best_score() {
        let shared_chunk = chunk("shared", 0.4);
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), vec![shared_chunk.clone()]);
        let mut boosted = shared_chunk.clone();
        boosted.score = 0.95;
        responses.insert("b".to_string(), vec![boosted]);
        let ctx = FakeContext { responses, events: Mutex::new(vec![]) };
        let config = RetrievalConfig {
            strategy: "merge".to_string(),
            retrievers: vec![spec("a", "q"), spec("b", "q")],
            top_k: 5,
            speculative: false,
            preferred_retriever_memory_key: None,
        };
        let outcome = orchestrate(&ctx, &config).await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert!((outcome.matches[0].2 - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn best_score_picks_highest_top_match() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), vec![chunk("low", 0.2)]);
        responses.insert("b".to_string(), vec![chunk("high", 0.8)]);
        let ctx = FakeContext { responses, events: Mutex::new(vec![]) };
        let config = RetrievalConfig {
            strategy: "best-score".to_string(),
            retrievers: vec![spec("a", "q"), spec("b", "q")],
            top_k: 5,
            speculative: false,
            preferred_retriever_memory_key: None,
        };
        let outcome = orchestrate(&ctx, &config).await.unwrap();
        assert_eq!(outcome.selected_retriever_key.as_deref(), Some("b"));
    }
}
