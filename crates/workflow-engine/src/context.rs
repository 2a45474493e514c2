use chrono::Utc;
use common::types::{ExecutionContextState, JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

/// A deferred mutation against the live `ExecutionContextState`, queued by
/// `ctx.set_memory`/`ctx.update_execution_context` while a node runs and
/// applied at the wave barrier (§4.3) in ascending-node-id order.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub memory: HashMap<String, JsonValue>,
    pub knowledge: HashMap<String, JsonValue>,
    pub terminate: Option<bool>,
    pub loop_count_delta: Option<u32>,
    pub retry_count_delta: Option<u32>,
    pub retrieval_requests_delta: u64,
    pub retrieval_successes_delta: u64,
    pub retrieval_empties_delta: u64,
    pub retrieval_failures_delta: u64,
    pub retrieval_duration_ms_delta: u64,
    pub active_node_id: Option<Uuid>,
    pub last_completed_node_id: Option<Uuid>,
}

impl ContextPatch {
    pub fn set_memory(key: impl Into<String>, value: JsonValue) -> Self {
        let mut patch = Self::default();
        patch.memory.insert(key.into(), value);
        patch
    }

    pub fn terminate() -> Self {
        let mut patch = Self::default();
        patch.terminate = Some(true);
        patch
    }

    pub fn merge(&mut self, other: ContextPatch) {
        self.memory.extend(other.memory);
        self.knowledge.extend(other.knowledge);
        if other.terminate.is_some() {
            self.terminate = other.terminate;
        }
        self.loop_count_delta = max_opt(self.loop_count_delta, other.loop_count_delta);
        self.retry_count_delta = max_opt(self.retry_count_delta, other.retry_count_delta);
        self.retrieval_requests_delta += other.retrieval_requests_delta;
        self.retrieval_successes_delta += other.retrieval_successes_delta;
        self.retrieval_empties_delta += other.retrieval_empties_delta;
        self.retrieval_failures_delta += other.retrieval_failures_delta;
        self.retrieval_duration_ms_delta += other.retrieval_duration_ms_delta;
        if other.active_node_id.is_some() {
            self.active_node_id = other.active_node_id;
        }
        if other.last_completed_node_id.is_some() {
            self.last_completed_node_id = other.last_completed_node_id;
        }
    }
}

/// Applies a single patch to the live state, bumping `version` and
/// `runtime.updated_at`. Used both for a single node's own mutations and for
/// the wave-barrier merge of several nodes' patches (already combined via
/// `ContextPatch::merge` in ascending node id order before this is called).
pub fn apply_patch(state: &mut ExecutionContextState, patch: ContextPatch) {
    if patch.memory.is_empty()
        && patch.knowledge.is_empty()
        && patch.terminate.is_none()
        && patch.loop_count_delta.is_none()
        && patch.retry_count_delta.is_none()
        && patch.retrieval_requests_delta == 0
        && patch.retrieval_successes_delta == 0
        && patch.retrieval_empties_delta == 0
        && patch.retrieval_failures_delta == 0
        && patch.retrieval_duration_ms_delta == 0
        && patch.active_node_id.is_none()
        && patch.last_completed_node_id.is_none()
    {
        return;
    }

    for (k, v) in patch.memory {
        state.memory.insert(k, v);
    }
    for (k, v) in patch.knowledge {
        state.knowledge.insert(k, v);
    }
    if let Some(terminate) = patch.terminate {
        state.control.terminate = state.control.terminate || terminate;
    }
    if let Some(delta) = patch.loop_count_delta {
        state.control.loop_count += delta;
    }
    if let Some(delta) = patch.retry_count_delta {
        state.control.retry_count += delta;
    }
    state.retrieval.total_requests += patch.retrieval_requests_delta;
    state.retrieval.total_successes += patch.retrieval_successes_delta;
    state.retrieval.total_empties += patch.retrieval_empties_delta;
    state.retrieval.total_failures += patch.retrieval_failures_delta;
    state.retrieval.total_duration_ms += patch.retrieval_duration_ms_delta;

    if let Some(id) = patch.active_node_id {
        state.runtime.active_node_id = Some(id);
    }
    if let Some(id) = patch.last_completed_node_id {
        state.runtime.last_completed_node_id = Some(id);
    }
    state.runtime.updated_at = Utc::now();
    state.version += 1;
}

fn max_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

/// Combines per-node patches collected within a single wave into one patch,
/// applying the last-writer-wins rule for `memory`/`knowledge` in ascending
/// node id order and additive/max/OR rules for the counters (§4.3).
pub fn merge_wave_patches(mut patches: Vec<(Uuid, ContextPatch)>) -> ContextPatch {
    patches.sort_by_key(|(id, _)| *id);
    let mut merged = ContextPatch::default();
    for (_, patch) in patches {
        merged.merge(patch);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ExecutionDefaults;

    fn fresh_state() -> ExecutionContextState {
        ExecutionContextState::new(Utc::now(), &ExecutionDefaults::default())
    }

    #[test]
    fn memory_last_writer_wins_by_ascending_node_id() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let patch_a = ContextPatch::set_memory("k", serde_json::json!("from-a"));
        let patch_b = ContextPatch::set_memory("k", serde_json::json!("from-b"));
        let merged = merge_wave_patches(vec![(b, patch_b), (a, patch_a)]);
        assert_eq!(merged.memory["k"], serde_json::json!("from-b"));
    }

    #[test]
    fn terminate_is_logical_or() {
        let mut state = fresh_state();
        apply_patch(&mut state, ContextPatch::default());
        assert!(!state.control.terminate);
        apply_patch(&mut state, ContextPatch::terminate());
        assert!(state.control.terminate);
    }

    #[test]
    fn loop_count_delta_takes_the_max_across_a_wave() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut patch_a = ContextPatch::default();
        patch_a.loop_count_delta = Some(1);
        let mut patch_b = ContextPatch::default();
        patch_b.loop_count_delta = Some(3);
        let merged = merge_wave_patches(vec![(a, patch_a), (b, patch_b)]);
        assert_eq!(merged.loop_count_delta, Some(3));

        let mut state = fresh_state();
        let before = state.control.loop_count;
        apply_patch(&mut state, merged);
        assert_eq!(state.control.loop_count, before + 3);
    }

    #[test]
    fn retrieval_counters_are_additive() {
        let mut state = fresh_state();
        let mut patch = ContextPatch::default();
        patch.retrieval_requests_delta = 3;
        patch.retrieval_failures_delta = 1;
        apply_patch(&mut state, patch);
        assert_eq!(state.retrieval.total_requests, 3);
        assert_eq!(state.retrieval.total_failures, 1);
    }

    #[test]
    fn version_increments_only_on_nonempty_patch() {
        let mut state = fresh_state();
        let before = state.version;
        apply_patch(&mut state, ContextPatch::default());
        assert_eq!(state.version, before);
        apply_patch(&mut state, ContextPatch::set_memory("k", serde_json::json!(1)));
        assert_eq!(state.version, before + 1);
    }
}
