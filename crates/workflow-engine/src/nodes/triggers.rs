use async_trait::async_trait;
use serde_json::json;

use crate::node_api::{NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput, ValidationOutcome};

fn passthrough(input: &NodeInput) -> NodeOutput {
    let mut data = input.data.clone();
    if let Some(obj) = data.as_object_mut() {
        obj.insert("metadata".to_string(), json!({"trigger": true}));
    }
    NodeOutput::new(data)
}

pub struct WebhookTriggerNode;

#[async_trait]
impl NodeHandler for WebhookTriggerNode {
    fn node_type(&self) -> &'static str {
        "webhook-trigger"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        Ok(passthrough(input))
    }
}

pub struct ManualTriggerNode;

#[async_trait]
impl NodeHandler for ManualTriggerNode {
    fn node_type(&self) -> &'static str {
        "manual-trigger"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        Ok(passthrough(input))
    }
}

pub struct ScheduleTriggerNode;

#[async_trait]
impl NodeHandler for ScheduleTriggerNode {
    fn node_type(&self) -> &'static str {
        "schedule-trigger"
    }

    fn validate(&self, config: &common::types::JsonValue) -> ValidationOutcome {
        let has_cron = config.get("cron").and_then(|v| v.as_str()).is_some();
        let interval_ms = config.get("interval_ms").and_then(|v| v.as_u64());
        if !has_cron && interval_ms.is_none() {
            return ValidationOutcome::errors(vec![
                "schedule-trigger requires either `cron` or `interval_ms`".to_string(),
            ]);
        }
        if let Some(ms) = interval_ms {
            if ms < 60_000 {
                return ValidationOutcome::errors(vec!["interval_ms must be >= 60000".to_string()]);
            }
        }
        ValidationOutcome::ok()
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        Ok(passthrough(input))
    }
}

/// Derives the polling interval for a schedule-trigger node per §4.9.
/// A full cron evaluator is explicitly deferred; this mirrors the minute/hour
/// placeholder the original scheduler used.
pub fn approximate_cron_interval(cron: &str) -> u64 {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return 3600;
    }
    let (minute, hour) = (fields[0], fields[1]);
    if minute == "*" && hour == "*" {
        return 60;
    }
    if let Some(step) = minute.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u64>() {
            return n * 60;
        }
    }
    if minute != "*" && hour == "*" {
        return 3600;
    }
    if minute != "*" && hour != "*" {
        return 86_400;
    }
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_star_is_one_minute() {
        assert_eq!(approximate_cron_interval("* * * * *"), 60);
    }

    #[test]
    fn step_minute_scales_by_step() {
        assert_eq!(approximate_cron_interval("*/15 * * * *"), 900);
    }

    #[test]
    fn fixed_minute_with_star_hour_is_hourly() {
        assert_eq!(approximate_cron_interval("30 * * * *"), 3600);
    }

    #[test]
    fn fixed_minute_and_hour_is_daily() {
        assert_eq!(approximate_cron_interval("30 4 * * *"), 86_400);
    }

    #[test]
    fn malformed_cron_falls_back_to_hourly() {
        assert_eq!(approximate_cron_interval("not a cron"), 3600);
    }
}
