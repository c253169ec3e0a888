use async_trait::async_trait;
use metrics::counter;
use tracing::warn;

use crate::core::decision::Action;
use crate::handlers::{Handler, HandlerContext};
use crate::utils::error::Result;
use crate::utils::net::client_ip_string;

pub const HANDLER_NAME: &str = "log";

/// Emits one structured record per resolved detection. No side effects
/// beyond the tracing sink.
#[derive(Debug, Default)]
pub struct LogHandler;

impl LogHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn execute(&self, _action: &Action, ctx: &HandlerContext<'_>) -> Result<()> {
        let client = client_ip_string(ctx.request).unwrap_or_else(|| "unknown".to_string());
        for result in ctx.results {
            let (field, pattern) = result
                .evidence
                .as_ref()
                .map(|e| (e.field.as_str(), e.pattern.as_str()))
                .unwrap_or(("", ""));
            warn!(
                target: "sentinel::audit",
                client = %client,
                method = ctx.request.method(),
                path = ctx.request.path(),
                detector = %result.detector_name,
                attack = %result.attack_type,
                severity = result.severity.as_str(),
                confidence = result.confidence,
                score = ctx.score.score,
                level = ctx.score.level.as_str(),
                field,
                pattern,
                correlation_id = %ctx.context.correlation_id,
                "threat detected"
            );
        }
        counter!("sentinel.actions.logged", 1);
        Ok(())
    }
}
