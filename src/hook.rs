//! Interception host hook
//!
//! Wraps the orchestrator for the proxy or extension that intercepts requests.
//! The hook always returns a verdict: a panicked or failed decision task is
//! treated as allow so browsing is never deadlocked by the filter.

use crate::orchestrator::DecisionOrchestrator;
use crate::normalizer::{RawRequest, ResponseMetadata};
use crate::types::{DecisionId, DecisionSource, Feedback};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

/// What the host needs to act on one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookVerdict {
    pub allow: bool,
    /// Text of the mission the block was decided against, present only on block
    pub explanation: Option<String>,
    pub decision_id: Option<DecisionId>,
    pub source: DecisionSource,
}

impl HookVerdict {
    fn fail_open() -> Self {
        Self {
            allow: true,
            explanation: None,
            decision_id: None,
            source: DecisionSource::Fallback,
        }
    }
}

#[derive(Clone)]
pub struct FilterHook {
    orchestrator: Arc<DecisionOrchestrator>,
}

impl FilterHook {
    pub fn new(orchestrator: Arc<DecisionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<DecisionOrchestrator> {
        &self.orchestrator
    }

    /// Decide one intercepted request
    pub async fn intercept(&self, request: RawRequest, response: Option<ResponseMetadata>) -> HookVerdict {
        let orchestrator = Arc::clone(&self.orchestrator);
        let url = request.url.clone();
        let task = tokio::spawn(async move {
            let (decision, mission) = orchestrator.decide_with_mission(&request, response.as_ref()).await;
            let explanation = (!decision.is_allowed()).then(|| mission.text().to_string());
            HookVerdict {
                allow: decision.is_allowed(),
                explanation,
                decision_id: Some(decision.id),
                source: decision.source,
            }
        });

        match task.await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(url = %url, "Decision task failed, allowing request: {}", e);
                HookVerdict::fail_open()
            }
        }
    }

    /// Blocking variant for host threads outside the runtime
    ///
    /// Must not be called from within an async context of `handle`.
    pub fn intercept_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        request: RawRequest,
        response: Option<ResponseMetadata>,
    ) -> HookVerdict {
        handle.block_on(self.intercept(request, response))
    }

    /// Feedback from the block page; returns whether it was accepted
    pub async fn feedback(&self, decision_id: &str, feedback: &str) -> bool {
        let id = match DecisionId::from_string(decision_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(decision_id, "Ignoring feedback with malformed decision id: {}", e);
                return false;
            }
        };
        let feedback = match feedback.parse::<Feedback>() {
            Ok(feedback) => feedback,
            Err(e) => {
                warn!(decision_id, "Ignoring feedback: {}", e);
                return false;
            }
        };

        match self.orchestrator.submit_feedback(id, feedback).await {
            Ok(()) => true,
            Err(e) => {
                warn!(decision_id, "Feedback dropped: {}", e);
                false
            }
        }
    }
}

/// Substitute response shown for a blocked request
pub fn block_page_html(url: &str, mission: &str, decision_id: DecisionId) -> String {
    let url = escape_html(url);
    let mission = escape_html(mission);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Blocked by Anchorite</title></head>
<body>
<h1>Stay on mission</h1>
<p>Your current mission: <strong>{mission}</strong></p>
<p>This page doesn't look aligned with it:<br><code>{url}</code></p>
<form method="post" action="/anchorite/feedback">
<input type="hidden" name="decision_id" value="{decision_id}">
<button type="submit" name="feedback" value="block">Right call, keep it blocked</button>
<button type="submit" name="feedback" value="allow">This should be allowed</button>
</form>
</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
