use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument};

use crate::core::decision::{Action, ActionKind, Decision};
use crate::core::http::{HttpRequest, HttpResponse, RequestContext};
use crate::core::resolver::Resolver;
use crate::core::route::RouteMatcher;
use crate::core::score::{ScoreAggregator, ThreatScore};
use crate::detectors::{DetectionPhase, Detector, DetectorResult};
use crate::handlers::{Handler, HandlerContext};
use crate::utils::error::{Result, SentinelError};

/// The orchestrator: ordered detectors, one aggregator, one resolver, and
/// handlers keyed by action kind.
///
/// Detection short-circuits on the first positive result — detectors are
/// sorted by descending priority so the cheap, high-signal checks run
/// first and one positive is enough to drive the decision.
pub struct Pipeline {
    request_detectors: Vec<Arc<dyn Detector>>,
    response_detectors: Vec<Arc<dyn Detector>>,
    aggregator: Arc<dyn ScoreAggregator>,
    resolver: Resolver,
    routes: RouteMatcher,
    handlers: HashMap<ActionKind, Vec<Arc<dyn Handler>>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    fn detectors_for_route<'a>(
        &'a self,
        detectors: &'a [Arc<dyn Detector>],
        path: &str,
    ) -> (Vec<&'a Arc<dyn Detector>>, &'a Resolver, Option<Resolver>) {
        let rule = self.routes.match_route(path);

        let selected: Vec<&Arc<dyn Detector>> = match rule.and_then(|r| r.detectors.as_ref()) {
            Some(names) => detectors
                .iter()
                .filter(|d| names.iter().any(|n| n == d.name()))
                .collect(),
            None => detectors.iter().collect(),
        };

        let route_resolver = rule
            .and_then(|r| r.thresholds.clone())
            .and_then(|levels| match Resolver::new(levels) {
                Ok(resolver) => Some(resolver),
                Err(err) => {
                    error!(error = %err, "route threshold table invalid, using defaults");
                    None
                }
            });

        (selected, &self.resolver, route_resolver)
    }

    /// Runs the request phase and dispatches resolved actions.
    #[instrument(skip(self, request, context), fields(path = request.path()))]
    pub async fn process(&self, request: &HttpRequest, context: &RequestContext) -> Decision {
        let started = std::time::Instant::now();
        let (detectors, default_resolver, route_resolver) =
            self.detectors_for_route(&self.request_detectors, request.path());

        let mut results = Vec::new();
        for detector in detectors {
            if !detector.enabled() {
                continue;
            }
            if let Some(mut result) = detector.detect_request(request, context).await {
                result.detector_name = detector.name().to_string();
                debug!(
                    detector = detector.name(),
                    attack = %result.attack_type,
                    severity = result.severity.as_str(),
                    "positive detection, short-circuiting"
                );
                counter!("sentinel.detections", 1, "detector" => result.detector_name.clone());
                results.push(result);
                break;
            }
        }

        let resolver = route_resolver.as_ref().unwrap_or(default_resolver);
        let decision = self.finish(request, context, results, resolver).await;
        histogram!(
            "sentinel.pipeline.request_ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        decision
    }

    /// Runs the response phase (failure counters, brute force).
    #[instrument(skip_all, fields(path = request.path(), status = response.status()))]
    pub async fn process_response(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        context: &RequestContext,
    ) -> Decision {
        let (detectors, default_resolver, route_resolver) =
            self.detectors_for_route(&self.response_detectors, request.path());

        let mut results = Vec::new();
        for detector in detectors {
            if !detector.enabled() {
                continue;
            }
            if let Some(mut result) = detector.detect_response(request, response, context).await {
                result.detector_name = detector.name().to_string();
                counter!("sentinel.detections", 1, "detector" => result.detector_name.clone());
                results.push(result);
                break;
            }
        }

        let resolver = route_resolver.as_ref().unwrap_or(default_resolver);
        self.finish(request, context, results, resolver).await
    }

    async fn finish(
        &self,
        request: &HttpRequest,
        context: &RequestContext,
        results: Vec<DetectorResult>,
        resolver: &Resolver,
    ) -> Decision {
        let score = self.aggregator.aggregate(results);
        let actions = resolver.resolve(&score);

        if !actions.is_empty() {
            info!(
                score = score.score,
                level = score.level.as_str(),
                actions = actions.len(),
                "threat resolved to actions"
            );
            self.dispatch(&actions, request, context, &score).await;
        }

        Decision::new(actions, score)
    }

    async fn dispatch(
        &self,
        actions: &[Action],
        request: &HttpRequest,
        context: &RequestContext,
        score: &ThreatScore,
    ) {
        let ctx = HandlerContext::new(request, context, score);
        for action in actions {
            let Some(handlers) = self.handlers.get(&action.kind) else {
                continue;
            };
            for handler in handlers {
                if let Err(err) = handler.execute(action, &ctx).await {
                    counter!("sentinel.handler_errors", 1, "handler" => handler.name().to_string());
                    error!(
                        handler = handler.name(),
                        action = action.kind.name(),
                        error = %err,
                        "handler failed; continuing"
                    );
                }
            }
        }
        ctx.drain_deferred().await;
    }
}

/// Fluent assembly: `Pipeline::builder().detect(...).score(...).resolve(...)
/// .on("block", ...).build()?`.
#[derive(Default)]
pub struct PipelineBuilder {
    detectors: Vec<Arc<dyn Detector>>,
    aggregator: Option<Arc<dyn ScoreAggregator>>,
    resolver: Option<Resolver>,
    routes: RouteMatcher,
    handlers: HashMap<ActionKind, Vec<Arc<dyn Handler>>>,
}

impl PipelineBuilder {
    /// Adds one detector; either phase.
    pub fn detect(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Adds a batch of detectors.
    pub fn detect_all(mut self, detectors: impl IntoIterator<Item = Arc<dyn Detector>>) -> Self {
        self.detectors.extend(detectors);
        self
    }

    pub fn score(mut self, aggregator: Arc<dyn ScoreAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn resolve(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn routes(mut self, routes: RouteMatcher) -> Self {
        self.routes = routes;
        self
    }

    /// Registers a handler for an action kind. Multiple handlers per kind
    /// run in registration order.
    pub fn on(mut self, action: &str, handler: Arc<dyn Handler>) -> Self {
        self.handlers
            .entry(ActionKind::from_name(action))
            .or_default()
            .push(handler);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let aggregator = self
            .aggregator
            .ok_or_else(|| SentinelError::config("pipeline has no score aggregator"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| SentinelError::config("pipeline has no resolver"))?;

        let mut request_detectors: Vec<Arc<dyn Detector>> = Vec::new();
        let mut response_detectors: Vec<Arc<dyn Detector>> = Vec::new();
        for detector in self.detectors {
            match detector.phase() {
                DetectionPhase::Request => request_detectors.push(detector),
                DetectionPhase::Response => response_detectors.push(detector),
            }
        }
        // Stable sort keeps registration order among equal priorities.
        request_detectors.sort_by_key(|d| std::cmp::Reverse(d.priority()));
        response_detectors.sort_by_key(|d| std::cmp::Reverse(d.priority()));

        Ok(Pipeline {
            request_detectors,
            response_detectors,
            aggregator,
            resolver,
            routes: self.routes,
            handlers: self.handlers,
        })
    }
}
