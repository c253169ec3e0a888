//! Pipeline orchestration: the request/response model, detection
//! sequencing, score aggregation, threshold resolution, and the Decision
//! handed back to the caller.

pub mod decision;
pub mod http;
pub mod pipeline;
pub mod resolver;
pub mod route;
pub mod score;

pub use decision::{Action, ActionKind, Decision};
pub use http::{HttpRequest, HttpResponse, RequestContext};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use resolver::{Resolver, ThresholdLevel};
pub use route::{RouteMatcher, RouteRule};
pub use score::{MaxScoreAggregator, ScoreAggregator, ThreatLevel, ThreatScore, WeightedAggregator};
