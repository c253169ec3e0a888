use std::time::Duration;

use sentinel::behavior::ReputationStore;
use sentinel::config::SentinelConfig;
use sentinel::core::{ActionKind, HttpRequest, RequestContext, ThresholdLevel};

use crate::Harness;

fn from_ip(request: HttpRequest, ip: &str) -> HttpRequest {
    request.with_header("cf-connecting-ip", ip)
}

#[tokio::test]
async fn rate_limit_boundary_and_window_reset() {
    let mut config = SentinelConfig::default();
    config.detectors.rate_limit.limit = 100;
    config.detectors.rate_limit.window_secs = 1;
    // Log-only so the over-limit request does not land a block record that
    // would shadow the post-expiry check.
    config.thresholds.levels = Some(vec![ThresholdLevel::new(100, &["log"])]);
    let harness = Harness::new(config);

    let context = RequestContext::new();
    let request = from_ip(HttpRequest::get("/api/data"), "203.0.113.50");

    // All requests inside the budget pass.
    for i in 0..100 {
        let decision = harness.pipeline.process(&request, &context).await;
        assert_eq!(
            decision.score().score,
            0,
            "request {i} should be within the budget"
        );
    }

    // The 101st in the same window trips the limiter.
    let decision = harness.pipeline.process(&request, &context).await;
    assert_eq!(decision.score().results[0].detector_name, "rate-limit");
    assert_eq!(decision.score().score, 100);

    // After the window expires the counter starts over.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let decision = harness.pipeline.process(&request, &context).await;
    assert_eq!(decision.score().score, 0, "fresh window should pass");
}

#[tokio::test]
async fn reputation_accumulates_and_feeds_detection() {
    let mut config = SentinelConfig::default();
    // Reputation updates on every scored request; no blocking so the
    // blocklist does not shadow the reputation read.
    config.thresholds.levels = Some(vec![
        ThresholdLevel::new(50, &["log", "update_reputation"]),
        ThresholdLevel::new(100, &["log", "notify", "update_reputation"]),
    ]);
    let harness = Harness::new(config);
    let ip = "198.51.100.33";
    let context = RequestContext::new();

    // Repeated XSS attempts drive reputation down
    for _ in 0..4 {
        let request = from_ip(
            HttpRequest::get("/c?t=%3Cscript%3Ealert(1)%3C%2Fscript%3E"),
            ip,
        );
        let decision = harness.pipeline.process(&request, &context).await;
        assert!(decision.has(&ActionKind::UpdateReputation));
    }

    let record = ReputationStore::new(harness.kv.clone())
        .load(ip)
        .await
        .unwrap()
        .expect("reputation record exists");
    assert!(record.score <= -40, "score {} should be well negative", record.score);
    assert!(record.history.len() >= 4);

    // A benign request from the same client now trips the reputation
    // detector on its stored score alone.
    let benign = from_ip(HttpRequest::get("/home"), ip);
    let decision = harness.pipeline.process(&benign, &context).await;
    let result = &decision.score().results[0];
    assert_eq!(result.detector_name, "reputation");
}

#[tokio::test]
async fn failure_counter_is_bounded_and_expires() {
    let mut config = SentinelConfig::default();
    config.detectors.brute_force.threshold = 3;
    config.detectors.brute_force.window_secs = 1;
    let harness = Harness::new(config);

    let context = RequestContext::new();
    let request = from_ip(HttpRequest::post("/login"), "203.0.113.80");
    let denied = sentinel::core::HttpResponse::new(403);

    for _ in 0..2 {
        let decision = harness
            .pipeline
            .process_response(&request, &denied, &context)
            .await;
        assert_eq!(decision.score().score, 0);
    }
    let decision = harness
        .pipeline
        .process_response(&request, &denied, &context)
        .await;
    assert_eq!(decision.score().results[0].detector_name, "brute-force");

    // TTL elapses; the counter is gone and detection stops.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let decision = harness
        .pipeline
        .process_response(&request, &denied, &context)
        .await;
    assert_eq!(decision.score().score, 0);
}
