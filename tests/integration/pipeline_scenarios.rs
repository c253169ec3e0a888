use sentinel::config::{SentinelConfig, ThresholdPreset};
use sentinel::core::{ActionKind, HttpRequest, HttpResponse, RequestContext, ThreatLevel};
use sentinel::storage::KvStore;

use crate::Harness;

fn from_ip(request: HttpRequest, ip: &str) -> HttpRequest {
    request.with_header("cf-connecting-ip", ip)
}

#[tokio::test]
async fn sqli_on_get_logs_and_notifies_without_block() {
    let harness = Harness::standard();
    let request = from_ip(
        HttpRequest::get("/search?q=1%27%20OR%201%3D1%20--"),
        "203.0.113.5",
    );

    let decision = harness
        .pipeline
        .process(&request, &RequestContext::new())
        .await;

    let score = decision.score();
    assert_eq!(score.level, ThreatLevel::High);
    assert!(score.score >= 76, "score {} below expectation", score.score);
    assert_eq!(score.results[0].detector_name, "sql-injection");
    assert!(score.results[0].confidence >= 0.95);

    assert!(decision.has(&ActionKind::Log));
    assert!(decision.has(&ActionKind::Notify));
    assert!(!decision.has(&ActionKind::Block), "standard preset must not block high band");
}

#[tokio::test]
async fn blocklisted_ip_cascades_all_actions_without_rewriting_kv() {
    let harness = Harness::standard();
    harness
        .kv
        .put("blocked:1.2.3.4", b"Spam".to_vec(), None)
        .await
        .unwrap();

    let decision = harness
        .pipeline
        .process(&from_ip(HttpRequest::get("/any"), "1.2.3.4"), &RequestContext::new())
        .await;

    let score = decision.score();
    assert_eq!(score.score, 100);
    assert_eq!(score.level, ThreatLevel::Critical);
    assert_eq!(score.results[0].detector_name, "blocklist");
    assert_eq!(score.results[0].confidence, 1.0);

    for kind in [ActionKind::Log, ActionKind::Notify, ActionKind::Block] {
        assert!(decision.has(&kind), "missing cascaded action {kind:?}");
    }

    // The skip flag suppressed every blocklist write: the seeded record is
    // still the only key, and nothing was queued.
    assert_eq!(harness.kv.len(), 1);
    assert!(harness.queue.is_empty());
    let stored = harness.kv.get("blocked:1.2.3.4").await.unwrap().unwrap();
    assert_eq!(stored, b"Spam".to_vec());
}

#[tokio::test]
async fn clean_request_produces_no_actions() {
    let harness = Harness::standard();
    let decision = harness
        .pipeline
        .process(
            &from_ip(HttpRequest::get("/products?page=2&sort=price"), "203.0.113.9"),
            &RequestContext::new(),
        )
        .await;
    assert_eq!(decision.score().score, 0);
    assert!(decision.actions().is_empty());
}

#[tokio::test]
async fn brute_force_with_strict_thresholds_blocks() {
    let mut config = SentinelConfig::default();
    config.thresholds.preset = ThresholdPreset::Strict;
    let harness = Harness::new(config);

    let context = RequestContext::new();
    let request = from_ip(HttpRequest::post("/login"), "198.51.100.20");
    let denied = HttpResponse::new(401);

    let mut last = None;
    for _ in 0..6 {
        last = Some(
            harness
                .pipeline
                .process_response(&request, &denied, &context)
                .await,
        );
    }
    let decision = last.unwrap();

    let score = decision.score();
    assert_eq!(score.results[0].detector_name, "brute-force");
    assert!(score.score >= 40, "score {} too low to block", score.score);
    for kind in [ActionKind::Log, ActionKind::Notify, ActionKind::Block] {
        assert!(decision.has(&kind), "strict preset should emit {kind:?}");
    }

    // The block handler wrote the record and queued replication.
    assert!(harness
        .kv
        .get("blocked:198.51.100.20")
        .await
        .unwrap()
        .is_some());
    assert!(!harness.queue.is_empty());
}

#[tokio::test]
async fn xss_in_json_body_detected() {
    let harness = Harness::standard();
    let body = serde_json::json!({"comment": "<script>alert(document.cookie)</script>"});
    let request = from_ip(HttpRequest::post("/comments").with_json_body(&body), "203.0.113.4");

    let decision = harness
        .pipeline
        .process(&request, &RequestContext::new())
        .await;
    let result = &decision.score().results[0];
    assert_eq!(result.detector_name, "xss");
    assert_eq!(result.evidence.as_ref().unwrap().field, "body.comment");
}

#[tokio::test]
async fn route_override_can_exempt_paths() {
    let mut config = SentinelConfig::default();
    config.thresholds.routes = vec![sentinel::core::RouteRule {
        pattern: "/webhooks/**".into(),
        // Only the blocklist runs for trusted webhook payloads.
        detectors: Some(vec!["blocklist".into()]),
        thresholds: None,
    }];
    let harness = Harness::new(config);

    let payload = HttpRequest::post("/webhooks/ci")
        .with_body("application/json", r#"{"script": "<script>x</script>"}"#);
    let decision = harness
        .pipeline
        .process(&from_ip(payload, "203.0.113.2"), &RequestContext::new())
        .await;
    assert_eq!(decision.score().score, 0, "xss must be skipped on the route");

    let elsewhere = HttpRequest::post("/comments")
        .with_body("application/json", r#"{"script": "<script>x</script>"}"#);
    let decision = harness
        .pipeline
        .process(&from_ip(elsewhere, "203.0.113.2"), &RequestContext::new())
        .await;
    assert!(decision.score().score > 0);
}
