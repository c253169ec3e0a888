use std::time::Duration;

use sentinel::blocklist::{
    load_snapshot, write_snapshot, BlockQueueMessage, BlocklistConsumer, CuckooFilter,
    FilterRebuilder,
};
use sentinel::config::{BlocklistMode, SentinelConfig};
use sentinel::core::{ActionKind, HttpRequest, RequestContext};
use sentinel::storage::{EdgeCache, KvStore};

use crate::Harness;

fn cuckoo_config(verify: bool) -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.blocklist.mode = BlocklistMode::Cuckoo;
    config.blocklist.verify_with_kv = verify;
    config
}

fn from_ip(request: HttpRequest, ip: &str) -> HttpRequest {
    request.with_header("cf-connecting-ip", ip)
}

#[tokio::test]
async fn cuckoo_cold_start_caches_filter_at_edge() {
    let harness = Harness::new(cuckoo_config(true));
    let mut filter = CuckooFilter::new(harness.config.blocklist.filter_capacity);
    filter.add("9.9.9.9");
    write_snapshot(harness.kv.as_ref(), &filter, "1".into())
        .await
        .unwrap();

    // Unlisted key: no block, but the filter is now cached at this edge.
    let decision = harness
        .pipeline
        .process(&from_ip(HttpRequest::get("/x"), "8.8.8.8"), &RequestContext::new())
        .await;
    assert!(!decision.has(&ActionKind::Block));

    let cached = harness
        .edge
        .get("https://sentinel.internal/blocklist/filter/v1")
        .await
        .unwrap();
    assert!(cached.is_some(), "filter should be cached after a miss");
}

#[tokio::test]
async fn filter_false_positive_respects_verify_flag() {
    // Filter says present, KV has no record.
    for (verify, expect_block) in [(true, false), (false, true)] {
        let harness = Harness::new(cuckoo_config(verify));
        let mut filter = CuckooFilter::new(harness.config.blocklist.filter_capacity);
        filter.add("1.2.3.4");
        write_snapshot(harness.kv.as_ref(), &filter, "1".into())
            .await
            .unwrap();

        let decision = harness
            .pipeline
            .process(&from_ip(HttpRequest::get("/x"), "1.2.3.4"), &RequestContext::new())
            .await;
        assert_eq!(
            decision.has(&ActionKind::Block),
            expect_block,
            "verify_with_kv={verify}"
        );
    }
}

#[tokio::test]
async fn block_replicates_through_queue_to_filter() {
    let mut config = cuckoo_config(true);
    // Block anything that scores at all, to exercise the write path.
    config.thresholds.levels = Some(vec![sentinel::core::ThresholdLevel::new(
        100,
        &["log", "block"],
    )]);
    let harness = Harness::new(config);

    // An attack from this IP triggers the block handler.
    let attacker = from_ip(
        HttpRequest::get("/search?q=1%27%20OR%201%3D1%20--"),
        "198.51.100.77",
    );
    let context = RequestContext::new();
    let decision = harness.pipeline.process(&attacker, &context).await;
    assert!(decision.has(&ActionKind::Block));

    // Write side ordering: pending marker, KV record, queue message.
    assert!(harness
        .edge
        .get("https://sentinel.internal/blocklist/pending/198.51.100.77")
        .await
        .unwrap()
        .is_some());
    assert!(harness
        .kv
        .get("blocked:198.51.100.77")
        .await
        .unwrap()
        .is_some());
    let payloads = harness.queue.pull(10);
    assert_eq!(payloads.len(), 1);

    // Consumer folds the message into the shared snapshot.
    let consumer = BlocklistConsumer::new(harness.kv.clone(), harness.config.blocklist.clone());
    let batch: Vec<BlockQueueMessage> = payloads
        .iter()
        .map(|p| BlockQueueMessage::from_bytes(p).unwrap())
        .collect();
    let summary = consumer.process_batch(&batch).await.unwrap();
    assert_eq!(summary.added, 1);

    let filter = load_snapshot(harness.kv.as_ref()).await.unwrap().unwrap();
    assert!(filter.contains("198.51.100.77"));

    // A fresh edge (new harness sharing nothing) with the same KV would now
    // see the membership; this edge still sees the pending marker first.
    let decision = harness
        .pipeline
        .process(&from_ip(HttpRequest::get("/any"), "198.51.100.77"), &context)
        .await;
    assert!(decision.has(&ActionKind::Block));
    let result = &decision.score().results[0];
    assert!(result
        .evidence
        .as_ref()
        .unwrap()
        .pattern
        .starts_with("Pending block (verified)"));
}

#[tokio::test]
async fn remove_message_clears_record_and_membership() {
    let harness = Harness::new(cuckoo_config(true));
    let consumer = BlocklistConsumer::new(harness.kv.clone(), harness.config.blocklist.clone());

    consumer
        .process_batch(&[BlockQueueMessage::add("5.6.7.8")])
        .await
        .unwrap();
    harness
        .kv
        .put("blocked:5.6.7.8", b"Spam".to_vec(), None)
        .await
        .unwrap();

    consumer
        .process_batch(&[BlockQueueMessage::remove("5.6.7.8")])
        .await
        .unwrap();

    assert!(harness.kv.get("blocked:5.6.7.8").await.unwrap().is_none());
    let filter = load_snapshot(harness.kv.as_ref()).await.unwrap().unwrap();
    assert!(!filter.contains("5.6.7.8"));
}

#[tokio::test]
async fn rebuild_reconciles_filter_with_kv_truth() {
    let harness = Harness::new(cuckoo_config(true));

    // KV truth: two live blocks. The existing snapshot is stale garbage.
    for ip in ["10.9.9.1", "10.9.9.2"] {
        harness
            .kv
            .put(
                &format!("blocked:{ip}"),
                b"Spam".to_vec(),
                Some(Duration::from_secs(3600)),
            )
            .await
            .unwrap();
    }
    let mut stale = CuckooFilter::new(harness.config.blocklist.filter_capacity);
    stale.add("203.0.113.99");
    write_snapshot(harness.kv.as_ref(), &stale, "1".into())
        .await
        .unwrap();

    let rebuilder = FilterRebuilder::new(harness.kv.clone(), harness.config.blocklist.clone());
    let summary = rebuilder.rebuild().await.unwrap();
    assert_eq!(summary.inserted, 2);
    assert!(summary.version.starts_with("rebuild-"));

    let filter = load_snapshot(harness.kv.as_ref()).await.unwrap().unwrap();
    assert!(filter.contains("10.9.9.1"));
    assert!(filter.contains("10.9.9.2"));
    assert!(!filter.contains("203.0.113.99"));
}
