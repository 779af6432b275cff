// tests/detect_engine.rs
//
// Silnik detekcji na atrapie lookupu CAS: kolejność źródeł, TTL cache,
// singleflight i niecache'owanie błędów.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cas_guard::cas::{CasLookup, LookupError, Reputation, ReputationLookup};
use cas_guard::config::SourceFormat;
use cas_guard::detect::{Detector, Source};
use cas_guard::scamlist::{FetchedSource, ScamList};

struct MockLookup {
    calls: AtomicUsize,
    fail_first: AtomicUsize,
    flagged: bool,
    delay_ms: u64,
}

impl MockLookup {
    fn new(flagged: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            flagged,
            delay_ms: 0,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReputationLookup for MockLookup {
    async fn is_flagged(&self, _user_id: u64) -> Result<CasLookup, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(LookupError::Throttled);
        }
        Ok(CasLookup {
            flagged: self.flagged,
            evidence: "mock evidence".into(),
        })
    }
}

fn detector_with(
    lookup: Arc<MockLookup>,
    ttl: Duration,
) -> (Detector, Arc<ScamList>, Arc<Reputation>) {
    let scamlist = Arc::new(ScamList::new());
    let reputation = Arc::new(Reputation::new(lookup, ttl, 1_000));
    let detector = Detector::new(scamlist.clone(), reputation.clone());
    (detector, scamlist, reputation)
}

#[tokio::test]
async fn local_hit_short_circuits_without_network() {
    let lookup = MockLookup::new(false);
    let (detector, scamlist, _) = detector_with(lookup.clone(), Duration::from_secs(600));
    scamlist
        .apply(
            vec![FetchedSource {
                name: "lols-bot".into(),
                format: SourceFormat::Lines,
                body: Ok("42\n".into()),
            }],
            1_000,
        )
        .await;

    let verdict = detector.evaluate(42).await;
    assert!(verdict.flagged);
    assert_eq!(verdict.source, Source::Local);
    assert!(verdict.evidence.contains("lols-bot"));
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn remote_result_is_served_from_cache_afterwards() {
    let lookup = MockLookup::new(true);
    let (detector, _, _) = detector_with(lookup.clone(), Duration::from_secs(600));

    let first = detector.evaluate(7).await;
    assert!(first.flagged);
    assert_eq!(first.source, Source::Remote);

    let second = detector.evaluate(7).await;
    assert!(second.flagged);
    assert_eq!(second.source, Source::Cache);
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn clean_results_are_cached_too() {
    let lookup = MockLookup::new(false);
    let (detector, _, _) = detector_with(lookup.clone(), Duration::from_secs(600));

    let first = detector.evaluate(8).await;
    assert!(!first.flagged);
    assert_eq!(first.source, Source::Remote);

    let second = detector.evaluate(8).await;
    assert!(!second.flagged);
    assert_eq!(second.source, Source::Cache);
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn entry_older_than_ttl_is_never_a_hit() {
    let lookup = MockLookup::new(true);
    let (detector, _, _) = detector_with(lookup.clone(), Duration::from_millis(50));

    detector.evaluate(9).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let verdict = detector.evaluate(9).await;
    // po TTL wpis traktowany jak nieobecny -> świeży lookup
    assert_eq!(verdict.source, Source::Remote);
    assert_eq!(lookup.calls(), 2);
}

#[tokio::test]
async fn lookup_failure_degrades_and_is_not_cached() {
    let lookup = MockLookup::new(true);
    lookup.fail_first.store(1, Ordering::SeqCst);
    let (detector, _, _) = detector_with(lookup.clone(), Duration::from_secs(600));

    let first = detector.evaluate(10).await;
    assert!(!first.flagged);
    assert_eq!(first.source, Source::RemoteFailed);

    // błąd nie zostawił wpisu – kolejna ocena idzie w sieć i dostaje werdykt
    let second = detector.evaluate(10).await;
    assert!(second.flagged);
    assert_eq!(second.source, Source::Remote);
    assert_eq!(lookup.calls(), 2);
}

#[tokio::test]
async fn concurrent_misses_coalesce_into_one_flight() {
    let lookup = Arc::new(MockLookup {
        calls: AtomicUsize::new(0),
        fail_first: AtomicUsize::new(0),
        flagged: true,
        delay_ms: 80,
    });
    let scamlist = Arc::new(ScamList::new());
    let reputation = Arc::new(Reputation::new(
        lookup.clone(),
        Duration::from_secs(600),
        1_000,
    ));
    let detector = Arc::new(Detector::new(scamlist, reputation));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let d = detector.clone();
        handles.push(tokio::spawn(async move { d.evaluate(77).await }));
    }
    for h in handles {
        let verdict = h.await.unwrap();
        assert!(verdict.flagged);
    }
    // wszystkie miss-y skleiły się w jeden lot
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn different_identifiers_do_not_share_a_flight() {
    let lookup = MockLookup::new(true);
    let (detector, _, _) = detector_with(lookup.clone(), Duration::from_secs(600));

    detector.evaluate(1).await;
    detector.evaluate(2).await;
    assert_eq!(lookup.calls(), 2);
}
