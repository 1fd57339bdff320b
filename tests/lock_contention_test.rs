//! Cross-session locking of link channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_alf::prelude::*;

fn registry() -> Arc<LinkRegistry> {
    let bar = Arc::new(MockBar::new());
    Arc::new(LinkRegistry::from_config(&AlfConfig::default(), bar))
}

fn card() -> CardId {
    CardId::from("#1")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_locked_sequence_fails_fast() {
    let registry = registry();

    let mut holder = Swt::open(&registry, &card(), 2).unwrap();
    let first = tokio::spawn(async move {
        let ops = [SwtOp::write(0xdd), SwtOp::wait(200), SwtOp::read(80)];
        let results = holder.sequence(&ops, true).await;
        results
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut contender = Swt::open(&registry, &card(), 2).unwrap();
    let start = Instant::now();
    let result = contender.sequence(&[SwtOp::write(0xee)], true).await;
    let latency = start.elapsed();

    assert!(matches!(result, Err(AlfError::LinkBusy { link: 2, .. })));
    assert!(latency < Duration::from_millis(100), "refusal took {latency:?}");

    let results = first.await.unwrap().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|result| !result.is_error()));

    // lock released once the holder finished
    let results = contender.sequence(&[SwtOp::ScReset], true).await.unwrap();
    assert_eq!(results, vec![StepResult::Done(SwtOutput::ScReset)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_spans_protocols() {
    let registry = registry();

    let mut sca = Sca::open(&registry, &card(), 1).unwrap();
    let holder = tokio::spawn(async move {
        let ops = [ScaOp::wait(150)];
        let results = sca.sequence(&ops, true).await;
        results
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut ic = Ic::open(&registry, &card(), 1).unwrap();
    let result = ic.sequence(&[IcOp::read(0xbb)], true).await;
    assert!(matches!(result, Err(AlfError::LinkBusy { .. })));

    holder.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_links_do_not_contend() {
    let registry = registry();
    let mut a = Swt::open(&registry, &card(), 0).unwrap();
    let mut b = Swt::open(&registry, &card(), 1).unwrap();

    let ops_a = [SwtOp::write(0xa), SwtOp::wait(50), SwtOp::read(10)];
    let ops_b = [SwtOp::write(0xb), SwtOp::wait(50), SwtOp::read(10)];
    let (ra, rb) = futures::future::join(a.sequence(&ops_a, true), b.sequence(&ops_b, true)).await;

    let ra = ra.unwrap();
    let rb = rb.unwrap();
    assert_eq!(ra[2].value().unwrap().words(), [SwtWord::from(0xa_u64)]);
    assert_eq!(rb[2].value().unwrap().words(), [SwtWord::from(0xb_u64)]);
}

#[tokio::test]
async fn test_unlocked_sequence_ignores_lock() {
    let registry = registry();
    let mut swt = Swt::open(&registry, &card(), 0).unwrap();

    let _guard = swt.link().try_lock(SessionId::new()).unwrap();
    let results = swt.sequence(&[SwtOp::write(1), SwtOp::read(0)], false).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(!results[1].is_error());
}

#[tokio::test]
async fn test_lock_is_not_reentrant() {
    let registry = registry();
    let mut swt = Swt::open(&registry, &card(), 0).unwrap();

    let _guard = swt.link().try_lock(swt.session()).unwrap();
    let result = swt.sequence(&[SwtOp::write(1)], true).await;
    assert!(matches!(result, Err(AlfError::LinkBusy { .. })));
}

#[tokio::test]
async fn test_busy_sequence_runs_nothing() {
    let bar = Arc::new(MockBar::new());
    let registry = LinkRegistry::from_config(&AlfConfig::default(), bar.clone());
    let mut swt = Swt::open(&registry, &card(), 0).unwrap();

    let _guard = swt.link().try_lock(SessionId::new()).unwrap();
    let writes = bar.register_writes();
    assert!(swt.sequence(&[SwtOp::write(1)], true).await.is_err());
    assert_eq!(bar.register_writes(), writes);
}
