//! SCA and IC adapters, text scripts and server-style replies.

use std::sync::Arc;

use rust_alf::config::TimingConfig;
use rust_alf::error::RangeKind;
use rust_alf::hardware::regs;
use rust_alf::prelude::*;
use rust_alf::sequence::render;
use rust_alf::sequence::script::{parse_json, parse_script, Script};

fn registry() -> (Arc<MockBar>, LinkRegistry) {
    let bar = Arc::new(MockBar::new());
    let topology = StaticTopology::new().with_card("#1", 12, 12);
    let timing = TimingConfig {
        ic_write_settle_ms: 1,
        ..TimingConfig::default()
    };
    let registry = LinkRegistry::new(Arc::new(topology), bar.clone(), timing);
    (bar, registry)
}

fn card() -> CardId {
    CardId::from("#1")
}

#[tokio::test]
async fn test_malformed_sca_command_rejected() {
    let (_bar, registry) = registry();
    let sca = Sca::open(&registry, &card(), 0).unwrap();
    let result = sca.execute_command(0xcafe, 0x1234).await;
    assert!(matches!(result, Err(AlfError::Command(_))));
}

#[tokio::test]
async fn test_sca_sequence_reports_bad_commands_in_place() {
    let (_bar, registry) = registry();
    let mut sca = Sca::open(&registry, &card(), 0).unwrap();
    let ops = [ScaOp::command(0xdeadbeef, 0xfec), ScaOp::command(42, 54)];

    let results = sca.sequence(&ops, false).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name(), "error");
    assert!(results[1].is_error());
}

#[tokio::test]
async fn test_sca_script_reply() {
    let (_bar, registry) = registry();
    let mut sca = Sca::open(&registry, &card(), 0).unwrap();
    let script: Script<ScaOp> = parse_script(
        "svl_connect\n0x00010002,0xff000000\n0x00020003,0x0\n2,wait\n",
    )
    .unwrap();

    let results = sca.sequence(&script.ops, script.lock).await.unwrap();

    assert_eq!(sca.svl_state(), SvlState::Connected);
    assert_eq!(
        render(&results).unwrap(),
        "0x00010002,0xff000000\n0x00020003,0xff000000\n2\n"
    );
}

#[tokio::test]
async fn test_sca_reply_error_renders_partial_output() {
    let (bar, registry) = registry();
    let mut sca = Sca::open(&registry, &card(), 0).unwrap();
    let ops = [ScaOp::wait(1), ScaOp::command(0x0001_0002, 0x1)];
    bar.set_sca_reply_flags(0x02);

    let results = sca.sequence(&ops, false).await.unwrap();

    match render(&results) {
        Err(AlfError::Sequence(text)) => {
            assert!(text.starts_with("1\nSCA_SEQUENCE command cmd=0x00010002"));
            assert!(text.contains("invalid channel request"));
        }
        other => panic!("expected sequence error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ic_write_read() {
    let (_bar, registry) = registry();
    let ic = Ic::open(&registry, &card(), 0).unwrap();
    ic.write(0xbb, 0xdd).await.unwrap();
    assert_eq!(ic.read(0xbb).unwrap(), 0xdd);
}

#[tokio::test]
async fn test_ic_reset_changes_value() {
    let (_bar, registry) = registry();
    let mut ic = Ic::open(&registry, &card(), 0).unwrap();
    ic.write(0xbb, 0xdd).await.unwrap();
    ic.sc_reset().await.unwrap();
    assert_ne!(ic.read(0xbb).unwrap(), 0xdd);
}

#[tokio::test]
async fn test_ic_json_sequence() {
    let (_bar, registry) = registry();
    let mut ic = Ic::open(&registry, &card(), 5).unwrap();
    let ops: Vec<IcOp> = parse_json(
        r#"[
            {"op": "write", "address": "0xbb", "data": "0xdd"},
            {"op": "read", "address": 187},
            {"op": "wait", "ms": 2}
        ]"#,
    )
    .unwrap();

    let results = ic.sequence(&ops, true).await.unwrap();

    assert_eq!(
        results[1],
        StepResult::Done(IcOutput::Read {
            address: 0xbb,
            data: 0xdd
        })
    );
    assert_eq!(results[2].name(), "wait");
}

#[test]
fn test_range_errors_for_every_protocol() {
    let (_bar, registry) = registry();
    assert!(matches!(
        Sca::open(&registry, &card(), 42),
        Err(AlfError::Range {
            kind: RangeKind::Link,
            ..
        })
    ));
    assert!(matches!(
        Ic::open(&registry, &card(), 42),
        Err(AlfError::Range {
            kind: RangeKind::Link,
            ..
        })
    ));

    let sca = Sca::open(&registry, &card(), 0).unwrap();
    assert!(matches!(
        sca.set_channel(42),
        Err(AlfError::Range {
            kind: RangeKind::Channel,
            value: 42,
            limit: 12
        })
    ));
}

#[tokio::test]
async fn test_sc_reset_idempotent_across_protocols() {
    let (bar, registry) = registry();
    let mut sca = Sca::open(&registry, &card(), 7).unwrap();
    let mut ic = Ic::open(&registry, &card(), 7).unwrap();

    sca.svl_connect().unwrap();
    ic.write(0x10, 0x20).await.unwrap();

    sca.sc_reset().await.unwrap();
    let first = (sca.svl_state(), ic.read(0x10).unwrap());
    ic.sc_reset().await.unwrap();
    let second = (sca.svl_state(), ic.read(0x10).unwrap());

    assert_eq!(first, second);
    assert_eq!(first, (SvlState::Reset, 0x00));
    assert_eq!(bar.reset_count(&card(), 7), 2);
}

#[tokio::test]
async fn test_reset_by_ic_adapter_drops_sca_connection() {
    let (bar, registry) = registry();
    let sca = Sca::open(&registry, &card(), 3).unwrap();
    let mut ic = Ic::open(&registry, &card(), 3).unwrap();

    sca.svl_connect().unwrap();
    ic.sc_reset().await.unwrap();
    assert_eq!(sca.svl_state(), SvlState::Reset);

    sca.svl_connect().unwrap();
    assert_eq!(sca.svl_state(), SvlState::Connected);
    assert_eq!(
        bar.svl_commands(&card(), 3),
        vec![regs::SVL_CMD_RESET, regs::SVL_CMD_CONNECT, regs::SVL_CMD_CONNECT]
    );
}

#[tokio::test]
async fn test_ic_address_aliases_low_16_bits() {
    let (_bar, registry) = registry();
    let ic = Ic::open(&registry, &card(), 0).unwrap();
    ic.write(0xbb, 0xdd).await.unwrap();
    assert_eq!(ic.read(0x1_00bb).unwrap(), 0xdd);
}

#[test]
fn test_unknown_operation_fails_before_running() {
    assert!(matches!(
        parse_script::<IcOp>("0xbb,0xdd,write\n0xbb,erase"),
        Err(AlfError::Parse(_))
    ));
    assert!(matches!(
        parse_json::<ScaOp>(r#"[{"op": "command", "command": 1}]"#),
        Err(AlfError::Parse(_))
    ));
}
