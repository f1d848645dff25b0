use arq_lab_core::{ArqConfig, ArqError, JoinPolicy};
use arq_lab_simulator::{LinkConfig, Simulator};
use std::collections::BTreeMap;
use std::time::Duration;

const MESSAGE: &[u8] = b"The quick brown fox jumps over the lazy dog, then does it again for good measure.";

fn config(max_segment_size: usize, window_size: usize) -> ArqConfig {
    ArqConfig {
        max_segment_size,
        window_size,
        timeout: Duration::from_millis(300),
        max_retransmissions: Some(100),
        ..Default::default()
    }
}

#[test]
fn lossless_links_deliver_for_any_window() {
    for window_size in 1..=6 {
        for max_segment_size in [1, 5, 16, 1000] {
            let report = Simulator::new(config(max_segment_size, window_size), LinkConfig::default())
                .run(MESSAGE)
                .unwrap();
            assert_eq!(
                report.delivered.as_deref(),
                Some(MESSAGE),
                "window {window_size}, segment size {max_segment_size}"
            );
        }
    }
}

#[test]
fn seeded_lossy_reordering_fragmenting_links_deliver() {
    for seed in 0..16 {
        let link = LinkConfig {
            loss_rate: 0.3,
            min_latency: 1,
            max_latency: 120,
            max_chunk: Some(1 + (seed as usize % 4)),
            seed,
        };
        let report = Simulator::new(config(6, 3), link)
            .run(MESSAGE)
            .unwrap_or_else(|err| panic!("seed {seed}: {err}"));
        assert_eq!(report.delivered.as_deref(), Some(MESSAGE), "seed {seed}");
        assert_eq!(report.receiver.malformed_frames, 0, "seed {seed}");
    }
}

#[test]
fn same_seed_same_run() {
    let link = LinkConfig {
        loss_rate: 0.25,
        seed: 42,
        ..Default::default()
    };
    let first = Simulator::new(config(4, 3), link.clone()).run(MESSAGE).unwrap();
    let second = Simulator::new(config(4, 3), link).run(MESSAGE).unwrap();

    assert_eq!(first.duration_ms, second.duration_ms);
    assert_eq!(first.transmissions, second.transmissions);
    assert_eq!(first.link_events, second.link_events);
}

#[test]
fn window_bound_caps_frames_in_flight() {
    let link = LinkConfig {
        min_latency: 10,
        max_latency: 10,
        ..Default::default()
    };
    let report = Simulator::new(config(1, 2), link).run(b"abcdef").unwrap();
    // On a lossless link nothing is resent, so every segment went out exactly once.
    assert_eq!(report.transmissions, vec![1; 6]);
    assert_eq!(report.sender.frames_sent, 6);

    // Each round trip is 20ms, so frames sent at the same instant share one round.
    let mut per_instant = BTreeMap::<u64, usize>::new();
    for event in &report.link_events {
        if event.description.starts_with("[Sender->Receiver] SEND") {
            *per_instant.entry(event.time).or_default() += 1;
        }
    }
    assert_eq!(per_instant.values().sum::<usize>(), 6);
    assert!(per_instant.values().all(|&n| n <= 2), "{per_instant:?}");
    assert!(per_instant.len() >= 3, "{per_instant:?}");
}

#[test]
fn silent_link_gives_up_after_the_retry_limit() {
    let link = LinkConfig {
        loss_rate: 1.0,
        ..Default::default()
    };
    let sim = Simulator::new(
        ArqConfig {
            max_retransmissions: Some(5),
            ..config(8, 4)
        },
        link,
    );
    match sim.run(MESSAGE) {
        Err(ArqError::GiveUp { seq, attempts }) => {
            assert_eq!(seq, 0);
            assert_eq!(attempts, 6);
        }
        other => panic!("expected give-up, got {other:?}"),
    }
}

#[test]
fn ack_delay_stretches_the_transfer() {
    let link = LinkConfig {
        min_latency: 10,
        max_latency: 10,
        ..Default::default()
    };
    let fast = Simulator::new(config(8, 2), link.clone())
        .run(MESSAGE)
        .unwrap();
    let slow = Simulator::new(
        ArqConfig {
            ack_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
            ..config(8, 2)
        },
        link,
    )
    .run(MESSAGE)
    .unwrap();

    assert_eq!(slow.delivered.as_deref(), Some(MESSAGE));
    assert_eq!(slow.total_retransmissions(), 0);
    // The receiver sleeps before each of its 11 ACKs.
    assert!(slow.duration_ms >= 11 * 50);
    assert!(slow.duration_ms > fast.duration_ms);
}

#[test]
fn space_join_survives_the_link() {
    let report = Simulator::new(
        ArqConfig {
            join: JoinPolicy::SpaceSeparated,
            ..config(3, 2)
        },
        LinkConfig::default(),
    )
    .run(b"abcdefg")
    .unwrap();
    assert_eq!(report.delivered_text().as_deref(), Some("abc def g"));
}

#[test]
fn invalid_link_is_rejected() {
    let link = LinkConfig {
        min_latency: 50,
        max_latency: 10,
        ..Default::default()
    };
    assert!(matches!(
        Simulator::new(ArqConfig::default(), link).run(MESSAGE),
        Err(ArqError::InvalidConfig(_))
    ));
}
