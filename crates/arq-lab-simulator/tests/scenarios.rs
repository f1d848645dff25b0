use arq_lab_simulator::scenario_runner;
use std::fs;
use std::path::PathBuf;

fn scenario_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}

#[test]
fn every_bundled_scenario_passes() {
    let mut paths: Vec<PathBuf> = fs::read_dir(scenario_dir())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();
    assert!(!paths.is_empty());

    for path in paths {
        if let Err(err) = scenario_runner::run_scenario(&path) {
            panic!("{}: {:#}", path.display(), err);
        }
    }
}

#[test]
fn gbn_dropped_segment_resends_only_after_timeout() {
    let report = scenario_runner::run_scenario(scenario_dir().join("gbn_dropped_segment.toml"))
        .unwrap();
    assert_eq!(report.transmissions.len(), 4);
    assert_eq!(report.transmissions[3], 1);
    assert!(report.duration_ms >= 1000);
    assert!(
        report
            .link_events
            .iter()
            .any(|event| event.description.contains("DROP (deterministic) segment 1"))
    );
}

#[test]
fn failed_assertion_names_the_scenario() {
    let scenario = toml::from_str(
        r#"
        name = "impossible"
        message = "abcd"
        [config]
        max_segment_size = 2
        [[assertions]]
        type = "total_retransmissions"
        min = 5
        "#,
    )
    .unwrap();

    let err = scenario_runner::run(&scenario).unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("impossible"), "{text}");
    assert!(text.contains("expected at least 5"), "{text}");
}

#[test]
fn missing_file_is_reported() {
    let err = scenario_runner::run_scenario(scenario_dir().join("nope.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}
