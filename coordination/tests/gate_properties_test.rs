//! Score properties of the quality gate.

use coordination::cognition::{ChangeKind, ProposedChange};
use coordination::verifier::{IssueSeverity, QualityGate, QualityGateConfig};

fn candidates() -> Vec<ProposedChange> {
    vec![
        ProposedChange::new("src/lib.rs", "Wire the new module").with_lines(20),
        ProposedChange::new("src/cache.rs", "TODO: eviction").with_lines(40),
        ProposedChange::new("src/big.rs", "Rewrite parser").with_lines(900),
        ProposedChange::new("src/ffi.rs", "Cast with transmute").with_lines(10),
        ProposedChange::new("tests/cache_test.rs", "Cover eviction")
            .with_lines(30)
            .with_kind(ChangeKind::Create),
        ProposedChange::new("src/a.rs", "placeholder handler").with_lines(5),
        ProposedChange::new("src/b.rs", "Split module").with_lines(50),
        ProposedChange::new("src/c.rs", "Not implemented yet").with_lines(10),
        ProposedChange::new("Cargo.toml", "Add dependency").with_lines(1),
    ]
}

#[test]
fn empty_changeset_scores_exactly_100() {
    let gate = QualityGate::default();
    let report = gate.validate_changes(&[]);
    assert_eq!(report.score, 100.0);
    assert!(report.passed);
    assert!(report.issues.is_empty());
}

#[test]
fn adding_changes_never_raises_the_score() {
    let gate = QualityGate::default();
    let all = candidates();

    // Every prefix, and every rotation of the candidate list.
    for start in 0..all.len() {
        let rotated: Vec<ProposedChange> = all[start..].iter().chain(&all[..start]).cloned().collect();
        let mut previous = 100.0;
        for n in 0..=rotated.len() {
            let score = gate.validate_changes(&rotated[..n]).score;
            assert!(
                score <= previous + 1e-9,
                "score rose from {previous} to {score} after adding {:?}",
                rotated.get(n.saturating_sub(1)).map(|c| &c.path)
            );
            assert!((0.0..=100.0).contains(&score));
            previous = score;
        }
    }
}

#[test]
fn incomplete_marker_is_critical_and_blocks() {
    let gate = QualityGate::default();
    let report = gate.validate_changes(&[
        ProposedChange::new("src/a.rs", "TODO wire this").with_lines(5),
        ProposedChange::new("src/b.rs", "FIXME later").with_lines(5),
    ]);
    assert_eq!(report.score, 70.0);
    assert!(report.has_critical());
    assert!(report
        .issues
        .iter()
        .all(|i| i.severity == IssueSeverity::Critical));
    assert!(report.recommendations[0].starts_with("Rework the solution"));
}

#[test]
fn threshold_is_configurable() {
    let strict = QualityGate::new(QualityGateConfig {
        min_acceptable_score: 95.0,
        ..Default::default()
    });
    let change = [ProposedChange::new("src/ffi.rs", "uses transmute").with_lines(10)];
    let report = strict.validate_changes(&change);
    assert_eq!(report.score, 95.0);
    assert!(report.passed);

    let stricter = QualityGate::new(QualityGateConfig {
        min_acceptable_score: 96.0,
        ..Default::default()
    });
    assert!(!stricter.validate_changes(&change).passed);
}
