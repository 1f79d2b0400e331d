use serde_json::json;

use roi_gate::roi::{flatten_points, RoiPayloadParser, RoiPoint, RoiStatus, RoiSyncCoordinator};

fn points(raw: &[(f64, f64)]) -> Vec<RoiPoint> {
    raw.iter().map(|&(x, y)| RoiPoint::new(x, y)).collect()
}

#[test]
fn mqtt_attribute_notification_with_flat_polygon() {
    let parser = RoiPayloadParser::default();
    let payload = br#"{"statistic_config": [0.1, 0.1, 0.9, 0.1, 0.9, 0.9, 0.1, 0.9]}"#;

    let parsed = parser.parse_bytes(payload).expect("json payload");

    assert!(parsed.found_key);
    let found = parsed.points.expect("polygon");
    assert_eq!(
        flatten_points(&found),
        vec![0.1, 0.1, 0.9, 0.1, 0.9, 0.9, 0.1, 0.9]
    );
}

#[test]
fn attribute_response_wraps_polygon_under_shared() {
    let parser = RoiPayloadParser::default();
    let payload = json!({
        "shared": {
            "statistic_config": {"zones": [{"name": "door", "points": [[10, 20], [200, 20], [200, 180]]}]}
        }
    });

    let parsed = parser.parse(&payload);

    assert!(parsed.found_key);
    assert_eq!(
        parsed.points,
        Some(points(&[(10.0, 20.0), (200.0, 20.0), (200.0, 180.0)]))
    );
}

#[test]
fn history_of_snapshots_yields_newest_valid_entry() {
    let parser = RoiPayloadParser::default();
    let payload = json!({
        "statistic_config": [
            [1, 1, 5, 1, 5, 5],
            [2, 2, 6, 2, 6, 6],
            [7, 7, 8]
        ]
    });

    let parsed = parser.parse(&payload);

    assert_eq!(
        parsed.points,
        Some(points(&[(2.0, 2.0), (6.0, 2.0), (6.0, 6.0)]))
    );
}

#[test]
fn non_json_bytes_are_a_parse_error() {
    let parser = RoiPayloadParser::default();
    assert!(parser.parse_bytes(b"\x00\xffnot json").is_err());
}

#[test]
fn cleared_roi_points_mark_coordinator_missing() {
    let parser = RoiPayloadParser::default();
    let coordinator = RoiSyncCoordinator::new();

    let ready = parser.parse(&json!({"roi_points": [[0, 0], [50, 0], [50, 50]]}));
    coordinator.update(ready.points);
    assert_eq!(coordinator.status(), RoiStatus::Ready(3));

    let cleared = parser.parse(&json!({"roi_points": []}));
    assert!(cleared.found_key);
    assert!(cleared.points.is_none());
    coordinator.update(cleared.points);

    assert_eq!(coordinator.status(), RoiStatus::Missing);
    let snapshot = coordinator.snapshot();
    assert!(snapshot.points.is_none());
    assert!(snapshot.force_reset);
    assert_eq!(snapshot.version, 2);
}

#[test]
fn unrelated_attribute_update_says_nothing_about_roi() {
    let parser = RoiPayloadParser::default();
    let parsed = parser.parse(&json!({"firmware_version": "1.4.2", "interval": 30}));
    assert!(!parsed.found_key);
    assert!(parsed.points.is_none());
}
