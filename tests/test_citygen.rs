use std::io::Write;

use pretty_assertions::assert_eq;

use crate::{tool, CommandExt};

/// A small, fast configuration so the end-to-end runs stay quick.
const TEST_CONFIG: &str = r#"{
    "seed": 7,
    "size": 400.0,
    "smooth": false,
    "randomRadialFields": 1,
    "parkAreaPercentage": 0.15,
    "minDistanceBetweenParks": 40.0,
    "coastCells": 16,
    "roadParameters": [
        {
            "name": "Main", "type": "road",
            "dsep": 80, "dtest": 40, "dstep": 2,
            "dCircleJoin": 5, "dlookahead": 120,
            "roadJoinAngle": 0.1,
            "pathIntegrationLimit": 500,
            "maxSeedTries": 100,
            "earlyCollisionProbability": 0,
            "simplificationTolerance": 0.5,
            "culDeSacProbability": 0,
            "maxStreamlines": 8
        },
        {
            "name": "Minor", "type": "road",
            "dsep": 30, "dtest": 15, "dstep": 2,
            "dCircleJoin": 5, "dlookahead": 50,
            "roadJoinAngle": 0.1,
            "pathIntegrationLimit": 500,
            "maxSeedTries": 100,
            "earlyCollisionProbability": 0.5,
            "simplificationTolerance": 0.5,
            "culDeSacProbability": 0.2,
            "culDeSacRadiusMin": 3, "culDeSacRadiusMax": 6,
            "maxStreamlines": 16
        }
    ]
}"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp config");
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_citygen_renders_svg() {
    let config = write_config(TEST_CONFIG);

    let output = tool("citygen").arg(config.path()).captured_output();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<svg"));
    // Sea background, coastline, and at least one road
    assert!(stdout.contains("<rect"));
    assert!(stdout.contains("<path"));
    assert!(stdout.contains("<polyline"));
}

#[test]
fn test_citygen_is_deterministic() {
    let config = write_config(TEST_CONFIG);

    let first = tool("citygen").arg(config.path()).captured_output();
    let second = tool("citygen").arg(config.path()).captured_output();
    assert!(first.status.success());
    assert!(second.status.success());
    assert_eq!(
        String::from_utf8_lossy(&first.stdout),
        String::from_utf8_lossy(&second.stdout)
    );
}

#[test]
fn test_citygen_rejects_missing_config() {
    let output = tool("citygen")
        .arg("/nonexistent/config.json")
        .captured_output();
    assert!(!output.status.success());
}

#[test]
fn test_citygen_rejects_invalid_step_sizes() {
    // dstep >= dsep can jump the separation constraint
    let config = write_config(
        r#"{
            "seed": 1,
            "size": 400.0,
            "roadParameters": [{
                "name": "Main", "type": "road",
                "dsep": 10, "dtest": 5, "dstep": 10
            }]
        }"#,
    );
    let output = tool("citygen").arg(config.path()).captured_output();
    assert!(!output.status.success());
}
