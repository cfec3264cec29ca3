use crate::{tool, CommandExt};

#[test]
fn test_default_field_is_axis_aligned() {
    let output = tool("tensor-field").captured_output();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = 0;
    for line in stdout.lines() {
        assert!(line.starts_with("LINESTRING"), "{line}");
        // A constant grid field points every major eigenvector along +x,
        // so both endpoints share their y coordinate.
        let coords: Vec<&str> = line
            .trim_start_matches("LINESTRING(")
            .trim_end_matches(')')
            .split(',')
            .collect();
        assert_eq!(coords.len(), 2, "{line}");
        let start_y = coords[0].split_whitespace().nth(1).unwrap();
        let end_y = coords[1].split_whitespace().nth(1).unwrap();
        let start_y: f64 = start_y.parse().unwrap();
        let end_y: f64 = end_y.parse().unwrap();
        assert!((start_y - end_y).abs() < 1e-9, "{line}");
        lines += 1;
    }
    assert!(lines > 0);
}

#[test]
fn test_minor_field_is_perpendicular() {
    let output = tool("tensor-field").arg("--minor").captured_output();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines().take(5) {
        let coords: Vec<&str> = line
            .trim_start_matches("LINESTRING(")
            .trim_end_matches(')')
            .split(',')
            .collect();
        let start_x: f64 = coords[0].split_whitespace().next().unwrap().parse().unwrap();
        let end_x: f64 = coords[1].split_whitespace().next().unwrap().parse().unwrap();
        assert!((start_x - end_x).abs() < 1e-9, "{line}");
    }
}
