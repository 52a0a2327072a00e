//! Statistics recorded while models run

use super::support::TestBed;
use crate::core::config::Settings;

fn with_stats() -> TestBed {
    TestBed::with_settings(Settings::default().with_stats())
}

#[test]
fn test_stats_are_off_by_default() {
    let bed = TestBed::new();
    let mut rt = bed.runtime("|constant value=1| -> y\n").unwrap();
    rt.run().unwrap();
    assert!(rt.stats().is_none());
}

#[test]
fn test_blocks_and_edges_are_counted() {
    let bed = with_stats();
    let mut rt = bed
        .runtime("|constant value=7| -> |gain k=3| -> (out)\n")
        .unwrap();
    rt.run().unwrap();
    let report = rt.stats().unwrap();

    assert_eq!(report.block("constant").unwrap().updates, 1);
    assert_eq!(report.block("gain").unwrap().updates, 1);
    let edge = report.edge("constant:value:gain").unwrap();
    assert_eq!(edge.samples, 1);
    assert_eq!(edge.payload_bytes, Some(1));
    assert_eq!(edge.destination.as_deref(), Some("gain"));
    assert_eq!(report.edge("out").unwrap().payload_bytes, Some(2));

    let cpu: f64 = report.blocks.iter().map(|b| b.cpu_share).sum();
    assert!((cpu - 100.0).abs() < 1e-6 || cpu == 0.0, "{}", cpu);
}

#[test]
fn test_edge_intervals_follow_timestamps() {
    let bed = with_stats();
    let mut rt = bed
        .runtime("|s: sequence values=[1, 2, 3, 4] interval=0.5| -> |rec: record|\n")
        .unwrap();
    rt.run().unwrap();
    let report = rt.stats().unwrap();
    let edge = report.edge("s:value:rec").unwrap();
    assert_eq!(edge.samples, 4);
    let interval = edge.interval.unwrap();
    assert_eq!(interval.p50, 0.5);
    assert_eq!(interval.variance, 0.0);
    assert_eq!(report.block("s").unwrap().updates, 4);
}

#[test]
fn test_window_bounds_samples_not_counts() {
    let bed = TestBed::with_settings(Settings {
        stats: true,
        stats_window: 2,
        ..Settings::default()
    });
    let mut rt = bed
        .runtime("|s: sequence values=[1, 2, 3, 4, 5, 6]| -> |rec: record|\n")
        .unwrap();
    rt.run().unwrap();
    let report = rt.stats().unwrap();
    assert_eq!(report.block("rec").unwrap().updates, 6);
    assert_eq!(report.edge("s:value:rec").unwrap().samples, 6);
}

#[test]
fn test_nested_models_are_prefixed() {
    let bed = with_stats();
    bed.define(
        "--- model scale\n\
         input x\n\
         output y\n\
         (x) -> |gain k=2| -> (y)\n",
    );
    let mut rt = bed
        .runtime("|c: constant value=5| -> |s: scale| -> (out)\n")
        .unwrap();
    rt.run().unwrap();
    let report = rt.stats().unwrap();
    assert!(report.block("s").is_some());
    assert_eq!(report.block("s.gain").unwrap().updates, 1);
    assert!(report.edge("s.y").is_some());
}

#[test]
fn test_report_serializes_and_prints() {
    let bed = with_stats();
    let mut rt = bed.runtime("|constant value=1| -> |gain k=1| -> y\n").unwrap();
    rt.run().unwrap();
    let report = rt.stats().unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["blocks"].as_array().unwrap().len(), report.blocks.len());
    assert_eq!(json["edges"][0]["name"], "constant:value:gain");
    let table = report.to_string();
    assert!(table.contains("gain"));
    assert!(table.contains("constant:value:gain"));
}
