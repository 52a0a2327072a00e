//! Assembly through the whole front end: policies, imports and error reporting

use std::fs;

use serde_json::json;
use tempfile::TempDir;

use super::support::{error_text, TestBed};
use crate::core::config::{ConfigMap, Settings};
use crate::core::signal::Timestamp;
use crate::error::Error;
use crate::runtime::Loader;

fn config(pairs: &[(&str, serde_json::Value)]) -> ConfigMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_recursive_model_is_rejected() {
    let bed = TestBed::new();
    let err = bed.runtime("--- model m\n|m|\n").err().unwrap();
    assert!(err.is_user_error());
    assert!(err.to_string().contains("recursive instantiation of model \"m\""), "{}", err);
}

#[test]
fn test_unused_config_strict_and_lenient() {
    let source = "config k\n|a: constant value=1| -> y\n";
    let passed = config(&[("k", json!(1))]);

    let strict = TestBed::new();
    let text = error_text(strict.runtime_with(source, &passed));
    assert!(text.contains("never read: k"), "{}", text);

    let lenient = TestBed::with_settings(Settings::default().lenient());
    assert!(lenient.runtime_with(source, &passed).is_ok());
}

#[test]
fn test_unknown_model_config() {
    let source = "|a: constant value=1| -> y\n";
    let passed = config(&[("zz", json!(1))]);

    let text = error_text(TestBed::new().runtime_with(source, &passed));
    assert!(text.contains("unknown config \"zz\""), "{}", text);

    let lenient = TestBed::with_settings(Settings::default().lenient());
    assert!(lenient.runtime_with(source, &passed).is_ok());
}

#[test]
fn test_lenient_mode_does_not_forgive_unknown_blocks() {
    let lenient = TestBed::with_settings(Settings::default().lenient());
    let text = error_text(lenient.runtime("zz.k = 1\n|a: constant value=1| -> y\n"));
    assert!(text.contains("unknown block \"zz\""), "{}", text);
}

#[test]
fn test_missing_required_config() {
    let text = error_text(TestBed::new().runtime("config k\n|a: constant value=$k| -> y\n"));
    assert!(text.contains("requires config \"k\""), "{}", text);
}

#[test]
fn test_model_config_defaults_and_overrides() {
    let bed = TestBed::new();
    let source = "config k = 2\n|a: constant value=$k| -> y\n";

    let mut rt = bed.runtime(source).unwrap();
    rt.run().unwrap();
    assert_eq!(rt.model().signal("y").unwrap().value, json!(2));

    let mut rt = bed.runtime_with(source, &config(&[("k", json!(9))])).unwrap();
    rt.run().unwrap();
    assert_eq!(rt.model().signal("y").unwrap().value, json!(9));
}

#[test]
fn test_variable_input_bounds() {
    let bed = TestBed::new();
    let text = error_text(bed.runtime("|c: constant value=1| -> a\na -> |m: merge| -> x\n"));
    assert!(text.contains("expects between 2 and 4 input signals, got 1"), "{}", text);
}

#[test]
fn test_strict_io_requires_declarations() {
    let source = "(x) -> |gain k=1| -> (y)\n";
    let strict = TestBed::with_settings(Settings {
        strict_io: true,
        ..Settings::default()
    });
    let text = error_text(strict.runtime(source));
    assert!(text.contains("port (x) is used without `input x`"), "{}", text);

    let rt = TestBed::new().runtime(source).unwrap();
    assert_eq!(rt.model().input_names(), &["x".to_string()]);
    assert_eq!(rt.model().output_names(), &["y".to_string()]);
}

#[test]
fn test_output_port_fed_twice() {
    let text = error_text(TestBed::new().runtime(
        "output y\n\
         |a: constant value=1| -> (y)\n\
         |b: constant value=2| -> (y)\n",
    ));
    assert!(text.contains("output port (y) is fed more than once"), "{}", text);
}

#[test]
fn test_input_port_may_fan_out() {
    let rt = TestBed::new()
        .runtime(
            "input x\n\
             (x) -> |a: gain k=1| -> u\n\
             (x) -> |b: gain k=2| -> v\n",
        )
        .unwrap();
    let stubs = rt
        .model()
        .nodes()
        .iter()
        .filter(|n| n.kind.is_port())
        .count();
    assert_eq!(stubs, 1);
}

#[test]
fn test_syntax_errors_pass_through() {
    let err = TestBed::new().runtime("|a: constant value=1 -> y\n").err().unwrap();
    assert!(matches!(err, Error::Syntax(_)));
    assert!(err.is_user_error());
}

#[test]
fn test_unknown_variable() {
    let text = error_text(TestBed::new().runtime("|c: constant value=$surely_not_defined| -> y\n"));
    assert!(text.contains("unknown variable $surely_not_defined"), "{}", text);
}

#[test]
fn test_environment_is_consulted_after_assignments() {
    std::env::set_var("PROCFLOW_TEST_SHADOWED", "from-env");
    std::env::set_var("PROCFLOW_TEST_ONLY_ENV", "env-value");
    let bed = TestBed::new();
    let mut rt = bed
        .runtime(
            "PROCFLOW_TEST_SHADOWED = \"from-model\"\n\
             |a: constant value=$PROCFLOW_TEST_SHADOWED| -> x\n\
             |b: constant value=$PROCFLOW_TEST_ONLY_ENV| -> y\n",
        )
        .unwrap();
    rt.run().unwrap();
    assert_eq!(rt.model().signal("x").unwrap().value, json!("from-model"));
    assert_eq!(rt.model().signal("y").unwrap().value, json!("env-value"));
}

#[test]
fn test_unknown_package() {
    let bed = TestBed::new();
    bed.isolate();
    let text = error_text(bed.runtime("import nowhere\n|a: constant value=1| -> y\n"));
    assert!(text.contains("cannot import package \"nowhere\""), "{}", text);
}

#[test]
fn test_import_model_file_from_search_path() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("tools.pg"),
        "--- model triple\ninput x\noutput y\n(x) -> |gain k=3| -> (y)\n",
    )
    .unwrap();

    let bed = TestBed::new();
    bed.registry
        .set_loader(Loader::new(vec![dir.path().to_path_buf()], false));
    let mut rt = bed
        .runtime("import tools\n|c: constant value=2| -> |triple| -> (out)\n")
        .unwrap();
    rt.run().unwrap();
    assert_eq!(rt.output("out").unwrap().value, json!(6));
}

#[test]
fn test_errors_carry_locations() {
    match TestBed::new().runtime("\n\n|g: gain k=1|\n").err().unwrap() {
        Error::Semantic(e) => assert_eq!(e.location.map(|l| l.line), Some(3)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_user_blocks_may_reuse_port_like_names() {
    let mut rt = TestBed::new()
        .runtime(
            "(x) -> |g: gain k=2| -> (y)\n\
             |input_x: constant value=1| -> z\n\
             |output_y: constant value=2| -> w\n",
        )
        .unwrap();
    let model = rt.model();
    assert!(model.node("input_x").is_some());
    assert!(!model.node("input_x").unwrap().kind.is_port());
    assert!(model.node("in(x)").unwrap().kind.is_port());
    assert!(model.node("out(y)").unwrap().kind.is_port());

    rt.init().unwrap();
    rt.from_outside_set_input("x", 4, Timestamp::new(1.0)).unwrap();
    while rt.has_more().unwrap() {
        rt.update().unwrap();
    }
    assert_eq!(rt.output("y").unwrap().value, json!(8));
    assert_eq!(rt.model().signal("z").unwrap().value, json!(1));
}
