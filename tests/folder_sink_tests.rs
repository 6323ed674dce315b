use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use tele::meter::{Meter, MeterError, MeterValue};
use tele::sink::folder::read_growing;
use tele::sink::{FolderSink, Sink, SinkError};
use tele::telemetry::{Snapshot, Telemetry, TelemetryError};

fn registry() -> Telemetry {
    Telemetry::new([
        ("epoch", Meter::last()),
        ("loss", Meter::average()),
        ("preds", Meter::last()),
    ])
    .unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn snapshot(pairs: &[(&str, MeterValue)]) -> Snapshot {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn test_create_refuses_existing_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut tel = registry();

    let err = tel.sink(FolderSink::create(tmp.path()).growing_json(["loss"], "log.json")).unwrap_err();
    match err {
        TelemetryError::Sink { source: SinkError::DirectoryExists(p), .. } => assert_eq!(p, tmp.path()),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_create_makes_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("runs").join("exp-1");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).growing_json(["loss"], "log.json")).unwrap();
    assert!(run.is_dir());
}

#[test]
fn test_resume_requires_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sink = FolderSink::resume(tmp.path().join("missing"));
    assert!(matches!(sink.prepare(&[]), Err(SinkError::MissingDirectory(_))));
}

#[test]
fn test_render_before_prepare_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let mut sink = FolderSink::resume(tmp.path()).growing_json(["loss"], "log.json");
    let values = snapshot(&[("loss", MeterValue::Scalar(1.0))]);
    assert!(matches!(sink.render(0, 0, &values), Err(SinkError::NotPrepared)));
}

#[test]
fn test_growing_log_appends_in_step_order() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).growing_json(["epoch", "loss"], "saved_metrics.json")).unwrap();

    for epoch in 0..4u64 {
        tel.set("epoch", epoch).unwrap();
        tel.add("loss", epoch as f64 * 0.5).unwrap();
        assert!(tel.step().is_clean());
        tel.reset();
    }

    let log = read_json(&run.join("saved_metrics.json"));
    assert_eq!(log["epoch"], json!([0, 1, 2, 3]));
    assert_eq!(log["loss"], json!([0.0, 0.5, 1.0, 1.5]));
}

#[test]
fn test_growing_log_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let values = [1.0, 2.0, 3.0, 4.0, 5.0];

    // First process: steps 0..2
    {
        let mut tel = registry();
        tel.sink(FolderSink::create(&run).growing_json(["loss"], "log.json")).unwrap();
        for v in &values[..2] {
            tel.add("loss", *v).unwrap();
            tel.step();
            tel.reset();
        }
    }

    // Second process resumes: steps 2..5
    {
        let mut tel = registry();
        tel.sink(FolderSink::resume(&run).growing_json(["loss"], "log.json")).unwrap();
        for v in &values[2..] {
            tel.add("loss", *v).unwrap();
            tel.step();
            tel.reset();
        }
    }

    let log = read_growing(&run.join("log.json")).unwrap();
    assert_eq!(log["loss"], json!(values));
}

#[test]
fn test_growing_log_adds_new_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("log.json");
    fs::write(&path, r#"{"other":[1,2]}"#).unwrap();

    let mut sink = FolderSink::resume(tmp.path()).growing_json(["loss"], "log.json");
    sink.prepare(&[]).unwrap();
    sink.render(0, 0, &snapshot(&[("loss", MeterValue::Scalar(0.25))])).unwrap();

    let log = read_json(&path);
    assert_eq!(log["other"], json!([1, 2]), "Unrelated history is kept");
    assert_eq!(log["loss"], json!([0.25]));
}

#[test]
fn test_nan_is_persisted_as_null() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).growing_json(["loss"], "log.json")).unwrap();

    tel.step(); // no observations: NaN
    tel.add("loss", 1.0).unwrap();
    tel.step();

    assert_eq!(read_json(&run.join("log.json"))["loss"], json!([null, 1.0]));
}

#[test]
fn test_corrupt_log_poisons_view() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("log.json");
    fs::write(&path, "{not json").unwrap();

    let mut sink = FolderSink::resume(tmp.path()).growing_json(["loss"], "log.json");
    sink.prepare(&[]).unwrap();
    let values = snapshot(&[("loss", MeterValue::Scalar(1.0))]);

    assert!(matches!(sink.render(0, 0, &values), Err(SinkError::CorruptLog { .. })));

    // Even once the file is valid again the view stays stopped.
    fs::write(&path, "{}").unwrap();
    assert!(matches!(sink.render(1, 0, &values), Err(SinkError::Poisoned { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
}

#[test]
fn test_wrong_shape_is_corrupt() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("log.json");

    fs::write(&path, "[1, 2, 3]").unwrap();
    assert!(matches!(read_growing(&path), Err(SinkError::CorruptLog { .. })));

    fs::write(&path, r#"{"loss": 3}"#).unwrap();
    assert!(matches!(read_growing(&path), Err(SinkError::CorruptLog { .. })));
}

#[test]
fn test_corrupt_view_does_not_block_other_views() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(
        FolderSink::create(&run)
            .growing_json(["loss"], "log.json")
            .json_snapshot(["epoch"], "latest.json"),
    )
    .unwrap();
    fs::write(run.join("log.json"), "garbage").unwrap();

    tel.set("epoch", 7u64).unwrap();
    let report = tel.step();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].view, 0);
    assert_eq!(read_json(&run.join("latest.json")), json!({ "epoch": 7 }));
}

#[test]
fn test_snapshot_overwrites() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).json_snapshot(["preds"], "val_preds.json")).unwrap();

    tel.set("preds", MeterValue::tensor(vec![1, 2], vec![1.0, 2.0]).unwrap()).unwrap();
    tel.step();
    tel.set("preds", MeterValue::tensor(vec![1, 2], vec![3.0, 4.0]).unwrap()).unwrap();
    tel.step();

    assert_eq!(read_json(&run.join("val_preds.json")), json!({ "preds": [[3.0, 4.0]] }));
}

#[test]
fn test_snapshot_template_per_step() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).json_snapshot(["epoch"], "metrics_{step}.json")).unwrap();

    for epoch in 0..2u64 {
        tel.set("epoch", epoch).unwrap();
        tel.step();
    }

    assert_eq!(read_json(&run.join("metrics_0000.json")), json!({ "epoch": 0 }));
    assert_eq!(read_json(&run.join("metrics_0001.json")), json!({ "epoch": 1 }));
}

#[test]
fn test_images_written_as_png() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(FolderSink::create(&run).images(["preds"], "sample")).unwrap();

    tel.set("preds", vec![image::RgbImage::new(8, 8), image::RgbImage::new(4, 4)]).unwrap();
    tel.step();

    let dims = image::image_dimensions(run.join("sample_preds_0000_00.png")).unwrap();
    assert_eq!(dims, (8, 8));
    assert!(run.join("sample_preds_0000_01.png").is_file());
}

#[test]
fn test_no_temp_files_left_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(
        FolderSink::create(&run)
            .growing_json(["loss"], "log.json")
            .json_snapshot(["epoch"], "latest.json"),
    )
    .unwrap();

    for _ in 0..3 {
        tel.add("loss", 1.0).unwrap();
        tel.step();
    }

    let mut names: Vec<String> = fs::read_dir(&run)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["latest.json", "log.json"]);
}

#[test]
fn test_malformed_tensor_does_not_break_step() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");
    let mut tel = registry();
    tel.sink(
        FolderSink::create(&run)
            .json_snapshot(["preds"], "val_preds.json")
            .growing_json(["loss"], "log.json"),
    )
    .unwrap();

    let err = tel.set("preds", MeterValue::Tensor { shape: vec![3, 2], data: vec![1.0] }).unwrap_err();
    assert!(matches!(err, TelemetryError::Meter { source: MeterError::MalformedTensor { .. }, .. }));

    tel.add("loss", 1.0).unwrap();
    assert!(tel.step().is_clean());
    assert_eq!(read_json(&run.join("log.json"))["loss"], json!([1.0]));
    assert_eq!(read_json(&run.join("val_preds.json")), json!({ "preds": null }));
}

#[test]
fn test_invalid_utf8_log_poisons_view() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("log.json");
    fs::write(&path, [0xff, 0xfe, b'{']).unwrap();

    let mut sink = FolderSink::resume(tmp.path()).growing_json(["loss"], "log.json");
    sink.prepare(&[]).unwrap();
    let values = snapshot(&[("loss", MeterValue::Scalar(1.0))]);

    assert!(matches!(sink.render(0, 0, &values), Err(SinkError::CorruptLog { .. })));
    fs::write(&path, "{}").unwrap();
    assert!(matches!(sink.render(1, 0, &values), Err(SinkError::Poisoned { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
}

#[test]
fn test_racing_creates_have_one_winner() {
    let tmp = tempfile::tempdir().unwrap();
    let run = tmp.path().join("run");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let run = run.clone();
            std::thread::spawn(move || FolderSink::create(run).prepare(&[]))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SinkError::DirectoryExists(_))));
}
