use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tele::config::DashboardConfig;
use tele::meter::{Meter, MeterValue};
use tele::sink::dashboard::{FrameContent, FrameUpdate, Series};
use tele::sink::{DashboardSink, Sink, SinkError};
use tele::telemetry::{Snapshot, Telemetry};

fn registry() -> Telemetry {
    Telemetry::new([
        ("train_loss", Meter::average()),
        ("val_loss", Meter::average()),
        ("args", Meter::last().sticky()),
        ("samples", Meter::last()),
        ("graph", Meter::last().sticky()),
    ])
    .unwrap()
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<FrameUpdate>) -> Vec<FrameUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

#[test]
fn test_line_graph_keeps_history() {
    let mut tel = registry();
    let (sink, mut rx) = DashboardSink::detached(16);
    tel.sink(sink.line_graph(["train_loss", "val_loss"], "Loss")).unwrap();

    tel.add("train_loss", 1.0).unwrap();
    tel.step();
    tel.reset();
    tel.add("train_loss", 0.5).unwrap();
    tel.add("val_loss", 0.75).unwrap();
    tel.step();

    let updates = drain(&mut rx);
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].title, "Loss");
    assert_eq!(
        updates[1].content,
        FrameContent::LineGraph {
            series: vec![
                Series { name: "train_loss".into(), points: vec![(0, Some(1.0)), (1, Some(0.5))] },
                Series { name: "val_loss".into(), points: vec![(0, None), (1, Some(0.75))] },
            ]
        }
    );
}

#[test]
fn test_inspect_flattens_objects() {
    let mut tel = registry();
    let (sink, mut rx) = DashboardSink::detached(16);
    tel.sink(sink.inspect(["args"], "Arguments", true).inspect(["args"], "Raw", false)).unwrap();

    tel.set("args", json!({ "lr": 0.1, "model": { "base": "resnet34" } })).unwrap();
    tel.step();

    let updates = drain(&mut rx);
    assert_eq!(
        updates[0].content,
        FrameContent::Table {
            rows: vec![
                ("args.lr".to_string(), json!(0.1)),
                ("args.model.base".to_string(), json!("resnet34")),
            ]
        }
    );
    assert_eq!(
        updates[1].content,
        FrameContent::Table { rows: vec![("args".to_string(), json!({ "lr": 0.1, "model": { "base": "resnet34" } }))] }
    );
}

#[test]
fn test_images_encoded_as_png() {
    let mut tel = registry();
    let (sink, mut rx) = DashboardSink::detached(16);
    tel.sink(sink.images(["samples"], "Samples", 2)).unwrap();

    tel.set("samples", vec![image::RgbImage::new(2, 2); 3]).unwrap();
    tel.step();

    let updates = drain(&mut rx);
    match &updates[0].content {
        FrameContent::Images { per_row, count, png } => {
            assert_eq!(*per_row, 2);
            assert_eq!(*count, 3);
            assert!(png.iter().all(|bytes| bytes.starts_with(&[0x89, b'P', b'N', b'G'])));
        }
        other => panic!("unexpected content {:?}", other),
    }
}

#[test]
fn test_graphviz_passes_dot_source() {
    let mut tel = registry();
    let (sink, mut rx) = DashboardSink::detached(16);
    tel.sink(sink.graphviz(["graph"], "Model graph")).unwrap();

    tel.set("graph", "digraph { a -> b }").unwrap();
    tel.step();

    let updates = drain(&mut rx);
    assert_eq!(updates[0].content, FrameContent::Graphviz { dot: "digraph { a -> b }".into() });
}

#[test]
fn test_full_queue_drops_update() {
    let mut tel = registry();
    let (sink, mut rx) = DashboardSink::detached(1);
    tel.sink(sink.line_graph(["train_loss"], "A").line_graph(["val_loss"], "B")).unwrap();

    let report = tel.step();
    assert_eq!(report.rendered, 1);
    assert!(matches!(report.failures[0].error, SinkError::QueueFull));
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_closed_receiver() {
    let (mut sink, rx) = DashboardSink::detached(4);
    sink = sink.line_graph(["train_loss"], "Loss");
    drop(rx);

    assert!(matches!(sink.prepare(&[]), Err(SinkError::Closed)));
    let values: Snapshot = [("train_loss".to_string(), MeterValue::Scalar(1.0))].into_iter().collect();
    assert!(matches!(sink.render(0, 0, &values), Err(SinkError::Closed)));
}

#[test]
fn test_spawn_needs_runtime() {
    let result = DashboardSink::spawn(&DashboardConfig::default());
    assert!(matches!(result, Err(SinkError::NoRuntime)));
}

#[tokio::test]
async fn test_unreachable_dashboard_does_not_block() {
    let config = DashboardConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        timeout_ms: 200,
        ..DashboardConfig::default()
    };
    let (sink, handle) = DashboardSink::spawn(&config).unwrap();
    let mut tel = registry();
    tel.sink(sink.line_graph(["train_loss"], "Loss")).unwrap();

    for _ in 0..3 {
        tel.add("train_loss", 1.0).unwrap();
        assert!(tel.step().is_clean(), "Queuing must succeed even with the server down");
        tel.reset();
    }

    tokio::time::timeout(Duration::from_secs(10), handle.shutdown(Duration::from_secs(5)))
        .await
        .expect("shutdown should finish");
}

#[tokio::test]
async fn test_progress_reports_full_queue() {
    let config = DashboardConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        timeout_ms: 200,
        queue_depth: 1,
        ..DashboardConfig::default()
    };
    let (_sink, handle) = DashboardSink::spawn(&config).unwrap();

    // The worker has not been polled yet on this single-threaded runtime.
    assert!(handle.set_progress(1, 10).is_ok());
    assert!(matches!(handle.set_progress(2, 10), Err(SinkError::QueueFull)));

    handle.shutdown(Duration::from_secs(5)).await;
}

// Minimal HTTP/1.1 responder: records request lines and answers every request
// with `{"id": "<n>"}`, n being the request's position in the log.
async fn serve(listener: TcpListener, log: Arc<Mutex<Vec<String>>>) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let log = log.clone();
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                while let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..end]).to_string();
                    let len = head
                        .lines()
                        .find_map(|l| {
                            let l = l.to_ascii_lowercase();
                            l.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() < end + 4 + len {
                        break;
                    }
                    buf.drain(..end + 4 + len);

                    let n = {
                        let mut log = log.lock().unwrap();
                        log.push(head.lines().next().unwrap_or_default().to_string());
                        log.len()
                    };
                    let body = format!("{{\"id\":\"{}\"}}", n);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if stream.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        });
    }
}

#[tokio::test]
async fn test_worker_creates_notebook_and_frames_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(serve(listener, log.clone()));

    let config = DashboardConfig {
        base_url: format!("http://{}", addr),
        timeout_ms: 2000,
        ..DashboardConfig::default()
    };
    let (sink, handle) = DashboardSink::spawn(&config).unwrap();
    let mut tel = registry();
    tel.sink(sink.line_graph(["train_loss"], "Loss")).unwrap();

    for _ in 0..2 {
        tel.add("train_loss", 1.0).unwrap();
        tel.step();
        tel.reset();
    }
    handle.shutdown(Duration::from_secs(5)).await;

    let requests = log.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![
            "POST /api/notebooks HTTP/1.1",
            "POST /api/notebooks/1/frames HTTP/1.1",
            "PUT /api/frames/2 HTTP/1.1",
            "PUT /api/frames/2 HTTP/1.1",
        ]
    );
}
