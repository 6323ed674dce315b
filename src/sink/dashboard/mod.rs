//! Remote dashboard output.
//!
//! Rendering happens on the driver thread and only produces [`FrameUpdate`]s. The
//! network side runs on a separate tokio task behind a bounded queue, so a slow or
//! unreachable dashboard costs at most a dropped update, never a blocked step.

pub mod client;

use image::codecs::png::PngEncoder;
use image::{ColorType, RgbImage};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::client::DashboardClient;
use super::{Sink, SinkError, Subscription};
use crate::config::DashboardConfig;
use crate::meter::MeterValue;
use crate::telemetry::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardView {
    /// One series per key, x = step.
    LineGraph { title: String },
    /// Key/value table. With `flatten`, JSON objects expand into dotted keys.
    Inspect { title: String, flatten: bool },
    Images { title: String, per_row: usize },
    /// Text payloads interpreted as Graphviz DOT source.
    Graphviz { title: String },
}

impl DashboardView {
    pub fn title(&self) -> &str {
        match self {
            DashboardView::LineGraph { title }
            | DashboardView::Inspect { title, .. }
            | DashboardView::Images { title, .. }
            | DashboardView::Graphviz { title } => title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<(u64, Option<f64>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameContent {
    LineGraph { series: Vec<Series> },
    Table { rows: Vec<(String, Value)> },
    Images {
        per_row: usize,
        count: usize,
        #[serde(skip)]
        png: Vec<Vec<u8>>,
    },
    Graphviz { dot: String },
    Progress { done: u64, total: u64 },
}

/// A single frame refresh queued for the network worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    pub title: String,
    pub content: FrameContent,
}

#[derive(Debug)]
struct DashboardSubscription {
    sub: Subscription<DashboardView>,
    // Parallel to `sub.keys`; only filled for line graphs.
    history: Vec<Vec<(u64, Option<f64>)>>,
}

pub struct DashboardSink {
    tx: mpsc::Sender<FrameUpdate>,
    views: Vec<DashboardSubscription>,
}

/// Controls the background worker once the sink itself is owned by the registry.
pub struct DashboardHandle {
    tx: mpsc::Sender<FrameUpdate>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl DashboardSink {
    /// Starts the network worker on the current tokio runtime.
    pub fn spawn(config: &DashboardConfig) -> Result<(Self, DashboardHandle), SinkError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let cancel = CancellationToken::new();

        let client = DashboardClient::new(&config.base_url, Duration::from_millis(config.timeout_ms));
        let worker = runtime.spawn(run_worker(
            client,
            config.notebook_title.clone(),
            config.tags.clone(),
            rx,
            cancel.clone(),
        ));
        info!("Dashboard worker started for {}", config.base_url);

        let handle = DashboardHandle { tx: tx.clone(), cancel, worker: Some(worker) };
        Ok((Self::from_sender(tx), handle))
    }

    /// A sink whose updates go to the returned receiver instead of the network.
    pub fn detached(queue_depth: usize) -> (Self, mpsc::Receiver<FrameUpdate>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (Self::from_sender(tx), rx)
    }

    fn from_sender(tx: mpsc::Sender<FrameUpdate>) -> Self {
        Self { tx, views: Vec::new() }
    }

    pub fn view<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>, view: DashboardView) -> Self {
        let sub = Subscription::new(keys, view);
        let history = vec![Vec::new(); sub.keys.len()];
        self.views.push(DashboardSubscription { sub, history });
        self
    }

    pub fn line_graph<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, title: &str) -> Self {
        self.view(keys, DashboardView::LineGraph { title: title.to_string() })
    }

    pub fn inspect<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, title: &str, flatten: bool) -> Self {
        self.view(keys, DashboardView::Inspect { title: title.to_string(), flatten })
    }

    pub fn images<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, title: &str, per_row: usize) -> Self {
        self.view(keys, DashboardView::Images { title: title.to_string(), per_row })
    }

    pub fn graphviz<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, title: &str) -> Self {
        self.view(keys, DashboardView::Graphviz { title: title.to_string() })
    }
}

impl Sink for DashboardSink {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn subscriptions(&self) -> Vec<&[String]> {
        self.views.iter().map(|v| v.sub.keys.as_slice()).collect()
    }

    fn prepare(&mut self, _known_keys: &[&str]) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    fn render(&mut self, step: u64, view: usize, values: &Snapshot) -> Result<(), SinkError> {
        let entry = self.views.get_mut(view).ok_or(SinkError::UnknownView(view))?;

        let content = match &entry.sub.view {
            DashboardView::LineGraph { .. } => {
                for (key, points) in entry.sub.keys.iter().zip(entry.history.iter_mut()) {
                    let y = values.get(key).and_then(MeterValue::as_f64).filter(|v| v.is_finite());
                    points.push((step, y));
                }
                FrameContent::LineGraph {
                    series: entry
                        .sub
                        .keys
                        .iter()
                        .zip(entry.history.iter())
                        .map(|(name, points)| Series { name: name.clone(), points: points.clone() })
                        .collect(),
                }
            }
            DashboardView::Inspect { flatten, .. } => {
                let mut rows = Vec::new();
                for (key, value) in values.iter() {
                    let json = value.to_json();
                    if *flatten {
                        flatten_into(key, &json, &mut rows);
                    } else {
                        rows.push((key.to_string(), json));
                    }
                }
                FrameContent::Table { rows }
            }
            DashboardView::Images { per_row, .. } => {
                let mut png = Vec::new();
                for (_, value) in values.iter() {
                    if let MeterValue::Images(images) = value {
                        for img in images {
                            png.push(encode_png(img)?);
                        }
                    }
                }
                FrameContent::Images { per_row: *per_row, count: png.len(), png }
            }
            DashboardView::Graphviz { .. } => {
                let dot = values
                    .iter()
                    .filter_map(|(_, v)| match v {
                        MeterValue::Text(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                FrameContent::Graphviz { dot }
            }
        };

        let update = FrameUpdate { title: entry.sub.view.title().to_string(), content };
        enqueue(&self.tx, update)
    }
}

impl DashboardHandle {
    pub fn set_progress(&self, done: u64, total: u64) -> Result<(), SinkError> {
        enqueue(
            &self.tx,
            FrameUpdate { title: "Progress".to_string(), content: FrameContent::Progress { done, total } },
        )
    }

    /// Stops the worker after it has pushed whatever is still queued, waiting at most `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(grace, worker).await.is_err() {
                warn!("Dashboard worker did not drain within {:?}", grace);
            }
        }
    }
}

fn enqueue(tx: &mpsc::Sender<FrameUpdate>, update: FrameUpdate) -> Result<(), SinkError> {
    tx.try_send(update).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
    })
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, SinkError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)?;
    Ok(buf)
}

fn flatten_into(prefix: &str, value: &Value, rows: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(&format!("{}.{}", prefix, k), v, rows);
            }
        }
        other => rows.push((prefix.to_string(), other.clone())),
    }
}

async fn run_worker(
    client: DashboardClient,
    title: String,
    tags: Vec<String>,
    mut rx: mpsc::Receiver<FrameUpdate>,
    cancel: CancellationToken,
) {
    let mut publisher = Publisher { client, title, tags, notebook: None, frames: HashMap::new() };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = rx.recv() => match update {
                Some(update) => publisher.publish(update).await,
                None => return,
            },
        }
    }

    // Drain what the driver already queued before going away.
    rx.close();
    while let Some(update) = rx.recv().await {
        publisher.publish(update).await;
    }
    info!("Dashboard worker stopped");
}

struct Publisher {
    client: DashboardClient,
    title: String,
    tags: Vec<String>,
    notebook: Option<String>,
    frames: HashMap<String, String>,
}

impl Publisher {
    async fn publish(&mut self, update: FrameUpdate) {
        if let Err(e) = self.try_publish(&update).await {
            warn!("Dashboard update for '{}' dropped: {}", update.title, e);
        }
    }

    async fn try_publish(&mut self, update: &FrameUpdate) -> anyhow::Result<()> {
        let notebook = match &self.notebook {
            Some(id) => id.clone(),
            None => {
                let id = self.client.create_notebook(&self.title, &self.tags).await?;
                info!("Dashboard notebook {} created", id);
                self.notebook = Some(id.clone());
                id
            }
        };

        let frame = match self.frames.get(&update.title) {
            Some(id) => id.clone(),
            None => {
                let id = self.client.create_frame(&notebook, &update.title).await?;
                self.frames.insert(update.title.clone(), id.clone());
                id
            }
        };

        self.client.put_content(&frame, &update.content).await?;
        debug!("Dashboard frame '{}' updated", update.title);
        Ok(())
    }
}

