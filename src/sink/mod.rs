//! Destinations that render a subset of the registry every step.
//!
//! A sink holds an ordered list of subscriptions, each pairing a key subset with a
//! view that knows how to present it. The registry reduces the subscribed meters to
//! values and calls `render` once per subscription per step.

pub mod console;
pub mod dashboard;
pub mod folder;

pub use console::{ConsoleSink, ConsoleView};
pub use dashboard::{DashboardSink, DashboardView};
pub use folder::{FolderSink, FolderView};

use std::path::PathBuf;
use thiserror::Error;

use crate::telemetry::Snapshot;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("output directory {0} already exists")]
    DirectoryExists(PathBuf),
    #[error("output directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("corrupt log {path}: {reason}")]
    CorruptLog { path: PathBuf, reason: String },
    #[error("log {path} was found corrupt earlier; refusing to append")]
    Poisoned { path: PathBuf },
    #[error("update queue is full, dropped")]
    QueueFull,
    #[error("sink worker has shut down")]
    Closed,
    #[error("no view at index {0}")]
    UnknownView(usize),
    #[error("sink used before prepare")]
    NotPrepared,
    #[error("no tokio runtime to run the sink worker on")]
    NoRuntime,
}

/// One (key subset, view) pair.
#[derive(Debug, Clone)]
pub struct Subscription<V> {
    pub keys: Vec<String>,
    pub view: V,
}

impl<V> Subscription<V> {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>, view: V) -> Self {
        Self { keys: keys.into_iter().map(Into::into).collect(), view }
    }
}

pub(crate) fn key_sets<V>(subs: &[Subscription<V>]) -> Vec<&[String]> {
    subs.iter().map(|s| s.keys.as_slice()).collect()
}

pub trait Sink: Send {
    fn name(&self) -> &str;

    /// Key subsets in view order. Index `i` here is the `view` passed to `render`.
    fn subscriptions(&self) -> Vec<&[String]>;

    /// One-time setup, called at registration after subscriptions were validated
    /// against `known_keys`.
    fn prepare(&mut self, known_keys: &[&str]) -> Result<(), SinkError>;

    /// Renders one view. Must not assume any other view of this step succeeded.
    fn render(&mut self, step: u64, view: usize, values: &Snapshot) -> Result<(), SinkError>;
}
