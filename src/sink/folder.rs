use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Sink, SinkError, Subscription};
use crate::meter::MeterValue;
use crate::telemetry::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderView {
    /// Appends each subscribed value to a per-key JSON array in `file`.
    GrowingJson { file: String },
    /// Overwrites `file_template` every step. A `{step}` placeholder expands to the
    /// zero-padded step number, giving one file per step instead.
    JsonSnapshot { file_template: String },
    /// Writes every image of an `Images` payload as `<prefix>_<key>_<step>_<i>.png`.
    Images { prefix: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Create,
    Resume,
}

#[derive(Debug)]
struct FolderSubscription {
    sub: Subscription<FolderView>,
    poisoned: bool,
}

/// Persists metrics under a run directory.
#[derive(Debug)]
pub struct FolderSink {
    dir: PathBuf,
    mode: OpenMode,
    prepared: bool,
    views: Vec<FolderSubscription>,
}

impl FolderSink {
    /// A fresh run directory. `prepare` fails if it already exists, so an
    /// earlier run with the same identifier is never overwritten.
    pub fn create(dir: impl Into<PathBuf>) -> Self {
        Self::with_mode(dir.into(), OpenMode::Create)
    }

    /// Continues writing into the directory of an interrupted run.
    pub fn resume(dir: impl Into<PathBuf>) -> Self {
        Self::with_mode(dir.into(), OpenMode::Resume)
    }

    fn with_mode(dir: PathBuf, mode: OpenMode) -> Self {
        Self { dir, mode, prepared: false, views: Vec::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn view<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>, view: FolderView) -> Self {
        self.views.push(FolderSubscription { sub: Subscription::new(keys, view), poisoned: false });
        self
    }

    pub fn growing_json<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, file: &str) -> Self {
        self.view(keys, FolderView::GrowingJson { file: file.to_string() })
    }

    pub fn json_snapshot<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, file_template: &str) -> Self {
        self.view(keys, FolderView::JsonSnapshot { file_template: file_template.to_string() })
    }

    pub fn images<K: Into<String>>(self, keys: impl IntoIterator<Item = K>, prefix: &str) -> Self {
        self.view(keys, FolderView::Images { prefix: prefix.to_string() })
    }
}

impl Sink for FolderSink {
    fn name(&self) -> &str {
        "folder"
    }

    fn subscriptions(&self) -> Vec<&[String]> {
        self.views.iter().map(|v| v.sub.keys.as_slice()).collect()
    }

    fn prepare(&mut self, _known_keys: &[&str]) -> Result<(), SinkError> {
        match self.mode {
            OpenMode::Create => {
                if let Some(parent) = self.dir.parent() {
                    fs::create_dir_all(parent)?;
                }
                // A single create_dir so two runs racing on one id cannot both win.
                match fs::create_dir(&self.dir) {
                    Ok(()) => info!("Created output directory {}", self.dir.display()),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        return Err(SinkError::DirectoryExists(self.dir.clone()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            OpenMode::Resume => {
                if !self.dir.is_dir() {
                    return Err(SinkError::MissingDirectory(self.dir.clone()));
                }
                info!("Resuming output directory {}", self.dir.display());
            }
        }
        self.prepared = true;
        Ok(())
    }

    fn render(&mut self, step: u64, view: usize, values: &Snapshot) -> Result<(), SinkError> {
        if !self.prepared {
            return Err(SinkError::NotPrepared);
        }
        let dir = self.dir.clone();
        let entry = self.views.get_mut(view).ok_or(SinkError::UnknownView(view))?;

        match &entry.sub.view {
            FolderView::GrowingJson { file } => {
                let path = dir.join(file);
                if entry.poisoned {
                    return Err(SinkError::Poisoned { path });
                }
                let result = append_growing(&path, &entry.sub.keys, values);
                if let Err(SinkError::CorruptLog { .. }) = &result {
                    warn!("Growing log {} is corrupt; no further appends", path.display());
                    entry.poisoned = true;
                }
                result
            }
            FolderView::JsonSnapshot { file_template } => {
                let path = dir.join(expand_template(file_template, step));
                let body = serde_json::to_vec(&Value::Object(values.to_json()))?;
                write_atomic(&path, &body)
            }
            FolderView::Images { prefix } => {
                for (key, value) in values.iter() {
                    if let MeterValue::Images(images) = value {
                        for (i, img) in images.iter().enumerate() {
                            let name = format!("{}_{}_{:04}_{:02}.png", prefix, key, step, i);
                            img.save(dir.join(name))?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Read-modify-write of a growing log.
///
/// The file on disk is the only source of truth, so a restarted process picks up
/// exactly where the previous one stopped.
pub fn append_growing(path: &Path, keys: &[String], values: &Snapshot) -> Result<(), SinkError> {
    let mut log = if path.is_file() {
        read_growing(path)?
    } else {
        Map::new()
    };

    for key in keys {
        let value = values.get(key).map(MeterValue::to_json).unwrap_or(Value::Null);
        match log.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(series) => series.push(value),
            _ => {
                return Err(SinkError::CorruptLog {
                    path: path.to_path_buf(),
                    reason: format!("entry '{}' is not an array", key),
                })
            }
        }
    }

    let body = serde_json::to_vec(&Value::Object(log))?;
    write_atomic(path, &body)
}

/// Parses a growing log, rejecting anything but an object of arrays.
pub fn read_growing(path: &Path) -> Result<Map<String, Value>, SinkError> {
    let content = fs::read(path)?;
    let corrupt = |reason: String| SinkError::CorruptLog { path: path.to_path_buf(), reason };

    // Bad UTF-8 is a parse failure like any other.
    let parsed: Value = serde_json::from_slice(&content).map_err(|e| corrupt(e.to_string()))?;
    let Value::Object(map) = parsed else {
        return Err(corrupt("top level is not an object".to_string()));
    };
    if let Some((key, _)) = map.iter().find(|(_, v)| !v.is_array()) {
        return Err(corrupt(format!("entry '{}' is not an array", key)));
    }
    Ok(map)
}

/// Writes to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, body: &[u8]) -> Result<(), SinkError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    fs::write(&tmp, body)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn expand_template(template: &str, step: u64) -> String {
    template.replace("{step}", &format!("{:04}", step))
}
