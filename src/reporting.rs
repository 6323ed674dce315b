//! Standard key schema and sink wiring for pose-estimation training runs.

use std::path::PathBuf;
use tracing::info;

use crate::config::ReportingConfig;
use crate::meter::Meter;
use crate::sink::dashboard::DashboardHandle;
use crate::sink::{ConsoleSink, DashboardSink, FolderSink};
use crate::telemetry::{Telemetry, TelemetryError};

/// Per-batch timing breakdown of a training pass, in the order it happens.
pub const TRAIN_TIMINGS: [&str; 7] = [
    "train_data_load_time",
    "train_data_transfer_time",
    "train_forward_time",
    "train_criterion_time",
    "train_backward_time",
    "train_optim_time",
    "train_eval_time",
];

pub const GROWING_LOG: &str = "saved_metrics.json";

pub fn pose_schema() -> Vec<(String, Meter)> {
    let mut schema: Vec<(&str, Meter)> = vec![
        ("experiment_id", Meter::last().sticky()),
        ("epoch", Meter::last()),
        ("train_loss", Meter::average()),
        ("val_loss", Meter::average()),
        ("epoch_time", Meter::time()),
    ];
    schema.extend(TRAIN_TIMINGS.iter().map(|&k| (k, Meter::average())));
    schema.extend([
        ("train_sample", Meter::last()),
        ("val_sample", Meter::last()),
        ("train_heatmaps", Meter::last()),
        ("val_heatmaps", Meter::last()),
        ("args", Meter::last().sticky()),
        ("train_pckh_all", Meter::average()),
        ("val_pckh_all", Meter::average()),
        ("val_preds", Meter::last()),
        ("best_val_preds", Meter::last().sticky()),
        ("model_graph", Meter::last().sticky()),
    ]);
    schema.into_iter().map(|(k, m)| (k.to_string(), m)).collect()
}

/// Registry plus the handles a driver needs once sinks are registered.
pub struct Reporting {
    pub telemetry: Telemetry,
    pub run_dir: Option<PathBuf>,
    pub dashboard: Option<DashboardHandle>,
}

impl Reporting {
    /// Builds the registry and registers every sink enabled in `config`. The run
    /// directory is `<out_dir>/<experiment_id>`.
    pub fn new(config: &ReportingConfig, experiment_id: &str) -> Result<Self, TelemetryError> {
        let mut telemetry = Telemetry::new(pose_schema())?;
        telemetry.set("experiment_id", experiment_id)?;

        if config.console {
            telemetry.sink(console_sink())?;
        }

        let run_dir = config.out_dir.as_ref().map(|dir| dir.join(experiment_id));
        if let Some(dir) = &run_dir {
            telemetry.sink(folder_sink(FolderSink::create(dir.clone())))?;
        }

        let dashboard = match &config.dashboard {
            Some(dashboard_config) => {
                let (sink, handle) = DashboardSink::spawn(dashboard_config).map_err(|source| {
                    TelemetryError::Sink { sink: "dashboard".to_string(), source }
                })?;
                telemetry.sink(dashboard_sink(sink))?;
                Some(handle)
            }
            None => None,
        };

        info!("Reporting ready for experiment {}", experiment_id);
        Ok(Self { telemetry, run_dir, dashboard })
    }
}

pub fn console_sink() -> ConsoleSink {
    ["train_loss", "val_loss", "train_pckh_all", "val_pckh_all", "epoch_time"]
        .into_iter()
        .fold(ConsoleSink::stdout(), |sink, key| sink.key_value([key]))
}

/// Applies the standard folder views to `sink`, either fresh or resumed.
pub fn folder_sink(sink: FolderSink) -> FolderSink {
    sink.growing_json(
        ["epoch", "train_loss", "val_loss", "epoch_time", "train_pckh_all", "val_pckh_all"],
        GROWING_LOG,
    )
    .json_snapshot(["val_preds"], "val_preds.json")
    .json_snapshot(["best_val_preds"], "val_preds-best.json")
    .images(["train_sample", "val_sample"], "sample")
}

pub fn dashboard_sink(sink: DashboardSink) -> DashboardSink {
    sink.line_graph(["train_loss", "val_loss"], "Loss")
        .line_graph(["train_pckh_all", "val_pckh_all"], "PCKh all")
        .inspect(
            ["experiment_id", "epoch", "train_loss", "val_loss", "train_pckh_all", "val_pckh_all"],
            "Inspect",
            false,
        )
        .line_graph(["epoch_time"], "Time")
        .inspect(["args"], "Command-line arguments", true)
        .images(["train_sample"], "Training samples", 2)
        .images(["val_sample"], "Validation samples", 2)
        .graphviz(["model_graph"], "Model graph")
        .line_graph(TRAIN_TIMINGS, "Training time breakdown")
        .images(["train_heatmaps"], "Training wrist heatmaps", 2)
        .images(["val_heatmaps"], "Validation wrist heatmaps", 2)
}
