use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use tele::config::ReportingConfig;
use tele::eval::{Affine2, JOINT_NAMES};
use tele::meter::{MaxMeter, MeterValue, TimedExt};
use tele::reporting::Reporting;
use tele::PckhEvaluator;

const EPOCHS: u64 = 5;
const BATCHES: usize = 8;
const BATCH_SIZE: usize = 4;
const INPUT_SIZE: f64 = 256.0;
const HEAD_LENGTH: f64 = 24.0;
const LEARNING_RATE: f64 = 1e-3;

// Stand-in for the data loader and model: targets are fixed per sample and
// predictions converge towards them as epochs pass.
struct Batch {
    preds: Vec<Vec<[f64; 2]>>,
    targets: Vec<Vec<[f64; 2]>>,
    mask: Vec<Vec<bool>>,
    head_lengths: Vec<f64>,
    transforms: Vec<Affine2>,
}

fn synthetic_batch(epoch: u64, index: usize, offset: usize) -> Batch {
    let noise = 0.4 / (epoch as f64 + 1.0);
    let mut batch = Batch {
        preds: Vec::new(),
        targets: Vec::new(),
        mask: Vec::new(),
        head_lengths: Vec::new(),
        transforms: Vec::new(),
    };

    for s in 0..BATCH_SIZE {
        let g = (offset + index * BATCH_SIZE + s) as f64;
        let mut targets = Vec::new();
        let mut preds = Vec::new();
        let mut mask = Vec::new();
        for j in 0..JOINT_NAMES.len() {
            let jf = j as f64;
            let t = [(g * 0.37 + jf).sin() * 0.8, (g * 0.53 + jf * 0.7).cos() * 0.8];
            let p = [t[0] + noise * (g * jf + 1.0).sin(), t[1] + noise * (g + jf * 3.0).cos()];
            targets.push(t);
            preds.push(p);
            mask.push((offset + index * BATCH_SIZE + s + j) % 5 != 0);
        }
        batch.targets.push(targets);
        batch.preds.push(preds);
        batch.mask.push(mask);
        batch.head_lengths.push(HEAD_LENGTH);
        let half = INPUT_SIZE / 2.0;
        batch.transforms.push(Affine2::scale_translate(half, half, half));
    }
    batch
}

fn masked_loss(batch: &Batch) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for ((p_row, t_row), m_row) in batch.preds.iter().zip(&batch.targets).zip(&batch.mask) {
        for ((p, t), &m) in p_row.iter().zip(t_row).zip(m_row) {
            if m {
                sum += (p[0] - t[0]).powi(2) + (p[1] - t[1]).powi(2);
                n += 1;
            }
        }
    }
    if n == 0 {
        return 0.0;
    }
    sum / n as f64
}

/// Mean per-coordinate residual over the batch, standing in for gradients.
fn residuals(batch: &Batch) -> Vec<f64> {
    let mut out = vec![0.0; JOINT_NAMES.len() * 2];
    for (p_row, t_row) in batch.preds.iter().zip(&batch.targets) {
        for (j, (p, t)) in p_row.iter().zip(t_row).enumerate() {
            out[2 * j] += (p[0] - t[0]) / BATCH_SIZE as f64;
            out[2 * j + 1] += (p[1] - t[1]) / BATCH_SIZE as f64;
        }
    }
    out
}

fn draw_sample(batch: &Batch, sample: usize) -> RgbImage {
    let size = 64u32;
    let mut img = RgbImage::new(size, size);
    let to_px = |v: f64| (((v + 1.0) * size as f64 / 2.0) as u32).min(size - 1);
    for ((p, t), &m) in batch.preds[sample].iter().zip(&batch.targets[sample]).zip(&batch.mask[sample]) {
        if !m {
            continue;
        }
        img.put_pixel(to_px(t[0]), to_px(t[1]), Rgb([0, 255, 0]));
        img.put_pixel(to_px(p[0]), to_px(p[1]), Rgb([255, 0, 0]));
    }
    img
}

fn wrist_heatmap(batch: &Batch, sample: usize) -> RgbImage {
    let size = 32u32;
    let rwrist = JOINT_NAMES.iter().position(|&j| j == "rwrist").unwrap_or(0);
    let lwrist = JOINT_NAMES.iter().position(|&j| j == "lwrist").unwrap_or(0);
    let [rx, ry] = batch.preds[sample][rwrist];
    let [lx, ly] = batch.preds[sample][lwrist];
    RgbImage::from_fn(size, size, |x, y| {
        let u = x as f64 / size as f64 * 2.0 - 1.0;
        let v = y as f64 / size as f64 * 2.0 - 1.0;
        let heat = |cx: f64, cy: f64| {
            let d2 = (u - cx).powi(2) + (v - cy).powi(2);
            ((-d2 * 20.0).exp() * 255.0) as u8
        };
        Rgb([heat(rx, ry), 0, heat(lx, ly)])
    })
}

fn experiment_id() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", secs, &suffix[..8])
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 2. Reporting
    let config = ReportingConfig::from_env()?;
    let experiment_id = experiment_id();
    tracing::info!("Experiment ID: {}", experiment_id);

    let mut reporting = Reporting::new(&config, &experiment_id)?;
    let tel = &mut reporting.telemetry;
    tel.set("args", serde_json::to_value(&config)?)?;
    tel.set(
        "model_graph",
        "digraph model { input -> backbone -> heatmaps -> coords; }",
    )?;

    let mut train_eval = PckhEvaluator::new();
    let mut val_eval = PckhEvaluator::new();
    let mut best_val_acc = MaxMeter::sticky();
    let mut weights = vec![0.0; JOINT_NAMES.len() * 2];
    let total_batches = EPOCHS * BATCHES as u64;

    for epoch in 0..EPOCHS {
        tracing::info!("> Epoch {:3}/{:3}", epoch + 1, EPOCHS);
        tel.set("epoch", epoch)?;

        // 3. Training pass
        let mut loader = (0..BATCHES).map(|i| synthetic_batch(epoch, i, 0)).timed();
        let mut first = None;
        for (i, batch) in loader.by_ref().enumerate() {
            let targets = tel.timed("train_data_transfer_time", || batch.targets.clone())?;
            let preds = tel.timed("train_forward_time", || batch.preds.clone())?;
            let loss = tel.timed("train_criterion_time", || masked_loss(&batch))?;
            if loss.is_nan() {
                return Err(anyhow!("training loss should not be nan"));
            }
            tel.add("train_loss", loss)?;
            tel.timed("train_eval_time", || {
                train_eval.add_normalized(&preds, &targets, &batch.mask, &batch.head_lengths, &batch.transforms)
            })??;
            let grads = tel.timed("train_backward_time", || residuals(&batch))?;
            tel.timed("train_optim_time", || {
                for (w, g) in weights.iter_mut().zip(&grads) {
                    *w -= LEARNING_RATE * g;
                }
            })?;
            if i == 0 {
                first = Some(batch);
            }
        }
        tel.merge("train_data_load_time", loader.meter())?;
        tel.merge("train_pckh_all", train_eval.meter(tele::eval::ALL).ok_or_else(|| anyhow!("missing meter"))?)?;
        if let Some(batch) = &first {
            tel.set("train_sample", (0..BATCH_SIZE).map(|s| draw_sample(batch, s)).collect::<Vec<_>>())?;
            tel.set("train_heatmaps", (0..BATCH_SIZE).map(|s| wrist_heatmap(batch, s)).collect::<Vec<_>>())?;
        }

        // 4. Validation pass
        let mut preds = Vec::new();
        let mut first = None;
        for i in 0..BATCHES {
            let batch = synthetic_batch(epoch, i, BATCHES * BATCH_SIZE);
            tel.add("val_loss", masked_loss(&batch))?;
            val_eval.add_normalized(&batch.preds, &batch.targets, &batch.mask, &batch.head_lengths, &batch.transforms)?;
            for (row, tf) in batch.preds.iter().zip(&batch.transforms) {
                for p in row {
                    preds.extend(tf.apply(*p));
                }
            }
            if i == 0 {
                first = Some(batch);
            }
        }
        let val_preds = MeterValue::tensor(vec![BATCHES * BATCH_SIZE, JOINT_NAMES.len(), 2], preds)
            .ok_or_else(|| anyhow!("prediction matrix has the wrong size"))?;
        tel.set("val_preds", val_preds.clone())?;
        tel.merge("val_pckh_all", val_eval.meter(tele::eval::ALL).ok_or_else(|| anyhow!("missing meter"))?)?;
        if let Some(batch) = &first {
            tel.set("val_sample", (0..BATCH_SIZE).map(|s| draw_sample(batch, s)).collect::<Vec<_>>())?;
            tel.set("val_heatmaps", (0..BATCH_SIZE).map(|s| wrist_heatmap(batch, s)).collect::<Vec<_>>())?;
        }

        let val_acc = val_eval.value(tele::eval::ALL).unwrap_or(f64::NAN);
        if best_val_acc.add(val_acc) {
            tracing::info!("New best validation PCKh: {:.4}", val_acc);
            tel.set("best_val_preds", val_preds)?;
        }

        // 5. Step boundary
        let report = tel.step();
        if !report.is_clean() {
            tracing::warn!("Step {} lost output for sinks {:?}", report.step, report.failed_sinks());
        }
        tel.reset();
        train_eval.reset();
        val_eval.reset();

        if let Some(handle) = &reporting.dashboard {
            if let Err(e) = handle.set_progress((epoch + 1) * BATCHES as u64, total_batches) {
                tracing::warn!("Progress update dropped: {}", e);
            }
        }
    }

    if let Some(handle) = reporting.dashboard.take() {
        handle.shutdown(Duration::from_secs(5)).await;
    }
    if let Some(dir) = &reporting.run_dir {
        tracing::info!("Metrics saved under {}", dir.display());
    }
    Ok(())
}
