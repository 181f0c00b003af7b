//! Compact LBP-based recognition engine.
//!
//! A self-contained stand-in for a full face recognition stack,
//! suitable for the kiosk setup this daemon targets: the camera is
//! aimed at face height behind the door, so detection reduces to a
//! presence gate over the whole frame, and matching compares uniform
//! local-binary-pattern histograms against enrolled templates with a
//! chi-square distance. Lower distance = better match, the convention
//! [`MatchPolicy`](crate::types::MatchPolicy) expects.
//!
//! The model artifact is a JSON gallery of per-identity histograms,
//! produced by the enrollment tooling (out of scope here).

use crate::types::{FaceDetector, FaceMatcher, Prediction, RecognitionError, Region};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Histogram grid: GRID x GRID cells, 256 LBP bins each.
const GRID: usize = 8;
const BINS: usize = 256;
const DESCRIPTOR_LEN: usize = GRID * GRID * BINS;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    NotFound(String),
    #[error("model artifact unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("template for serial {serial_id} has {got} bins, expected {expected}")]
    BadTemplate {
        serial_id: u32,
        expected: usize,
        got: usize,
    },
    #[error("model artifact holds no templates")]
    EmptyGallery,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    templates: Vec<Template>,
}

#[derive(Debug, Deserialize)]
struct Template {
    serial_id: u32,
    histogram: Vec<f32>,
}

/// Presence gate used as the frame detector.
///
/// An empty doorway yields a flat frame; a subject in front of the
/// camera adds structure. Frames whose pixel standard deviation
/// clears `min_stddev` produce one full-frame candidate region,
/// anything else produces none.
pub struct PresenceDetector {
    pub min_stddev: f32,
}

impl Default for PresenceDetector {
    fn default() -> Self {
        Self { min_stddev: 12.0 }
    }
}

impl FaceDetector for PresenceDetector {
    fn detect(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Region>, RecognitionError> {
        let pixels = (width * height) as usize;
        if data.len() < pixels || pixels == 0 {
            return Err(RecognitionError::Detector(format!(
                "frame buffer too short: expected {pixels}, got {}",
                data.len()
            )));
        }

        if stddev(&data[..pixels]) < self.min_stddev {
            return Ok(Vec::new());
        }
        Ok(vec![Region {
            x: 0,
            y: 0,
            width,
            height,
        }])
    }
}

/// Nearest-template LBP matcher loaded from the model artifact.
#[derive(Debug)]
pub struct LbpMatcher {
    templates: Vec<(u32, Vec<f32>)>,
}

impl LbpMatcher {
    /// Load the template gallery from `path`.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }

        let raw = std::fs::read_to_string(path)?;
        let file: ModelFile = serde_json::from_str(&raw)?;
        if file.templates.is_empty() {
            return Err(ModelError::EmptyGallery);
        }

        let mut templates = Vec::with_capacity(file.templates.len());
        for t in file.templates {
            if t.histogram.len() != DESCRIPTOR_LEN {
                return Err(ModelError::BadTemplate {
                    serial_id: t.serial_id,
                    expected: DESCRIPTOR_LEN,
                    got: t.histogram.len(),
                });
            }
            templates.push((t.serial_id, t.histogram));
        }

        tracing::info!(
            path = %path.display(),
            templates = templates.len(),
            "LBP template gallery loaded"
        );

        Ok(Self { templates })
    }

    #[cfg(test)]
    fn from_templates(templates: Vec<(u32, Vec<f32>)>) -> Self {
        Self { templates }
    }
}

impl FaceMatcher for LbpMatcher {
    fn predict(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        region: &Region,
    ) -> Result<Prediction, RecognitionError> {
        let descriptor = lbp_descriptor(data, width, height, region)
            .map_err(RecognitionError::Matcher)?;

        let mut best: Option<(u32, f32)> = None;
        for (serial_id, template) in &self.templates {
            let distance = chi_square(&descriptor, template);
            let closer = match best {
                None => true,
                Some((_, d)) => distance < d,
            };
            if closer {
                best = Some((*serial_id, distance));
            }
        }

        let (serial_id, confidence) = best
            .ok_or_else(|| RecognitionError::Matcher("empty template gallery".into()))?;
        Ok(Prediction {
            serial_id,
            confidence,
        })
    }
}

/// Uniform 8-neighbor LBP histogram over a GRID x GRID cell layout,
/// each cell L1-normalized so region size does not skew distances.
fn lbp_descriptor(
    data: &[u8],
    width: u32,
    height: u32,
    region: &Region,
) -> Result<Vec<f32>, String> {
    let w = width as usize;
    let h = height as usize;
    if data.len() < w * h {
        return Err(format!(
            "frame buffer too short: expected {}, got {}",
            w * h,
            data.len()
        ));
    }

    let rx = region.x as usize;
    let ry = region.y as usize;
    let rw = region.width as usize;
    let rh = region.height as usize;
    if rw < GRID + 2 || rh < GRID + 2 || rx + rw > w || ry + rh > h {
        return Err(format!("region {rw}x{rh} at ({rx},{ry}) unusable for {w}x{h} frame"));
    }

    let cell_w = rw / GRID;
    let cell_h = rh / GRID;
    let mut descriptor = vec![0f32; DESCRIPTOR_LEN];

    // Skip the region border: every LBP code needs all 8 neighbors.
    for y in (ry + 1)..(ry + rh - 1) {
        for x in (rx + 1)..(rx + rw - 1) {
            let center = data[y * w + x];
            let mut code = 0u8;
            let neighbors = [
                data[(y - 1) * w + (x - 1)],
                data[(y - 1) * w + x],
                data[(y - 1) * w + (x + 1)],
                data[y * w + (x + 1)],
                data[(y + 1) * w + (x + 1)],
                data[(y + 1) * w + x],
                data[(y + 1) * w + (x - 1)],
                data[y * w + (x - 1)],
            ];
            for (bit, &n) in neighbors.iter().enumerate() {
                if n >= center {
                    code |= 1 << bit;
                }
            }

            let cell_x = ((x - rx) / cell_w).min(GRID - 1);
            let cell_y = ((y - ry) / cell_h).min(GRID - 1);
            descriptor[(cell_y * GRID + cell_x) * BINS + code as usize] += 1.0;
        }
    }

    for cell in descriptor.chunks_mut(BINS) {
        let total: f32 = cell.iter().sum();
        if total > 0.0 {
            for bin in cell.iter_mut() {
                *bin /= total;
            }
        }
    }

    Ok(descriptor)
}

/// Chi-square distance between two histograms. Zero for identical
/// inputs, grows with divergence.
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let sum = x + y;
            if sum > 0.0 {
                (x - y) * (x - y) / sum
            } else {
                0.0
            }
        })
        .sum()
}

fn stddev(data: &[u8]) -> f32 {
    let n = data.len() as f32;
    let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
    let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}
