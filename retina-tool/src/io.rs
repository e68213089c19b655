//! JSON file formats read and written by the tool.

use crate::common::*;
use retina_dl::{
    anchor::Anchor,
    assign::AnchorTargets,
    nms::{Detection, Detections},
};

/// The concatenated head outputs of one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionFile {
    pub height: usize,
    pub width: usize,
    /// Per-anchor class scores.
    pub classification: Vec<Vec<f32>>,
    /// Per-anchor `[dx1, dy1, dx2, dy2]` deltas.
    pub regression: Vec<[f32; 4]>,
}

impl PredictionFile {
    pub fn image_size(&self) -> HW<usize> {
        HW::from_hw([self.height, self.width])
    }

    /// Convert the outputs to `[num_anchors, num_classes]` and `[num_anchors, 4]` arrays.
    pub fn to_arrays(&self) -> Result<(Array2<f32>, Array2<f32>)> {
        let num_anchors = self.classification.len();
        ensure!(
            self.regression.len() == num_anchors,
            "classification has {} rows but regression has {}",
            num_anchors,
            self.regression.len()
        );

        let num_classes = self.classification.first().map(Vec::len).unwrap_or(0);
        ensure!(
            self.classification.iter().all(|row| row.len() == num_classes),
            "classification rows must have the same length"
        );

        let classification = Array2::from_shape_vec(
            (num_anchors, num_classes),
            self.classification.iter().flatten().copied().collect(),
        )?;
        let regression = Array2::from_shape_vec(
            (num_anchors, 4),
            self.regression.iter().flatten().copied().collect(),
        )?;
        Ok((classification, regression))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorEntry {
    pub level: usize,
    pub stride: usize,
    pub ratio: f32,
    pub scale: f32,
    pub xyxy: [f32; 4],
}

impl From<&Anchor> for AnchorEntry {
    fn from(anchor: &Anchor) -> Self {
        Self {
            level: anchor.level,
            stride: anchor.stride,
            ratio: anchor.ratio,
            scale: anchor.scale,
            xyxy: anchor.rect.xyxy(),
        }
    }
}

/// The anchor statistics of one record.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub record_index: usize,
    pub height: usize,
    pub width: usize,
    pub num_positive: usize,
    pub num_negative: usize,
    pub num_ignored: usize,
    /// The indexes of positive anchors.
    pub positive_anchors: Vec<usize>,
}

impl TargetSummary {
    pub fn new(record_index: usize, image_size: &HW<usize>, targets: &AnchorTargets) -> Self {
        let positive_anchors = targets
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_positive())
            .map(|(index, _)| index)
            .collect();

        Self {
            record_index,
            height: image_size.h(),
            width: image_size.w(),
            num_positive: targets.num_positive(),
            num_negative: targets.num_negative(),
            num_ignored: targets.num_ignored(),
            positive_anchors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionEntry {
    pub class: usize,
    pub score: f32,
    pub xyxy: [f32; 4],
}

/// Keep the filled detection slots.
pub fn detection_entries(detections: &Detections) -> Vec<DetectionEntry> {
    detections
        .valid()
        .filter_map(|det: &Detection| {
            Some(DetectionEntry {
                class: det.class_index()?,
                score: det.score,
                xyxy: det.rect.xyxy(),
            })
        })
        .collect()
}

/// Write a value as pretty JSON to a file, or to stdout when no path is given.
pub fn write_json<T>(output_file: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize,
{
    match output_file {
        Some(path) => {
            let mut writer = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("fail to create file '{}'", path.display()))?,
            );
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
