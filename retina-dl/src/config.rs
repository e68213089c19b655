//! Detector configuration format.

use crate::{
    anchor::{AnchorCache, AnchorGeneratorInit, DEFAULT_ANCHOR_CACHE_CAPACITY},
    assign::AnchorLabelAssignerInit,
    common::*,
    inference::RetinaInferenceInit, nms::DetectionFilterInit,
};

/// The detector configuration.
///
/// Every option except `num_classes` falls back to the RetinaNet defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The number of object classes.
    pub num_classes: NonZeroUsize,
    /// The canonical anchor size per pyramid level.
    #[serde(default = "default_anchor_sizes")]
    pub anchor_sizes: Vec<R64>,
    /// The downsampling factor per pyramid level, from finest to coarsest.
    #[serde(default = "default_anchor_strides")]
    pub anchor_strides: Vec<usize>,
    /// The height/width ratios of anchors in each feature map cell.
    #[serde(default = "default_anchor_ratios")]
    pub anchor_ratios: Vec<R64>,
    /// The size multipliers of anchors in each feature map cell.
    #[serde(default = "default_anchor_scales")]
    pub anchor_scales: Vec<R64>,
    /// Anchors overlapping a ground truth box at least this much are positive.
    #[serde(default = "default_positive_overlap_threshold")]
    pub positive_overlap_threshold: R64,
    /// Anchors overlapping every ground truth box less than this are negative.
    #[serde(default = "default_negative_overlap_threshold")]
    pub negative_overlap_threshold: R64,
    /// The normalization factor of box regression deltas.
    #[serde(default = "default_regression_std")]
    pub regression_std: R64,
    /// The IoU above which a lower scored box is suppressed.
    #[serde(default = "default_nms_iou_threshold")]
    pub nms_iou_threshold: R64,
    /// Per-class scores below this are discarded.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: R64,
    /// The fixed number of detection slots per image.
    #[serde(default = "default_max_detections")]
    pub max_detections: NonZeroUsize,
    /// The number of input shapes whose anchors are kept in memory.
    #[serde(default = "default_anchor_cache_capacity")]
    pub anchor_cache_capacity: NonZeroUsize,
}

impl Config {
    /// Create a configuration with default options.
    pub fn new(num_classes: NonZeroUsize) -> Self {
        Self {
            num_classes,
            anchor_sizes: default_anchor_sizes(),
            anchor_strides: default_anchor_strides(),
            anchor_ratios: default_anchor_ratios(),
            anchor_scales: default_anchor_scales(),
            positive_overlap_threshold: default_positive_overlap_threshold(),
            negative_overlap_threshold: default_negative_overlap_threshold(),
            regression_std: default_regression_std(),
            nms_iou_threshold: default_nms_iou_threshold(),
            score_threshold: default_score_threshold(),
            max_detections: default_max_detections(),
            anchor_cache_capacity: default_anchor_cache_capacity(),
        }
    }

    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }

    pub fn anchor_generator_init(&self) -> AnchorGeneratorInit {
        AnchorGeneratorInit {
            sizes: self.anchor_sizes.clone(),
            strides: self.anchor_strides.clone(),
            ratios: self.anchor_ratios.clone(),
            scales: self.anchor_scales.clone(),
        }
    }

    pub fn anchor_cache(&self) -> Result<AnchorCache> {
        let generator = self.anchor_generator_init().build()?;
        Ok(AnchorCache::with_capacity(generator, self.anchor_cache_capacity))
    }

    pub fn assigner_init(&self) -> AnchorLabelAssignerInit {
        AnchorLabelAssignerInit {
            num_classes: self.num_classes.get(),
            positive_threshold: self.positive_overlap_threshold,
            negative_threshold: self.negative_overlap_threshold,
            regression_std: self.regression_std,
        }
    }

    pub fn detection_filter_init(&self) -> DetectionFilterInit {
        DetectionFilterInit {
            score_threshold: self.score_threshold,
            nms_iou_threshold: self.nms_iou_threshold,
            max_detections: self.max_detections.get(),
        }
    }

    pub fn inference_init(&self) -> RetinaInferenceInit {
        RetinaInferenceInit {
            anchors: self.anchor_generator_init(),
            anchor_cache_capacity: self.anchor_cache_capacity,
            regression_std: self.regression_std,
            filter: self.detection_filter_init(),
        }
    }
}

pub fn default_anchor_sizes() -> Vec<R64> {
    [32.0, 64.0, 128.0, 256.0, 512.0]
        .into_iter()
        .map(r64)
        .collect()
}

pub fn default_anchor_strides() -> Vec<usize> {
    vec![8, 16, 32, 64, 128]
}

pub fn default_anchor_ratios() -> Vec<R64> {
    vec![r64(0.5), r64(1.0), r64(2.0)]
}

pub fn default_anchor_scales() -> Vec<R64> {
    [0.0, 1.0 / 3.0, 2.0 / 3.0]
        .into_iter()
        .map(|exp: f64| r64(2f64.powf(exp)))
        .collect()
}

fn default_positive_overlap_threshold() -> R64 {
    r64(0.5)
}

fn default_negative_overlap_threshold() -> R64 {
    r64(0.4)
}

fn default_regression_std() -> R64 {
    r64(0.2)
}

fn default_nms_iou_threshold() -> R64 {
    r64(0.5)
}

fn default_score_threshold() -> R64 {
    r64(0.05)
}

fn default_max_detections() -> NonZeroUsize {
    NonZeroUsize::new(300).unwrap()
}

fn default_anchor_cache_capacity() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_ANCHOR_CACHE_CAPACITY).unwrap()
}
