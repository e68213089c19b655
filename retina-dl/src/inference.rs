//! The post-processing pipeline from raw head outputs to detections.

use crate::{
    anchor::{AnchorCache, AnchorGeneratorInit, AnchorSet, DEFAULT_ANCHOR_CACHE_CAPACITY},
    coder::{BoxClipper, BoxCoder},
    common::*,
    config::Config,
    nms::{DetectionFilter, DetectionFilterInit, Detections},
    pyramid::check_alignment,
    registry::{LayerKind, LayerRegistry},
};

#[derive(Debug, Clone)]
pub struct RetinaInferenceInit {
    pub anchors: AnchorGeneratorInit,
    pub anchor_cache_capacity: NonZeroUsize,
    pub regression_std: R64,
    pub filter: DetectionFilterInit,
}

impl Default for RetinaInferenceInit {
    fn default() -> Self {
        Self {
            anchors: AnchorGeneratorInit::default(),
            anchor_cache_capacity: NonZeroUsize::new(DEFAULT_ANCHOR_CACHE_CAPACITY).unwrap(),
            regression_std: r64(0.2),
            filter: DetectionFilterInit::default(),
        }
    }
}

impl RetinaInferenceInit {
    pub fn build(self) -> Result<RetinaInference> {
        let Self {
            anchors,
            anchor_cache_capacity,
            regression_std,
            filter,
        } = self;

        let stages = vec![
            Stage::Anchors(AnchorCache::with_capacity(
                anchors.build()?,
                anchor_cache_capacity,
            )),
            Stage::RegressBoxes(BoxCoder::new(regression_std)?),
            Stage::ClipBoxes,
            Stage::FilterDetections(filter.build()?),
        ];

        RetinaInference::new(stages)
    }
}

/// A post-processing step.
#[derive(Debug)]
pub enum Stage {
    /// Looks up the anchors of the input shape and checks the head outputs against them.
    Anchors(AnchorCache),
    /// Decodes the regression output into absolute boxes.
    RegressBoxes(BoxCoder),
    /// Clamps the boxes into the image.
    ClipBoxes,
    /// Thresholds, suppresses and selects the top detections.
    FilterDetections(DetectionFilter),
}

impl Stage {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Anchors(_) => LayerKind::Anchors,
            Self::RegressBoxes(_) => LayerKind::RegressBoxes,
            Self::ClipBoxes => LayerKind::ClipBoxes,
            Self::FilterDetections(_) => LayerKind::FilterDetections,
        }
    }

    pub fn forward(&self, state: &mut InferenceState<'_>) -> Result<()> {
        match self {
            Self::Anchors(cache) => {
                let anchors = cache.get(&state.image_size)?;
                check_alignment(&anchors, state.classification.nrows(), "classification output")?;
                check_alignment(&anchors, state.regression.nrows(), "regression output")?;
                state.anchors = Some(anchors);
            }
            Self::RegressBoxes(coder) => {
                let anchors = state.anchors.as_ref().ok_or_else(|| {
                    format_err!("the {} layer requires anchors from a preceding layer", self.kind())
                })?;
                state.boxes = Some(coder.decode_all(anchors, state.regression)?);
            }
            Self::ClipBoxes => {
                let clipper = BoxClipper::new(&state.image_size)?;
                let boxes = state.boxes.as_mut().ok_or_else(|| {
                    format_err!("the {} layer requires decoded boxes", self.kind())
                })?;
                clipper.clip_all(boxes);
            }
            Self::FilterDetections(filter) => {
                let boxes = state.boxes.as_ref().ok_or_else(|| {
                    format_err!("the {} layer requires decoded boxes", self.kind())
                })?;
                state.detections = Some(filter.forward(boxes, state.classification)?);
            }
        }
        Ok(())
    }
}

/// The values passed from stage to stage for one image.
#[derive(Debug)]
pub struct InferenceState<'a> {
    pub image_size: HW<usize>,
    /// `[num_anchors, num_classes]` scores.
    pub classification: ArrayView2<'a, f32>,
    /// `[num_anchors, 4]` box deltas.
    pub regression: ArrayView2<'a, f32>,
    pub anchors: Option<Arc<AnchorSet>>,
    pub boxes: Option<Vec<TLBR<f32>>>,
    pub detections: Option<Detections>,
}

impl<'a> InferenceState<'a> {
    pub fn new(
        image_size: HW<usize>,
        classification: ArrayView2<'a, f32>,
        regression: ArrayView2<'a, f32>,
    ) -> Self {
        Self {
            image_size,
            classification,
            regression,
            anchors: None,
            boxes: None,
            detections: None,
        }
    }
}

/// Turns the concatenated head outputs of an image into detections.
///
/// The outputs must be index-aligned with the anchors of the input shape,
/// see [compose_levels](crate::pyramid::compose_levels).
#[derive(Debug)]
pub struct RetinaInference {
    stages: Vec<Stage>,
}

impl RetinaInference {
    /// Compose a pipeline from stages, which run in order.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        ensure!(
            matches!(stages.last(), Some(Stage::FilterDetections(_))),
            "the pipeline must end with a {} layer",
            LayerKind::FilterDetections
        );
        Ok(Self { stages })
    }

    /// Compose a pipeline from registered layer names.
    pub fn from_registry<S>(registry: &LayerRegistry, names: &[S], config: &Config) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let stages: Vec<_> = names
            .iter()
            .map(|name| registry.build(name.as_ref(), config))
            .try_collect()?;
        Self::new(stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn forward<'a>(
        &self,
        image_size: &HW<usize>,
        classification: ArrayView2<'a, f32>,
        regression: ArrayView2<'a, f32>,
    ) -> Result<Detections> {
        let mut state = InferenceState::new(*image_size, classification, regression);

        self.stages.iter().try_for_each(|stage| {
            stage
                .forward(&mut state)
                .with_context(|| format!("{} layer failed", stage.kind()))
        })?;

        state
            .detections
            .ok_or_else(|| format_err!("the pipeline produced no detections"))
    }

    /// Run each image of a batch independently.
    ///
    /// All images share the padded input shape `image_size`.
    pub fn forward_batch(
        &self,
        image_size: &HW<usize>,
        classification: ArrayView3<'_, f32>,
        regression: ArrayView3<'_, f32>,
    ) -> Result<Vec<Detections>> {
        let batch_size = classification.len_of(Axis(0));
        ensure!(
            regression.len_of(Axis(0)) == batch_size,
            "batch sizes of classification ({}) and regression ({}) outputs differ",
            batch_size,
            regression.len_of(Axis(0))
        );

        izip!(classification.outer_iter(), regression.outer_iter())
            .enumerate()
            .map(|(index, (classification, regression))| {
                self.forward(image_size, classification, regression)
                    .with_context(|| format!("fail to process batch item {}", index))
            })
            .try_collect()
    }
}
