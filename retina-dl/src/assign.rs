//! Matching ground truth boxes to anchors for training targets.

use crate::{anchor::AnchorSet, coder::BoxCoder, common::*};

/// The classification target value of ignored anchors.
pub const IGNORE_LABEL: i8 = -1;

/// The role of an anchor in the losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorState {
    /// Contributes to both classification and regression losses.
    Positive,
    /// Contributes to the classification loss as background.
    Negative,
    /// Excluded from both losses.
    Ignore,
}

impl AnchorState {
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive)
    }
}

/// The ground truth box overlapping an anchor the most.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorMatch {
    /// The index into the label list given to the assigner.
    pub gt_index: usize,
    pub iou: f32,
}

#[derive(Debug, Clone)]
pub struct AnchorLabelAssignerInit {
    pub num_classes: usize,
    pub positive_threshold: R64,
    pub negative_threshold: R64,
    pub regression_std: R64,
}

impl AnchorLabelAssignerInit {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            positive_threshold: r64(0.5),
            negative_threshold: r64(0.4),
            regression_std: r64(0.2),
        }
    }

    pub fn build(self) -> Result<AnchorLabelAssigner> {
        let Self {
            num_classes,
            positive_threshold,
            negative_threshold,
            regression_std,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(
            (0.0..=1.0).contains(&positive_threshold.raw()),
            "positive_overlap_threshold must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&negative_threshold.raw()),
            "negative_overlap_threshold must be in range [0, 1]"
        );
        ensure!(
            negative_threshold <= positive_threshold,
            "negative_overlap_threshold ({}) must not exceed positive_overlap_threshold ({})",
            negative_threshold,
            positive_threshold
        );

        Ok(AnchorLabelAssigner {
            num_classes,
            positive_threshold: positive_threshold.raw() as f32,
            negative_threshold: negative_threshold.raw() as f32,
            coder: BoxCoder::new(regression_std)?,
        })
    }
}

/// Assigns per-anchor classification and regression targets from ground truth boxes.
#[derive(Debug, Clone)]
pub struct AnchorLabelAssigner {
    num_classes: usize,
    positive_threshold: f32,
    negative_threshold: f32,
    coder: BoxCoder,
}

/// The training targets of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTargets {
    /// `[num_anchors, num_classes]` labels in `{0, 1, -1}`.
    pub classification: Array2<i8>,
    /// `[num_anchors, 4]` encoded offsets, zero except for positive anchors.
    pub regression: Array2<f32>,
    pub states: Vec<AnchorState>,
    /// The best match per anchor, `None` if the image has no usable ground truth.
    pub matches: Vec<Option<AnchorMatch>>,
}

impl AnchorTargets {
    pub fn num_anchors(&self) -> usize {
        self.states.len()
    }

    pub fn num_positive(&self) -> usize {
        self.count_state(AnchorState::Positive)
    }

    pub fn num_negative(&self) -> usize {
        self.count_state(AnchorState::Negative)
    }

    pub fn num_ignored(&self) -> usize {
        self.count_state(AnchorState::Ignore)
    }

    fn count_state(&self, state: AnchorState) -> usize {
        self.states.iter().filter(|&&other| other == state).count()
    }
}

impl AnchorLabelAssigner {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn coder(&self) -> &BoxCoder {
        &self.coder
    }

    /// Compute the targets for the anchors of an image.
    pub fn assign(
        &self,
        anchors: &AnchorSet,
        labels: &[GroundTruth<f32>],
    ) -> Result<AnchorTargets> {
        self.assign_rects(anchors.rects(), labels)
    }

    /// Compute the targets for an arbitrary list of anchor boxes.
    pub fn assign_rects<'a, I>(
        &self,
        anchors: I,
        labels: &[GroundTruth<f32>],
    ) -> Result<AnchorTargets>
    where
        I: IntoIterator<Item = &'a TLBR<f32>>,
    {
        let num_classes = self.num_classes;

        // boxes without positive area are treated as absent
        let (gt_indexes, gt_rects): (Vec<usize>, Vec<&TLBR<f32>>) = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| label.is_valid())
            .map(|(index, label)| (index, &label.rect))
            .unzip();
        if gt_rects.len() < labels.len() {
            debug!(
                "{} ground truth boxes without positive area are ignored",
                labels.len() - gt_rects.len()
            );
        }

        gt_indexes.iter().try_for_each(|&index| -> Result<_> {
            let class = labels[index].class;
            ensure!(
                class < num_classes,
                "ground truth class {} is out of range [0, {})",
                class,
                num_classes
            );
            Ok(())
        })?;

        let anchors: Vec<&TLBR<f32>> = anchors.into_iter().collect();
        let num_anchors = anchors.len();
        let overlaps = compute_overlaps(anchors.iter().copied(), gt_rects.iter().copied());

        let mut classification = Array2::<i8>::zeros((num_anchors, num_classes));
        let mut regression = Array2::<f32>::zeros((num_anchors, 4));
        let mut states = Vec::with_capacity(num_anchors);
        let mut matches = Vec::with_capacity(num_anchors);

        for (anchor_index, (anchor, row)) in izip!(&anchors, overlaps.outer_iter()).enumerate() {
            let best = best_match(row.iter().copied()).map(|(col, iou)| AnchorMatch {
                gt_index: gt_indexes[col],
                iou,
            });

            let state = match best {
                Some(AnchorMatch { iou, .. }) if iou >= self.positive_threshold => {
                    AnchorState::Positive
                }
                Some(AnchorMatch { iou, .. }) if iou >= self.negative_threshold => {
                    AnchorState::Ignore
                }
                _ => AnchorState::Negative,
            };

            match (state, best) {
                (AnchorState::Positive, Some(AnchorMatch { gt_index, .. })) => {
                    let label = &labels[gt_index];
                    classification[[anchor_index, label.class]] = 1;

                    let deltas = self.coder.encode(anchor, &label.rect);
                    izip!(regression.row_mut(anchor_index), deltas)
                        .for_each(|(target, delta)| *target = delta);
                }
                (AnchorState::Ignore, _) => {
                    classification.row_mut(anchor_index).fill(IGNORE_LABEL);
                }
                _ => {}
            }

            states.push(state);
            matches.push(best);
        }

        let targets = AnchorTargets {
            classification,
            regression,
            states,
            matches,
        };
        debug!(
            "assigned {} ground truth boxes to {} anchors: {} positive, {} ignored",
            gt_rects.len(),
            num_anchors,
            targets.num_positive(),
            targets.num_ignored()
        );

        Ok(targets)
    }
}

/// Compute the `[num_anchors, num_boxes]` IoU matrix.
pub fn compute_overlaps<'a, 'b, A, B>(anchors: A, boxes: B) -> Array2<f32>
where
    A: IntoIterator<Item = &'a TLBR<f32>>,
    B: IntoIterator<Item = &'b TLBR<f32>>,
{
    let anchors: Vec<_> = anchors.into_iter().collect();
    let boxes: Vec<_> = boxes.into_iter().collect();

    Array2::from_shape_fn((anchors.len(), boxes.len()), |(row, col)| {
        anchors[row].iou_with(boxes[col])
    })
}

/// Find the column with the largest IoU. Ties go to the lower column.
fn best_match(row: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    row.enumerate()
        .fold(None, |best, (col, iou)| match best {
            Some((_, best_iou)) if iou <= best_iou => best,
            _ => Some((col, iou)),
        })
}
