//! Confidence thresholding, per-class non-maximum suppression and top-k selection.

use crate::common::*;

/// The class index of an empty detection slot.
pub const NO_CLASS: i64 = -1;

/// A detected box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: TLBR<f32>,
    pub score: f32,
    /// The class index, or [NO_CLASS] for an empty slot.
    pub class: i64,
}

impl Detection {
    /// The "no detection" entry: all-zero box, zero score and class -1.
    pub fn sentinel() -> Self {
        Self {
            rect: TLBR::zeros(),
            score: 0.0,
            class: NO_CLASS,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.class == NO_CLASS
    }

    pub fn class_index(&self) -> Option<usize> {
        (self.class >= 0).then(|| self.class as usize)
    }
}

/// A fixed number of detection slots, sorted by descending score.
///
/// Filled slots come first and the rest are sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detections(Vec<Detection>);

impl Detections {
    /// The filled slots.
    pub fn valid(&self) -> impl Iterator<Item = &Detection> + '_ {
        self.0.iter().take_while(|det| !det.is_sentinel())
    }

    pub fn num_valid(&self) -> usize {
        self.valid().count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> + '_ {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Detection> {
        self.0
    }
}

#[derive(Debug)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
    /// Stop after this many boxes are kept. Unbounded if `None`.
    pub max_outputs: Option<usize>,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.5),
            max_outputs: None,
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self {
            iou_threshold,
            max_outputs,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must be in range [0, 1]"
        );
        ensure!(
            max_outputs != Some(0),
            "max_outputs must be positive if specified"
        );

        Ok(NonMaxSuppression {
            iou_threshold: iou_threshold.raw() as f32,
            max_outputs,
        })
    }
}

/// Greedy non-maximum suppression over boxes of one class.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_threshold: f32,
    max_outputs: Option<usize>,
}

impl NonMaxSuppression {
    /// Return the indexes of kept boxes in descending score order.
    ///
    /// A box is suppressed when its IoU with an already kept box exceeds the
    /// threshold. Boxes with equal scores are visited in index order. At most
    /// `max_outputs` boxes are returned, which are the first ones the
    /// unbounded pass would keep.
    pub fn forward(&self, rects: &[TLBR<f32>], scores: &[f32]) -> Result<Vec<usize>> {
        ensure!(
            rects.len() == scores.len(),
            "the number of boxes ({}) and scores ({}) differ",
            rects.len(),
            scores.len()
        );
        ensure!(
            scores.iter().all(|score| !score.is_nan()),
            "scores must not be NaN"
        );

        let mut order: Vec<usize> = (0..rects.len()).collect();
        order.sort_by_key(|&index| Reverse(r32(scores[index])));

        let max_outputs = self.max_outputs.unwrap_or(rects.len());
        let mut keep: Vec<usize> = vec![];

        // a candidate survives if no kept box overlaps it too much
        for index in order {
            if keep.len() >= max_outputs {
                break;
            }
            let rect = &rects[index];
            let suppressed = keep
                .iter()
                .any(|&kept| rects[kept].iou_with(rect) > self.iou_threshold);
            if !suppressed {
                keep.push(index);
            }
        }

        Ok(keep)
    }
}

#[derive(Debug, Clone)]
pub struct DetectionFilterInit {
    pub score_threshold: R64,
    pub nms_iou_threshold: R64,
    pub max_detections: usize,
}

impl Default for DetectionFilterInit {
    fn default() -> Self {
        Self {
            score_threshold: r64(0.05),
            nms_iou_threshold: r64(0.5),
            max_detections: 300,
        }
    }
}

impl DetectionFilterInit {
    pub fn build(self) -> Result<DetectionFilter> {
        let Self {
            score_threshold,
            nms_iou_threshold,
            max_detections,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&score_threshold.raw()),
            "score_threshold must be in range [0, 1]"
        );
        ensure!(max_detections > 0, "max_detections must be positive");

        // a class never contributes more than the final number of slots
        let nms = NonMaxSuppressionInit {
            iou_threshold: nms_iou_threshold,
            max_outputs: Some(max_detections),
        }
        .build()?;

        Ok(DetectionFilter {
            score_threshold: score_threshold.raw() as f32,
            max_detections,
            nms,
        })
    }
}

/// Turns dense per-class scores into a fixed number of detections.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    score_threshold: f32,
    max_detections: usize,
    nms: NonMaxSuppression,
}

impl DetectionFilter {
    pub fn max_detections(&self) -> usize {
        self.max_detections
    }

    /// Filter `rects` given their `[num_boxes, num_classes]` scores.
    pub fn forward(&self, rects: &[TLBR<f32>], scores: ArrayView2<'_, f32>) -> Result<Detections> {
        ensure!(
            rects.len() == scores.nrows(),
            "the number of boxes ({}) and score rows ({}) differ",
            rects.len(),
            scores.nrows()
        );

        let mut detections: Vec<Detection> = scores
            .axis_iter(Axis(1))
            .enumerate()
            .map(|(class, class_scores)| -> Result<_> {
                // select candidates above the threshold; NaN scores never pass
                let (candidate_indexes, candidate_scores): (Vec<usize>, Vec<f32>) = class_scores
                    .iter()
                    .enumerate()
                    .filter(|&(_, &score)| score >= self.score_threshold)
                    .map(|(index, &score)| (index, score))
                    .unzip();
                let candidate_rects: Vec<_> = candidate_indexes
                    .iter()
                    .map(|&index| rects[index].clone())
                    .collect();

                let keep = self.nms.forward(&candidate_rects, &candidate_scores)?;

                let class_detections: Vec<_> = keep
                    .into_iter()
                    .map(|pos| Detection {
                        rect: candidate_rects[pos].clone(),
                        score: candidate_scores[pos],
                        class: class as i64,
                    })
                    .collect();
                Ok(class_detections)
            })
            .flatten_ok()
            .try_collect()?;

        // stable sort keeps class order, then NMS order among equal scores
        detections.sort_by_key(|det| Reverse(r32(det.score)));
        detections.truncate(self.max_detections);
        detections.resize_with(self.max_detections, Detection::sentinel);

        Ok(Detections(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(score_threshold: f64, nms_iou_threshold: f64, max_detections: usize) -> DetectionFilter {
        DetectionFilterInit {
            score_threshold: r64(score_threshold),
            nms_iou_threshold: r64(nms_iou_threshold),
            max_detections,
        }
        .build()
        .unwrap()
    }

    fn scores(columns: &[&[f32]]) -> Array2<f32> {
        let num_rows = columns[0].len();
        Array2::from_shape_fn((num_rows, columns.len()), |(row, col)| columns[col][row])
    }

    #[test]
    fn overlapping_box_is_suppressed() -> Result<()> {
        let rects = [
            TLBR::from_xyxy([0.0, 0.0, 100.0, 100.0]),
            // IoU 0.9 with the first box
            TLBR::from_xyxy([0.0, 0.0, 100.0, 90.0]),
            TLBR::from_xyxy([200.0, 200.0, 250.0, 250.0]),
        ];
        let scores = scores(&[&[0.9, 0.85, 0.2]]);
        assert_abs_diff_eq!(rects[0].iou_with(&rects[1]), 0.9, epsilon = 1e-6);

        let detections = filter(0.5, 0.5, 5).forward(&rects, scores.view())?;

        assert_eq!(detections.len(), 5);
        assert_eq!(detections.num_valid(), 1);
        let first = detections.iter().next().unwrap();
        assert_eq!(first.rect, rects[0]);
        assert_abs_diff_eq!(first.score, 0.9);
        assert_eq!(first.class, 0);
        assert!(detections.iter().skip(1).all(|det| *det == Detection::sentinel()));
        Ok(())
    }

    #[test]
    fn threshold_one_suppresses_nothing() -> Result<()> {
        let rects = vec![TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]); 4];
        let scores = [0.9, 0.8, 0.7, 0.1];
        let nms = NonMaxSuppressionInit {
            iou_threshold: r64(1.0),
            ..Default::default()
        }
        .build()?;
        assert_eq!(nms.forward(&rects, &scores)?, vec![0, 1, 2, 3]);

        let detections = filter(0.5, 1.0, 10).forward(&rects, self::scores(&[&scores]).view())?;
        assert_eq!(detections.num_valid(), 3);
        Ok(())
    }

    #[test]
    fn threshold_zero_keeps_one_per_cluster() -> Result<()> {
        let rects = [
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
            TLBR::from_xyxy([9.0, 9.0, 19.0, 19.0]),
            TLBR::from_xyxy([50.0, 50.0, 60.0, 60.0]),
            TLBR::from_xyxy([5.0, 5.0, 12.0, 12.0]),
            TLBR::from_xyxy([55.0, 52.0, 58.0, 70.0]),
        ];
        let scores = [0.3, 0.9, 0.5, 0.4, 0.6];
        let nms = NonMaxSuppressionInit {
            iou_threshold: r64(0.0),
            ..Default::default()
        }
        .build()?;
        assert_eq!(nms.forward(&rects, &scores)?, vec![1, 4]);
        Ok(())
    }

    #[test]
    fn equal_scores_prefer_earlier_index() -> Result<()> {
        let rects = [
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
            TLBR::from_xyxy([1.0, 0.0, 11.0, 10.0]),
            TLBR::from_xyxy([0.0, 1.0, 10.0, 11.0]),
        ];
        let scores = [0.7, 0.7, 0.7];
        let nms = NonMaxSuppressionInit::default().build()?;
        assert_eq!(nms.forward(&rects, &scores)?, vec![0]);
        Ok(())
    }

    #[test]
    fn kept_boxes_are_capped() -> Result<()> {
        // disjoint boxes with scores rising by index
        let rects: Vec<_> = (0..2000)
            .map(|index| {
                let x = index as f32 * 20.0;
                TLBR::from_xyxy([x, 0.0, x + 10.0, 10.0])
            })
            .collect();
        let scores: Vec<f32> = (0..2000).map(|index| index as f32 / 2000.0).collect();

        let nms = NonMaxSuppressionInit {
            max_outputs: Some(3),
            ..Default::default()
        }
        .build()?;
        assert_eq!(nms.forward(&rects, &scores)?, vec![1999, 1998, 1997]);

        // the cap yields a prefix of the unbounded result
        let unbounded = NonMaxSuppressionInit::default().build()?;
        let all = unbounded.forward(&rects, &scores)?;
        assert_eq!(all.len(), 2000);
        assert_eq!(all[0..3], [1999, 1998, 1997]);

        let detections = filter(0.5, 0.5, 5).forward(&rects, self::scores(&[&scores]).view())?;
        assert_eq!(detections.num_valid(), 5);
        assert_abs_diff_eq!(detections.iter().next().unwrap().score, 0.9995);

        let init = NonMaxSuppressionInit {
            max_outputs: Some(0),
            ..Default::default()
        };
        assert!(init.build().is_err());
        Ok(())
    }

    #[test]
    fn score_equal_to_threshold_is_kept() -> Result<()> {
        let rects = [
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
            TLBR::from_xyxy([20.0, 0.0, 30.0, 10.0]),
        ];
        // 0.25 is exact in both f32 and f64
        let below = 0.25_f32 - f32::EPSILON;
        let scores = scores(&[&[0.25, below]]);

        let detections = filter(0.25, 0.5, 4).forward(&rects, scores.view())?;
        let valid: Vec<_> = detections
            .valid()
            .map(|det| (det.rect.clone(), det.score))
            .collect();
        assert_eq!(valid, vec![(rects[0].clone(), 0.25)]);
        Ok(())
    }

    #[test]
    fn classes_are_suppressed_independently() -> Result<()> {
        let rects = [
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
            TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]),
        ];
        let scores = scores(&[&[0.9, 0.1], &[0.2, 0.8]]);

        let detections = filter(0.5, 0.5, 4).forward(&rects, scores.view())?;
        let valid: Vec<_> = detections
            .valid()
            .map(|det| (det.class, det.score))
            .collect();
        assert_eq!(valid, vec![(0, 0.9), (1, 0.8)]);
        Ok(())
    }

    #[test]
    fn merged_detections_are_truncated() -> Result<()> {
        let rects: Vec<_> = (0..6)
            .map(|index| {
                let x = index as f32 * 20.0;
                TLBR::from_xyxy([x, 0.0, x + 10.0, 10.0])
            })
            .collect();
        let scores = scores(&[
            &[0.6, 0.0, 0.9, 0.0, 0.7, 0.0],
            &[0.0, 0.95, 0.0, 0.65, 0.0, 0.8],
        ]);

        let detections = filter(0.5, 0.5, 4).forward(&rects, scores.view())?;
        let valid: Vec<_> = detections.valid().map(|det| det.score).collect();
        assert_eq!(valid, vec![0.95, 0.9, 0.8, 0.7]);
        assert_eq!(detections.len(), 4);
        Ok(())
    }

    #[test]
    fn empty_input_yields_sentinels() -> Result<()> {
        let detections = filter(0.5, 0.5, 3).forward(&[], Array2::<f32>::zeros((0, 4)).view())?;
        assert_eq!(detections.len(), 3);
        assert_eq!(detections.num_valid(), 0);

        let rects = [TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0])];
        let detections = filter(0.5, 0.5, 3).forward(&rects, scores(&[&[0.1]]).view())?;
        assert!(detections.iter().all(Detection::is_sentinel));
        Ok(())
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let rects = [TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0])];
        assert!(filter(0.5, 0.5, 3)
            .forward(&rects, Array2::<f32>::zeros((2, 1)).view())
            .is_err());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let init = DetectionFilterInit {
            max_detections: 0,
            ..Default::default()
        };
        assert!(init.build().is_err());

        let init = DetectionFilterInit {
            nms_iou_threshold: r64(1.5),
            ..Default::default()
        };
        assert!(init.build().is_err());
    }
}
