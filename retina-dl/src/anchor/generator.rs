use crate::{common::*, pyramid::feature_shapes};

/// The number of pyramid levels a detector configuration describes.
pub const NUM_PYRAMID_LEVELS: usize = 5;

/// The descriptor of one pyramid level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// The downsampling factor from the input image to the feature map.
    pub stride: usize,
    /// The canonical anchor size at this level.
    pub size: R64,
}

/// The size of anchors generated from one `(ratio, scale)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorShape {
    pub ratio: f32,
    pub scale: f32,
    pub h: f64,
    pub w: f64,
}

/// A reference box with the parameters it is generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub rect: TLBR<f32>,
    pub level: usize,
    pub stride: usize,
    pub size: f32,
    pub ratio: f32,
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct AnchorGeneratorInit {
    pub sizes: Vec<R64>,
    pub strides: Vec<usize>,
    pub ratios: Vec<R64>,
    pub scales: Vec<R64>,
}

impl Default for AnchorGeneratorInit {
    fn default() -> Self {
        use crate::config::{
            default_anchor_ratios, default_anchor_scales, default_anchor_sizes,
            default_anchor_strides,
        };

        Self {
            sizes: default_anchor_sizes(),
            strides: default_anchor_strides(),
            ratios: default_anchor_ratios(),
            scales: default_anchor_scales(),
        }
    }
}

impl AnchorGeneratorInit {
    pub fn build(self) -> Result<AnchorGenerator> {
        let Self {
            sizes,
            strides,
            ratios,
            scales,
        } = self;

        ensure!(
            sizes.len() == NUM_PYRAMID_LEVELS,
            "expect {} anchor sizes, but get {}",
            NUM_PYRAMID_LEVELS,
            sizes.len()
        );
        ensure!(
            strides.len() == NUM_PYRAMID_LEVELS,
            "expect {} anchor strides, but get {}",
            NUM_PYRAMID_LEVELS,
            strides.len()
        );
        ensure!(!ratios.is_empty(), "anchor_ratios must not be empty");
        ensure!(!scales.is_empty(), "anchor_scales must not be empty");
        ensure!(
            sizes.iter().all(|&size| size > 0.0),
            "anchor sizes must be positive"
        );
        ensure!(
            strides.iter().all(|&stride| stride > 0),
            "anchor strides must be positive"
        );
        ensure!(
            strides.iter().tuple_windows().all(|(prev, next)| prev < next),
            "anchor strides must be strictly increasing, but get {:?}",
            strides
        );
        ensure!(
            ratios.iter().all(|&ratio| ratio > 0.0),
            "anchor ratios must be positive"
        );
        ensure!(
            scales.iter().all(|&scale| scale > 0.0),
            "anchor scales must be positive"
        );

        let levels: Vec<_> = izip!(strides, sizes)
            .map(|(stride, size)| PyramidLevel { stride, size })
            .collect();

        Ok(AnchorGenerator {
            levels,
            ratios,
            scales,
        })
    }
}

/// Generates anchors for every cell of every pyramid feature map.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct AnchorGenerator {
    #[getset(get = "pub")]
    levels: Vec<PyramidLevel>,
    #[getset(get = "pub")]
    ratios: Vec<R64>,
    #[getset(get = "pub")]
    scales: Vec<R64>,
}

impl AnchorGenerator {
    pub fn strides(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.stride).collect()
    }

    pub fn num_anchors_per_cell(&self) -> usize {
        self.ratios.len() * self.scales.len()
    }

    /// The total number of anchors for the given feature map shapes.
    pub fn num_anchors(&self, feature_shapes: &[HW<usize>]) -> usize {
        feature_shapes
            .iter()
            .map(|shape| shape.area() * self.num_anchors_per_cell())
            .sum()
    }

    /// The parameters of a pyramid level.
    pub fn level(&self, level_index: usize) -> Result<&PyramidLevel> {
        self.levels.get(level_index).ok_or_else(|| {
            format_err!(
                "pyramid level {} is out of range [0, {})",
                level_index,
                self.levels.len()
            )
        })
    }

    /// The anchor sizes of one cell at a level, ratio-major and scale-minor.
    pub fn anchor_shapes(&self, level_index: usize) -> Result<Vec<AnchorShape>> {
        let size = self.level(level_index)?.size.raw();

        let shapes = iproduct!(&self.ratios, &self.scales)
            .map(|(&ratio, &scale)| {
                let ratio = ratio.raw();
                let scale = scale.raw();
                let area = (size * scale).powi(2);
                let w = (area / ratio).sqrt();
                let h = w * ratio;

                AnchorShape {
                    ratio: ratio as f32,
                    scale: scale as f32,
                    h,
                    w,
                }
            })
            .collect();
        Ok(shapes)
    }

    /// Generate the anchors of one pyramid level.
    ///
    /// The anchors are emitted in row-major order over the cells, and the
    /// anchors of a cell follow the order of [Self::anchor_shapes].
    pub fn generate_level(
        &self,
        level_index: usize,
        feature_shape: &HW<usize>,
    ) -> Result<Vec<Anchor>> {
        let PyramidLevel { stride, size } = *self.level(level_index)?;
        let shapes = self.anchor_shapes(level_index)?;
        let stride_f = stride as f64;

        iproduct!(0..feature_shape.h(), 0..feature_shape.w(), &shapes)
            .map(|(row, col, shape)| -> Result<_> {
                let cy = (row as f64 + 0.5) * stride_f;
                let cx = (col as f64 + 0.5) * stride_f;
                let AnchorShape { ratio, scale, h, w } = *shape;
                let rect: TLBR<f64> = CyCxHW::try_centered_at(cy, cx, h, w)?.into();

                Ok(Anchor {
                    rect: rect.cast(),
                    level: level_index,
                    stride,
                    size: size.raw() as f32,
                    ratio,
                    scale,
                })
            })
            .try_collect()
    }

    /// Generate anchors for all levels and concatenate them from the finest level to the coarsest.
    pub fn generate(
        &self,
        image_size: &HW<usize>,
        feature_shapes: &[HW<usize>],
    ) -> Result<AnchorSet> {
        ensure!(
            feature_shapes.len() == self.levels.len(),
            "expect {} feature maps, but get {}",
            self.levels.len(),
            feature_shapes.len()
        );

        let mut anchors = Vec::with_capacity(self.num_anchors(feature_shapes));
        let mut level_offsets = Vec::with_capacity(feature_shapes.len() + 1);
        level_offsets.push(0);

        for (level_index, shape) in feature_shapes.iter().enumerate() {
            anchors.extend(self.generate_level(level_index, shape)?);
            level_offsets.push(anchors.len());
        }

        Ok(AnchorSet {
            image_size: *image_size,
            feature_shapes: feature_shapes.to_vec(),
            anchors,
            level_offsets,
        })
    }

    /// Generate anchors for an input image, deriving the feature map shapes from the strides.
    pub fn generate_for_image(&self, image_size: &HW<usize>) -> Result<AnchorSet> {
        ensure!(
            image_size.h() > 0 && image_size.w() > 0,
            "image height and width must be positive"
        );
        let shapes = feature_shapes(image_size, &self.strides());
        self.generate(image_size, &shapes)
    }
}

/// The concatenated anchors of all pyramid levels for one input shape.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct AnchorSet {
    #[getset(get = "pub")]
    image_size: HW<usize>,
    #[getset(get = "pub")]
    feature_shapes: Vec<HW<usize>>,
    #[getset(get = "pub")]
    anchors: Vec<Anchor>,
    level_offsets: Vec<usize>,
}

impl AnchorSet {
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn num_levels(&self) -> usize {
        self.feature_shapes.len()
    }

    /// The index range of anchors belonging to a pyramid level.
    pub fn level_range(&self, level_index: usize) -> Result<Range<usize>> {
        ensure!(
            level_index < self.num_levels(),
            "pyramid level {} is out of range [0, {})",
            level_index,
            self.num_levels()
        );
        Ok(self.level_offsets[level_index]..self.level_offsets[level_index + 1])
    }

    pub fn rects(&self) -> impl Iterator<Item = &TLBR<f32>> + '_ {
        self.anchors.iter().map(|anchor| &anchor.rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_per_level() -> Result<()> {
        let generator = AnchorGeneratorInit::default().build()?;
        let anchors = generator.generate_level(0, &HW::from_hw([7, 5]))?;
        assert_eq!(anchors.len(), 7 * 5 * 3 * 3);
        Ok(())
    }

    #[test]
    fn anchor_count_over_pyramid() -> Result<()> {
        let generator = AnchorGeneratorInit::default().build()?;
        let shapes: Vec<_> = [64, 32, 16, 8, 4]
            .into_iter()
            .map(|side| HW::from_hw([side, side]))
            .collect();
        let anchors = generator.generate(&HW::from_hw([512, 512]), &shapes)?;

        // 9 * (64² + 32² + 16² + 8² + 4²)
        assert_eq!(anchors.len(), 49104);
        assert_eq!(generator.num_anchors(&shapes), 49104);
        assert_eq!(anchors.level_range(0)?, 0..36864);
        assert_eq!(anchors.level_range(4)?, 48960..49104);

        // the same shapes come out of the image size
        let from_image = generator.generate_for_image(&HW::from_hw([512, 512]))?;
        assert_eq!(from_image, anchors);
        Ok(())
    }

    #[test]
    fn anchor_geometry() -> Result<()> {
        let generator = AnchorGeneratorInit {
            ratios: vec![r64(0.5), r64(2.0)],
            scales: vec![r64(1.0), r64(2.0)],
            ..Default::default()
        }
        .build()?;

        let anchors = generator.generate_level(0, &HW::from_hw([2, 3]))?;

        // the first cell is centered at (4, 4)
        for anchor in &anchors[0..4] {
            assert_abs_diff_eq!(anchor.rect.cx(), 4.0, epsilon = 1e-4);
            assert_abs_diff_eq!(anchor.rect.cy(), 4.0, epsilon = 1e-4);
            let area = (32.0 * anchor.scale).powi(2);
            assert_abs_diff_eq!(anchor.rect.area(), area, epsilon = 1e-1);
            assert_abs_diff_eq!(
                anchor.rect.h() / anchor.rect.w(),
                anchor.ratio,
                epsilon = 1e-4
            );
        }

        // ratio-major, scale-minor within a cell
        let params: Vec<_> = anchors[0..4]
            .iter()
            .map(|anchor| (anchor.ratio, anchor.scale))
            .collect();
        assert_eq!(params, vec![(0.5, 1.0), (0.5, 2.0), (2.0, 1.0), (2.0, 2.0)]);

        // row-major over cells: the second cell is one stride to the right
        assert_abs_diff_eq!(anchors[4].rect.cx(), 12.0, epsilon = 1e-4);
        assert_abs_diff_eq!(anchors[4].rect.cy(), 4.0, epsilon = 1e-4);

        // the fourth cell starts the second row
        assert_abs_diff_eq!(anchors[12].rect.cx(), 4.0, epsilon = 1e-4);
        assert_abs_diff_eq!(anchors[12].rect.cy(), 12.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn ratio_one_anchor_is_square() -> Result<()> {
        let generator = AnchorGeneratorInit {
            ratios: vec![r64(1.0)],
            scales: vec![r64(1.0)],
            ..Default::default()
        }
        .build()?;
        let anchors = generator.generate_level(2, &HW::from_hw([1, 1]))?;
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].rect.xyxy(), [-48.0, -48.0, 80.0, 80.0]);
        assert_eq!(anchors[0].stride, 32);
        Ok(())
    }

    #[test]
    fn out_of_range_level_is_rejected() -> Result<()> {
        let generator = AnchorGeneratorInit::default().build()?;
        assert!(generator.level(5).is_err());
        assert!(generator.anchor_shapes(5).is_err());
        assert!(generator.generate_level(5, &HW::from_hw([2, 2])).is_err());

        let anchors = generator.generate_for_image(&HW::from_hw([64, 64]))?;
        assert_eq!(anchors.level_range(4)?.end, anchors.len());
        assert!(anchors.level_range(5).is_err());
        Ok(())
    }

    #[test]
    fn malformed_configuration_fails() {
        let init = AnchorGeneratorInit {
            sizes: vec![r64(32.0), r64(64.0)],
            ..Default::default()
        };
        assert!(init.build().is_err());

        let init = AnchorGeneratorInit {
            strides: vec![8, 16, 32, 64],
            ..Default::default()
        };
        assert!(init.build().is_err());

        let init = AnchorGeneratorInit {
            strides: vec![8, 32, 16, 64, 128],
            ..Default::default()
        };
        assert!(init.build().is_err());

        let init = AnchorGeneratorInit {
            ratios: vec![],
            ..Default::default()
        };
        assert!(init.build().is_err());

        let init = AnchorGeneratorInit {
            scales: vec![r64(1.0), r64(-2.0)],
            ..Default::default()
        };
        assert!(init.build().is_err());
    }
}
