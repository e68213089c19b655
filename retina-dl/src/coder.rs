//! Box regression encoding, decoding and clipping.

use crate::{anchor::AnchorSet, common::*, pyramid::check_alignment};

/// Converts between absolute boxes and corner offsets relative to anchors.
///
/// Each corner offset is divided by the anchor extent along its axis and by
/// `std`, so `dx1 = (x1 - ax1) / (aw * std)` and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxCoder {
    std: f32,
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self { std: 0.2 }
    }
}

impl BoxCoder {
    pub fn new(std: R64) -> Result<Self> {
        ensure!(std > 0.0, "regression_std must be positive");
        Ok(Self {
            std: std.raw() as f32,
        })
    }

    pub fn std(&self) -> f32 {
        self.std
    }

    fn scales(&self, anchor: &TLBR<f32>) -> [f32; 2] {
        [anchor.w() * self.std, anchor.h() * self.std]
    }

    /// Compute the regression target `[dx1, dy1, dx2, dy2]` from an anchor to a box.
    pub fn encode(&self, anchor: &TLBR<f32>, target: &TLBR<f32>) -> [f32; 4] {
        let [scale_x, scale_y] = self.scales(anchor);
        let [ax1, ay1, ax2, ay2] = anchor.xyxy();
        let [gx1, gy1, gx2, gy2] = target.xyxy();

        [
            (gx1 - ax1) / scale_x,
            (gy1 - ay1) / scale_y,
            (gx2 - ax2) / scale_x,
            (gy2 - ay2) / scale_y,
        ]
    }

    /// Apply regression deltas `[dx1, dy1, dx2, dy2]` to an anchor.
    ///
    /// Inverted extents in the result are collapsed to zero width or height.
    pub fn decode(&self, anchor: &TLBR<f32>, deltas: [f32; 4]) -> TLBR<f32> {
        let [scale_x, scale_y] = self.scales(anchor);
        let [ax1, ay1, ax2, ay2] = anchor.xyxy();
        let [dx1, dy1, dx2, dy2] = deltas;

        TLBR::from_xyxy_saturating([
            ax1 + dx1 * scale_x,
            ay1 + dy1 * scale_y,
            ax2 + dx2 * scale_x,
            ay2 + dy2 * scale_y,
        ])
    }

    /// Decode an `[num_anchors, 4]` regression output against its anchors.
    pub fn decode_all(
        &self,
        anchors: &AnchorSet,
        regression: ArrayView2<'_, f32>,
    ) -> Result<Vec<TLBR<f32>>> {
        check_alignment(anchors, regression.nrows(), "regression output")?;
        ensure!(
            regression.ncols() == 4,
            "regression output must have 4 columns, but get {}",
            regression.ncols()
        );

        let boxes = izip!(anchors.rects(), regression.outer_iter())
            .map(|(anchor, deltas)| {
                self.decode(anchor, [deltas[0], deltas[1], deltas[2], deltas[3]])
            })
            .collect();
        Ok(boxes)
    }
}

/// Clamps boxes into the pixel range of an image.
///
/// `x` coordinates are clamped to `[0, W - 1]` and `y` coordinates to
/// `[0, H - 1]`. Boxes are never dropped here.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxClipper {
    max_y: f32,
    max_x: f32,
}

impl BoxClipper {
    pub fn new(image_size: &HW<usize>) -> Result<Self> {
        ensure!(
            image_size.h() > 0 && image_size.w() > 0,
            "image height and width must be positive"
        );
        Ok(Self {
            max_y: (image_size.h() - 1) as f32,
            max_x: (image_size.w() - 1) as f32,
        })
    }

    pub fn clip(&self, rect: &TLBR<f32>) -> TLBR<f32> {
        rect.clamp_to(self.max_y, self.max_x)
    }

    pub fn clip_all(&self, boxes: &mut [TLBR<f32>]) {
        boxes.iter_mut().for_each(|rect| *rect = self.clip(rect));
    }
}
