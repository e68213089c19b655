//! Feature pyramid shapes and the composition of per-level outputs.
//!
//! The network predicts per pyramid level. Each level output is flattened over
//! spatial cells in row-major order, with the anchors of one cell laid out
//! consecutively, and the levels are concatenated from the finest stride to
//! the coarsest. [AnchorSet](crate::anchor::AnchorSet) follows the same
//! layout, so row `i` of a composed output belongs to anchor `i`.

use crate::{anchor::AnchorSet, common::*};

/// The backbone capability this crate depends on: the spatial shape of each
/// pyramid feature map for an input image.
pub trait FeatureExtractor {
    fn feature_shapes(&self, image_size: &HW<usize>) -> Vec<HW<usize>>;
}

/// A feature extractor described only by its per-level strides.
///
/// A feature map at stride `s` covers `ceil(h / s) × ceil(w / s)` cells,
/// which is what a chain of stride-2 "same"-padded convolutions produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StridedFeatureExtractor {
    pub strides: Vec<usize>,
}

impl FeatureExtractor for StridedFeatureExtractor {
    fn feature_shapes(&self, image_size: &HW<usize>) -> Vec<HW<usize>> {
        feature_shapes(image_size, &self.strides)
    }
}

/// Compute the feature map shape at each stride for an image.
pub fn feature_shapes(image_size: &HW<usize>, strides: &[usize]) -> Vec<HW<usize>> {
    strides
        .iter()
        .map(|&stride| {
            let h = (image_size.h() + stride - 1) / stride;
            let w = (image_size.w() + stride - 1) / stride;
            HW::from_hw([h, w])
        })
        .collect()
}

/// Concatenate per-level head outputs along the anchor axis.
pub fn concat_levels(levels: &[ArrayView2<'_, f32>]) -> Result<Array2<f32>> {
    ensure!(!levels.is_empty(), "at least one pyramid level is required");
    let num_cols = levels[0].ncols();
    ensure!(
        levels.iter().all(|level| level.ncols() == num_cols),
        "all pyramid levels must have {} columns",
        num_cols
    );
    let output = concatenate(Axis(0), levels)?;
    Ok(output)
}

/// Concatenate per-level head outputs and verify them against the anchors of each level.
pub fn compose_levels(anchors: &AnchorSet, levels: &[ArrayView2<'_, f32>]) -> Result<Array2<f32>> {
    ensure!(
        levels.len() == anchors.num_levels(),
        "expect {} pyramid levels, but get {}",
        anchors.num_levels(),
        levels.len()
    );

    levels
        .iter()
        .enumerate()
        .try_for_each(|(index, level)| -> Result<_> {
            let expect = anchors.level_range(index)?.len();
            ensure!(
                level.nrows() == expect,
                "pyramid level {} has {} rows, but {} anchors are generated for it",
                index,
                level.nrows(),
                expect
            );
            Ok(())
        })?;

    concat_levels(levels)
}

/// Check that a concatenated output of `num_rows` rows is index-aligned with the anchors.
pub fn check_alignment(anchors: &AnchorSet, num_rows: usize, what: &str) -> Result<()> {
    ensure!(
        num_rows == anchors.len(),
        "{} has {} rows, but {} anchors are generated for image size {:?}",
        what,
        num_rows,
        anchors.len(),
        anchors.image_size().hw()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_shapes_round_up() {
        let shapes = feature_shapes(&HW::from_hw([512, 500]), &[8, 16, 32, 64, 128]);
        let shapes: Vec<_> = shapes.iter().map(|shape| shape.hw()).collect();
        assert_eq!(
            shapes,
            vec![[64, 63], [32, 32], [16, 16], [8, 8], [4, 4]]
        );
    }

    #[test]
    fn concat_levels_keeps_level_order() -> Result<()> {
        let fine = Array2::from_elem((3, 2), 1f32);
        let coarse = Array2::from_elem((1, 2), 2f32);
        let output = concat_levels(&[fine.view(), coarse.view()])?;
        assert_eq!(output.nrows(), 4);
        assert_eq!(output.row(2).to_vec(), vec![1.0, 1.0]);
        assert_eq!(output.row(3).to_vec(), vec![2.0, 2.0]);
        Ok(())
    }

    #[test]
    fn concat_levels_rejects_mismatched_columns() {
        let lhs = Array2::<f32>::zeros((3, 2));
        let rhs = Array2::<f32>::zeros((1, 4));
        assert!(concat_levels(&[lhs.view(), rhs.view()]).is_err());
        assert!(concat_levels(&[]).is_err());
    }
}
