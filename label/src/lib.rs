use bbox::{Rect, RectNum, TLBR};
use num_traits::Num;

/// A labeled rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

/// A ground truth box in `[x1, y1, x2, y2]` pixel coordinates with a class index.
pub type GroundTruth<T> = Label<TLBR<T>, usize>;

impl<R, C> Label<R, C>
where
    R: Rect,
    R::Type: Num + PartialOrd,
{
    /// Returns true if the box can take part in anchor matching.
    ///
    /// Boxes with zero or negative area are treated as absent.
    pub fn is_valid(&self) -> bool {
        self.rect.has_positive_area()
    }
}

impl<T> Label<TLBR<T>, usize>
where
    T: Copy + Num + PartialOrd,
{
    pub fn from_xyxy(xyxy: [T; 4], class: usize) -> Self {
        Self {
            rect: TLBR::from_xyxy_saturating(xyxy),
            class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_label_is_invalid() {
        assert!(GroundTruth::from_xyxy([1.0, 1.0, 9.0, 9.0], 2).is_valid());
        assert!(!GroundTruth::from_xyxy([1.0, 1.0, 1.0, 9.0], 0).is_valid());
        assert!(!GroundTruth::from_xyxy([4.0, 4.0, 1.0, 9.0], 0).is_valid());
    }
}
