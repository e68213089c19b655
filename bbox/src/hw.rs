use crate::common::*;

/// The height and width of an image or a feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HW<T> {
    h: T,
    w: T,
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw(hw: [T; 2]) -> Result<Self> {
        let [h, w] = hw;
        let zero = T::zero();
        ensure!(
            h >= zero && w >= zero,
            "height and width parameters must be non-negative"
        );
        Ok(Self { h, w })
    }

    pub fn from_hw(hw: [T; 2]) -> Self {
        Self::try_from_hw(hw).unwrap()
    }

    pub fn area(&self) -> T {
        self.w * self.h
    }

    /// The element-wise maximum of two sizes.
    pub fn max(&self, other: &Self) -> Self {
        let h = if other.h > self.h { other.h } else { self.h };
        let w = if other.w > self.w { other.w } else { self.w };
        Self { h, w }
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn hw(&self) -> [T; 2] {
        [self.h, self.w]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn size_area() {
        let s1 = HW::from_hw([3.0, 2.0]);
        let area: f64 = s1.area();
        assert_abs_diff_eq!(area, 6.0);
    }

    #[test]
    fn size_max() {
        let lhs = HW::from_hw([480usize, 640]);
        let rhs = HW::from_hw([512usize, 500]);
        assert_eq!(lhs.max(&rhs).hw(), [512, 640]);
    }

    #[test]
    fn negative_size_is_rejected() {
        assert!(HW::try_from_hw([-1, 3]).is_err());
    }
}
