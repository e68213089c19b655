use super::{CyCxHW, Rect};
use crate::common::*;

/// Bounding box in TLBR format.
///
/// In `[x1, y1, x2, y2]` terms, `l = x1`, `t = y1`, `r = x2` and `b = y2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T> {
    pub fn try_cast<V>(self) -> Option<TLBR<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(TLBR {
            t: V::from(self.t)?,
            l: V::from(self.l)?,
            b: V::from(self.b)?,
            r: V::from(self.r)?,
        })
    }

    pub fn cast<V>(self) -> TLBR<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    /// The all-zero box.
    pub fn zeros() -> Self {
        let zero = T::zero();
        Self {
            t: zero,
            l: zero,
            b: zero,
            r: zero,
        }
    }

    /// Build a box from `[x1, y1, x2, y2]`, collapsing inverted extents.
    ///
    /// If `x2 < x1` the box gets `x2 = x1`, and likewise for `y`, so the
    /// result always has non-negative width and height.
    pub fn from_xyxy_saturating(xyxy: [T; 4]) -> Self {
        let [x1, y1, x2, y2] = xyxy;
        let r = if x2 < x1 { x1 } else { x2 };
        let b = if y2 < y1 { y1 } else { y2 };
        Self { t: y1, l: x1, b, r }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> Self::Type {
        self.t
    }

    fn l(&self) -> Self::Type {
        self.l
    }

    fn b(&self) -> Self::Type {
        self.b
    }

    fn r(&self) -> Self::Type {
        self.r
    }

    fn cy(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.t + self.h() / two
    }

    fn cx(&self) -> Self::Type {
        let one = T::one();
        let two = one + one;
        self.l + self.w() / two
    }

    fn h(&self) -> Self::Type {
        self.b - self.t
    }

    fn w(&self) -> Self::Type {
        self.r - self.l
    }

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self> {
        let [cy, cx, h, w] = cycxhw;
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "h and w must be non-negative");

        let two = T::one() + T::one();
        let t = cy - h / two;
        let b = cy + h / two;
        let l = cx - w / two;
        let r = cx + w / two;

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self> {
        let [t, l, b, r] = tlbr;
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");

        Ok(Self { t, l, b, r })
    }

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self> {
        let [t, l, h, w] = tlhw;
        let b = t + h;
        let r = l + w;
        Self::try_from_tlbr([t, l, b, r])
    }
}

impl<T> From<CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: CyCxHW<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: &CyCxHW<T>) -> Self {
        let two = T::one() + T::one();
        let CyCxHW { cy, cx, h, w, .. } = *from;
        let t = cy - h / two;
        let l = cx - w / two;
        let b = cy + h / two;
        let r = cx + w / two;
        Self { t, l, b, r }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn xyxy_maps_to_tlbr() {
        let rect = TLBR::from_xyxy([1.0, 2.0, 5.0, 9.0]);
        assert_eq!(rect.tlbr(), [2.0, 1.0, 9.0, 5.0]);
        assert_eq!(rect.xyxy(), [1.0, 2.0, 5.0, 9.0]);
        assert_eq!(rect.hw(), [7.0, 4.0]);
    }

    #[test]
    fn inverted_box_is_rejected() {
        assert!(TLBR::try_from_xyxy([5.0, 0.0, 1.0, 3.0]).is_err());
    }

    #[test]
    fn saturating_collapses_inverted_extents() {
        let rect = TLBR::from_xyxy_saturating([5.0, 4.0, 1.0, 8.0]);
        assert_eq!(rect.xyxy(), [5.0, 4.0, 5.0, 8.0]);
        assert_eq!(rect.area(), 0.0);

        let rect = TLBR::from_xyxy_saturating([1.0, 4.0, 3.0, 2.0]);
        assert_eq!(rect.xyxy(), [1.0, 4.0, 3.0, 4.0]);
    }
}
