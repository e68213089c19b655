use super::{CyCxHW, TLBR};
use crate::common::*;

/// The generic rectangle.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_tlbr(tlbr: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_tlhw(tlhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_tlbr(tlbr: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_tlbr(tlbr).unwrap()
    }

    fn from_cycxhw(cycxhw: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_cycxhw(cycxhw).unwrap()
    }

    /// Build a rectangle from `[x1, y1, x2, y2]` corners.
    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized,
    {
        let [x1, y1, x2, y2] = xyxy;
        Self::try_from_tlbr([y1, x1, y2, x2])
    }

    fn from_xyxy(xyxy: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xyxy(xyxy).unwrap()
    }

    fn cycxhw(&self) -> [Self::Type; 4] {
        [self.cy(), self.cx(), self.h(), self.w()]
    }

    fn tlbr(&self) -> [Self::Type; 4] {
        [self.t(), self.l(), self.b(), self.r()]
    }

    /// The corners in `[x1, y1, x2, y2]` order.
    fn xyxy(&self) -> [Self::Type; 4] {
        [self.l(), self.t(), self.r(), self.b()]
    }

    fn hw(&self) -> [Self::Type; 2] {
        [self.h(), self.w()]
    }

    fn to_cycxhw(&self) -> CyCxHW<Self::Type> {
        CyCxHW {
            cy: self.cy(),
            cx: self.cx(),
            h: self.h(),
            w: self.w(),
        }
    }

    fn to_tlbr(&self) -> TLBR<Self::Type> {
        TLBR {
            t: self.t(),
            l: self.l(),
            b: self.b(),
            r: self.r(),
        }
    }

    fn area(&self) -> <Self::Type as Mul<Self::Type>>::Output
    where
        Self::Type: Mul<Self::Type>,
    {
        self.h() * self.w()
    }

    /// Returns true if both height and width are positive.
    fn has_positive_area(&self) -> bool {
        let zero = Self::Type::zero();
        self.h() > zero && self.w() > zero
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let t = self.t().max(other.t());
        let l = self.l().max(other.l());
        let b = self.b().min(other.b());
        let r = self.r().min(other.r());
        (b > t && r > l).then(|| TLBR { t, l, b, r })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union.
    ///
    /// It is zero when the union is empty, for example for two zero-area boxes.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > zero {
            inter_area / union_area
        } else {
            zero
        }
    }

    /// Clamp the box into `[0, max_x] × [0, max_y]`.
    ///
    /// The box is never dropped. A box lying entirely outside the range
    /// collapses onto the border with zero area.
    fn clamp_to(&self, max_y: Self::Type, max_x: Self::Type) -> TLBR<Self::Type> {
        let zero = Self::Type::zero();
        let clamp_y = |v: Self::Type| v.max(zero).min(max_y);
        let clamp_x = |v: Self::Type| v.max(zero).min(max_x);

        TLBR {
            t: clamp_y(self.t()),
            l: clamp_x(self.l()),
            b: clamp_y(self.b()),
            r: clamp_x(self.r()),
        }
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_with_itself_is_one() {
        let rect = TLBR::from_xyxy([3.0, 4.0, 13.0, 9.0]);
        assert_abs_diff_eq!(rect.iou_with(&rect), 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let lhs = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let rhs = TLBR::from_xyxy([20.0, 20.0, 30.0, 30.0]);
        assert_eq!(lhs.iou_with(&rhs), 0.0);

        // touching edges do not overlap
        let rhs = TLBR::from_xyxy([10.0, 0.0, 20.0, 10.0]);
        assert_eq!(lhs.iou_with(&rhs), 0.0);
    }

    #[test]
    fn iou_of_zero_area_boxes_is_zero() {
        let lhs = TLBR::from_xyxy([5.0, 5.0, 5.0, 5.0]);
        let rhs = lhs.clone();
        let iou: f64 = lhs.iou_with(&rhs);
        assert_eq!(iou, 0.0);
    }

    #[test]
    fn positive_area_checks_both_sides() {
        assert!(TLBR::from_xyxy([0.0, 0.0, 1.0, 2.0]).has_positive_area());
        assert!(!TLBR::from_xyxy([0.0, 0.0, 0.0, 2.0]).has_positive_area());
        assert!(!TLBR::from_xyxy([0, 3, 4, 3]).has_positive_area());
    }

    #[test]
    fn iou_partial_overlap() {
        let lhs = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let rhs = TLBR::from_xyxy([5.0, 0.0, 15.0, 10.0]);
        assert_abs_diff_eq!(lhs.iou_with(&rhs), 50.0 / 150.0);
    }

    #[test]
    fn clamp_keeps_boxes() {
        let rect = TLBR::from_xyxy([-5.0, 2.0, 120.0, 300.0]);
        let clamped = rect.clamp_to(99.0, 99.0);
        assert_eq!(clamped.xyxy(), [0.0, 2.0, 99.0, 99.0]);

        let outside = TLBR::from_xyxy([150.0, 150.0, 170.0, 160.0]);
        let clamped = outside.clamp_to(99.0, 99.0);
        assert_eq!(clamped.xyxy(), [99.0, 99.0, 99.0, 99.0]);
        assert!(!clamped.has_positive_area());
    }
}
