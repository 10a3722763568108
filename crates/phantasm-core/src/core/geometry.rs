use itertools::{Itertools, MinMaxResult};
use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};

/// An axis-aligned rectangle in the (x, y) plane, half-open on its upper edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Rect {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// `min <= p < max` on both axes.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min[0] && x < self.max[0] && y >= self.min[1] && y < self.max[1]
    }

    /// Grows the rectangle by `margin` on every side.
    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min: [self.min[0] - margin, self.min[1] - margin],
            max: [self.max[0] + margin, self.max[1] + margin],
        }
    }
}

/// An axis-aligned box in three dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl BoundingBox {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// The tightest box around `points`, or `None` when there are no points.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3<f64>>,
        I::IntoIter: Clone,
    {
        let points = points.into_iter();
        let axis = |i: usize| match points.clone().map(|p| p[i]).minmax_by(|a, b| a.total_cmp(b)) {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(v) => Some((v, v)),
            MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
        };
        let (x0, x1) = axis(0)?;
        let (y0, y1) = axis(1)?;
        let (z0, z1) = axis(2)?;
        Some(Self::new(Point3::new(x0, y0, z0), Point3::new(x1, y1, z1)))
    }

    pub fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    pub fn half_diagonal(&self) -> f64 {
        self.extent().norm() / 2.0
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

pub fn rotation_from_axis_angle(axis: &Vector3<f64>, angle_degrees: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(*axis), angle_degrees.to_radians())
}

/// Rotates `p` about `centre` and then subtracts `shift`.
#[inline]
pub fn rotate_about(
    p: &Point3<f64>,
    orientation: &UnitQuaternion<f64>,
    centre: &Point3<f64>,
    shift: &Vector3<f64>,
) -> Point3<f64> {
    centre + orientation * (p - centre) - shift
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn rect_contains_is_half_open() {
        let rect = Rect::new([0.0, 0.0], [10.0, 5.0]);
        assert!(rect.contains(0.0, 0.0));
        assert!(rect.contains(9.999, 4.999));
        assert!(!rect.contains(10.0, 1.0));
        assert!(!rect.contains(1.0, 5.0));
        assert!(!rect.contains(-0.001, 1.0));
    }

    #[test]
    fn rect_padding_grows_every_side() {
        let rect = Rect::new([0.0, 0.0], [4.0, 4.0]).padded(1.5);
        assert_eq!(rect.min, [-1.5, -1.5]);
        assert_eq!(rect.max, [5.5, 5.5]);
        assert!(!rect.is_empty());
        assert!(Rect::new([1.0, 1.0], [1.0, 2.0]).is_empty());
    }

    #[test]
    fn bounding_box_from_points_is_tight() {
        let points = vec![
            Point3::new(1.0, -2.0, 3.0),
            Point3::new(-1.0, 4.0, 0.0),
            Point3::new(0.5, 0.0, 7.0),
        ];
        let bbox = BoundingBox::from_points(&points).unwrap();
        assert_eq!(bbox.min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(bbox.max, Point3::new(1.0, 4.0, 7.0));
        assert_eq!(bbox.centre(), Point3::new(0.0, 1.0, 3.5));
    }

    #[test]
    fn bounding_box_of_no_points_is_none() {
        let points: Vec<Point3<f64>> = Vec::new();
        assert!(BoundingBox::from_points(&points).is_none());
    }

    #[test]
    fn rotate_about_quarter_turn_around_x() {
        let rotation = rotation_from_axis_angle(&Vector3::x(), 90.0);
        let centre = Point3::new(0.0, 5.0, 5.0);
        let p = Point3::new(1.0, 5.0, 6.0);
        let rotated = rotate_about(&p, &rotation, &centre, &Vector3::zeros());
        assert_close(rotated.x, 1.0);
        assert_close(rotated.y, 4.0);
        assert_close(rotated.z, 5.0);
    }

    #[test]
    fn rotate_about_applies_shift_after_rotation() {
        let identity = UnitQuaternion::identity();
        let p = Point3::new(1.0, 2.0, 3.0);
        let moved = rotate_about(&p, &identity, &Point3::origin(), &Vector3::new(1.0, 0.0, -1.0));
        assert_eq!(moved, Point3::new(0.0, 2.0, 4.0));
    }
}
