//! Rectangles for detections and regions of interest.
//!
//! All coordinates are in pixels of some image, with X pointing right and Y pointing down.

use nalgebra::{Point2, Rotation2, Vector2};

/// An axis-aligned rectangle.
///
/// Rectangles are allowed to have zero height and/or width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    center: Point2<f32>,
    size: Vector2<f32>,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: Point2::new(x_center, y_center),
            size: Vector2::new(width, height),
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_center(x + width * 0.5, y + height * 0.5, width, height)
    }

    /// Computes the bounding rectangle of `points`.
    ///
    /// Returns [`None`] if `points` is empty.
    pub fn bounding<I: IntoIterator<Item = Point2<f32>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
        Some(Self::from_top_left(min.x, min.y, max.x - min.x, max.y - min.y))
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.center.x - self.size.x * 0.5
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.center
    }

    #[inline]
    pub fn top_left(&self) -> Point2<f32> {
        Point2::new(self.x(), self.y())
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Scales width and height by `scale`, keeping the center in place.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Adds `amount` times the width to the left and right, and `amount` times the height to the
    /// top and bottom.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.scale(1.0 + 2.0 * amount)
    }

    /// Symmetrically extends one dimension so that `width / height == aspect`.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, aspect: f32) -> Self {
        let mut res = *self;
        let target_width = self.height() * aspect;
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / aspect;
        }
        res
    }

    #[must_use]
    pub fn move_by(&self, dx: f32, dy: f32) -> Self {
        Self {
            center: self.center + Vector2::new(dx, dy),
            size: self.size,
        }
    }

    /// Computes the intersection of `self` and `other`, or [`None`] if they don't overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.top_left().sup(&other.top_left());
        let max = (self.top_left() + self.size).inf(&(other.top_left() + other.size));
        if min.x > max.x || min.y > max.y {
            return None;
        }
        Rect::bounding([min, max])
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection(other).map_or(0.0, |r| r.area());
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Returns the corners, clockwise starting at the top left.
    pub fn corners(&self) -> [Point2<f32>; 4] {
        let [x, y] = [self.x(), self.y()];
        let [w, h] = [self.width(), self.height()];
        [
            Point2::new(x, y),
            Point2::new(x + w, y),
            Point2::new(x + w, y + h),
            Point2::new(x, y + h),
        ]
    }
}

/// A [`Rect`], rotated around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    rect: Rect,
    radians: f32,
}

impl RotatedRect {
    /// Creates a rotated rectangle.
    ///
    /// `radians` is the clockwise rotation (as seen on screen) applied to `rect`.
    #[inline]
    pub fn new(rect: Rect, radians: f32) -> Self {
        Self { rect, radians }
    }

    /// Computes the smallest rectangle with the given rotation that contains all `points`.
    ///
    /// Returns [`None`] if `points` is empty.
    pub fn bounding<I: IntoIterator<Item = Point2<f32>>>(radians: f32, points: I) -> Option<Self> {
        // Rotate everything into the rectangle's frame, bound it there, and rotate the center back.
        let into = Rotation2::new(-radians);
        let bounds = Rect::bounding(points.into_iter().map(|p| into * p))?;
        let center = Rotation2::new(radians) * bounds.center();
        Some(Self::new(
            Rect::from_center(center.x, center.y, bounds.width(), bounds.height()),
            radians,
        ))
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    #[inline]
    pub fn rotation_radians(&self) -> f32 {
        self.radians
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.rect.center()
    }

    /// Applies `f` to the underlying non-rotated [`Rect`].
    #[must_use]
    pub fn map(mut self, f: impl FnOnce(Rect) -> Rect) -> Self {
        self.rect = f(self.rect);
        self
    }

    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        self.map(|rect| rect.grow_rel(amount))
    }

    #[must_use]
    pub fn grow_to_fit_aspect(&self, aspect: f32) -> Self {
        self.map(|rect| rect.grow_to_fit_aspect(aspect))
    }

    /// Returns the axis-aligned bounding rectangle of the rotated corners.
    pub fn bounding_rect(&self) -> Rect {
        let rot = Rotation2::new(self.radians);
        let center = self.rect.center();
        let corners = self.rect.corners().map(|p| center + rot * (p - center));
        // `corners` is never empty.
        Rect::bounding(corners).unwrap_or(self.rect)
    }

    /// Transforms a point from the parent image into the rectangle's own coordinate system.
    ///
    /// The origin of the inner system is the top left corner of the (unrotated) rectangle.
    pub fn transform_in(&self, pt: Point2<f32>) -> Point2<f32> {
        let half = self.rect.size * 0.5;
        let rel = pt - self.rect.center();
        Point2::from(Rotation2::new(-self.radians) * rel + half)
    }

    /// Transforms a point from the rectangle's coordinate system to the parent image.
    pub fn transform_out(&self, pt: Point2<f32>) -> Point2<f32> {
        let half = self.rect.size * 0.5;
        self.rect.center() + Rotation2::new(self.radians) * (pt.coords - half)
    }
}

impl From<Rect> for RotatedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect, 0.0)
    }
}
