//! Geometry of proxy objects.
//!
//! Objects expose their on-screen geometry in one of three ways. They are
//! probed in order: a `globalRect` rectangle, a `center_x`/`center_y` pair,
//! then separate `x`, `y`, `width` and `height` attributes.

use super::ProxyObject;
use crate::result::{ProbeError, ProbeResult};
use crate::value::{Point, PropertyValue, Rectangle};

/// On-screen geometry of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `globalRect`
    Rectangle(Rectangle),
    /// `center_x` and `center_y`
    CenterPoint(Point),
    /// `x`, `y`, `width` and `height`
    BoundingBox(Rectangle),
}

impl Shape {
    /// Center of the shape
    #[must_use]
    pub const fn center_point(&self) -> Point {
        match self {
            Self::Rectangle(rect) | Self::BoundingBox(rect) => {
                let (x, y) = rect.center();
                Point { x, y }
            }
            Self::CenterPoint(point) => *point,
        }
    }

    /// Position used to detect movement: the top left corner, or the center
    /// when that is all the object exposes
    #[must_use]
    pub const fn position(&self) -> Point {
        match self {
            Self::Rectangle(rect) | Self::BoundingBox(rect) => Point {
                x: rect.x,
                y: rect.y,
            },
            Self::CenterPoint(point) => *point,
        }
    }
}

impl ProxyObject {
    /// Current geometry, read with a single refresh
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CapabilityUnavailable`] if the object exposes
    /// no geometry, and [`ProbeError::StateNotFound`] if it was destroyed
    pub fn shape(&self) -> ProbeResult<Shape> {
        self.refresh_state()?;
        let state = self.state.borrow();
        let int = |name: &str| state.get(name).and_then(PropertyValue::as_i64);

        if let Some(rect) = state.get("globalRect").and_then(PropertyValue::as_rectangle) {
            return Ok(Shape::Rectangle(rect));
        }
        if let (Some(x), Some(y)) = (int("center_x"), int("center_y")) {
            return Ok(Shape::CenterPoint(Point { x, y }));
        }
        if let (Some(x), Some(y), Some(width), Some(height)) =
            (int("x"), int("y"), int("width"), int("height"))
        {
            return Ok(Shape::BoundingBox(Rectangle::new(x, y, width, height)));
        }
        Err(ProbeError::CapabilityUnavailable {
            class_name: self.class_name().to_string(),
            capability: "shape".to_string(),
        })
    }

    /// Center of the object's geometry
    ///
    /// # Errors
    ///
    /// See [`ProxyObject::shape`]
    pub fn center_point(&self) -> ProbeResult<Point> {
        self.shape().map(|shape| shape.center_point())
    }
}
