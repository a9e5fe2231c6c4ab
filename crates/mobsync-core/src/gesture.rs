//! Single-finger gesture composition and dispatch.
//!
//! A [`GesturePath`] is the ordered list of `(point, offset)` pairs of one
//! continuous contact: the finger goes down on the first point and comes up on
//! the last. Paths are turned into [`PointerAction`] sequences and dispatched
//! through [`AutomationDriver::perform_actions`].
//!
//! Directional gestures are expressed as percentages of the current
//! [`Viewport`], so the same [`Direction`] works on any resolution.
//!
//! # Example
//!
//! ```
//! use mobsync_core::gesture::{Direction, GestureComposer, Viewport};
//!
//! let composer = GestureComposer::default();
//! let path = composer.directional(Direction::ScrollDown, Viewport::new(1080, 2400));
//! assert_eq!(path.start().y, 1920);
//! assert_eq!(path.end().y, 480);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::driver::{AutomationDriver, DriverError};

/// Hold between press and the first move so the touch stack registers a drag
/// rather than a flick.
pub const DWELL: Duration = Duration::from_millis(100);

/// Duration of the move from start to end point.
pub const TRAVEL: Duration = Duration::from_millis(300);

/// Errors raised while composing or dispatching a gesture.
#[derive(Error, Debug)]
pub enum GestureError {
    /// A point of the path lies outside the screen.
    #[error("{gesture}: coordinates must be non-negative (got x={x}, y={y})")]
    InvalidCoordinates { gesture: String, x: i32, y: i32 },

    /// The viewport size could not be read.
    #[error("{gesture}: could not read viewport: {source}")]
    Viewport {
        gesture: String,
        #[source]
        source: DriverError,
    },

    /// The backend rejected or failed the pointer sequence.
    #[error("{gesture} failed: {source}")]
    Dispatch {
        gesture: String,
        #[source]
        source: DriverError,
    },
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A screen coordinate in device points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The visible screen area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// The point at `x_pct`% of the width and `y_pct`% of the height.
    pub fn at_percent(&self, x_pct: i32, y_pct: i32) -> Point {
        Point {
            x: self.width * x_pct / 100,
            y: self.height * y_pct / 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// Viewport-relative directional gestures.
///
/// Directions name the finger movement: `ScrollDown` drags from 80% to 20% of
/// the height, revealing content further down the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ScrollDown,
    ScrollUp,
    SwipeLeft,
    SwipeRight,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::ScrollDown => "scroll down",
            Direction::ScrollUp => "scroll up",
            Direction::SwipeLeft => "swipe left",
            Direction::SwipeRight => "swipe right",
        }
    }

    /// Start and end points for this direction on `viewport`.
    pub fn endpoints(&self, viewport: Viewport) -> (Point, Point) {
        match self {
            Direction::ScrollDown => (viewport.at_percent(50, 80), viewport.at_percent(50, 20)),
            Direction::ScrollUp => (viewport.at_percent(50, 20), viewport.at_percent(50, 80)),
            Direction::SwipeLeft => (viewport.at_percent(80, 50), viewport.at_percent(20, 50)),
            Direction::SwipeRight => (viewport.at_percent(20, 50), viewport.at_percent(80, 50)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "down" | "scroll-down" => Ok(Direction::ScrollDown),
            "up" | "scroll-up" => Ok(Direction::ScrollUp),
            "left" | "swipe-left" => Ok(Direction::SwipeLeft),
            "right" | "swipe-right" => Ok(Direction::SwipeRight),
            other => Err(format!(
                "Invalid direction '{}'. Use: up, down, left, right",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths and pointer actions
// ---------------------------------------------------------------------------

/// One step of a W3C-style pointer action sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    /// Move the pointer to an absolute point over `duration`.
    MoveTo { x: i32, y: i32, duration: Duration },
    /// Press the finger down at the current position.
    Down,
    /// Keep the current state for a while.
    Pause(Duration),
    /// Lift the finger.
    Up,
}

/// A point of a gesture path and its offset from the press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPoint {
    pub point: Point,
    pub offset: Duration,
}

/// Ordered contact points of one press-to-release gesture.
///
/// Consumed by [`GesturePath::into_actions`]; build a new one per gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GesturePath {
    points: Vec<PathPoint>,
}

impl GesturePath {
    /// Press and release at the same point, with no intermediate move.
    pub fn tap(point: Point) -> Self {
        Self {
            points: vec![PathPoint {
                point,
                offset: Duration::ZERO,
            }],
        }
    }

    /// Press at `point`, hold for `hold`, release.
    pub fn long_press(point: Point, hold: Duration) -> Self {
        Self {
            points: vec![
                PathPoint {
                    point,
                    offset: Duration::ZERO,
                },
                PathPoint {
                    point,
                    offset: hold,
                },
            ],
        }
    }

    /// Press at `start`, hold for `dwell`, move to `end` over `travel`, release.
    pub fn drag(start: Point, end: Point, dwell: Duration, travel: Duration) -> Self {
        let mut points = vec![PathPoint {
            point: start,
            offset: Duration::ZERO,
        }];
        if !dwell.is_zero() {
            points.push(PathPoint {
                point: start,
                offset: dwell,
            });
        }
        points.push(PathPoint {
            point: end,
            offset: dwell + travel,
        });
        Self { points }
    }

    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    /// Where the finger goes down.
    pub fn start(&self) -> Point {
        self.points[0].point
    }

    /// Where the finger comes up.
    pub fn end(&self) -> Point {
        self.points[self.points.len() - 1].point
    }

    /// Time from press to release.
    pub fn duration(&self) -> Duration {
        self.points[self.points.len() - 1].offset
    }

    /// Lower the path into a pointer action sequence.
    ///
    /// Consecutive points at the same position become a pause; anything else
    /// becomes a timed move.
    pub fn into_actions(self) -> Vec<PointerAction> {
        let first = self.points[0];
        let mut actions = vec![
            PointerAction::MoveTo {
                x: first.point.x,
                y: first.point.y,
                duration: Duration::ZERO,
            },
            PointerAction::Down,
        ];

        let mut prev = first;
        for next in self.points.into_iter().skip(1) {
            let delta = next.offset.saturating_sub(prev.offset);
            if next.point == prev.point {
                actions.push(PointerAction::Pause(delta));
            } else {
                actions.push(PointerAction::MoveTo {
                    x: next.point.x,
                    y: next.point.y,
                    duration: delta,
                });
            }
            prev = next;
        }

        actions.push(PointerAction::Up);
        actions
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

/// Builds gesture paths and dispatches them through a driver.
#[derive(Debug, Clone, Copy)]
pub struct GestureComposer {
    dwell: Duration,
    travel: Duration,
}

impl Default for GestureComposer {
    fn default() -> Self {
        Self {
            dwell: DWELL,
            travel: TRAVEL,
        }
    }
}

impl GestureComposer {
    pub fn new(dwell: Duration, travel: Duration) -> Self {
        Self { dwell, travel }
    }

    /// The path for a directional gesture on `viewport`.
    pub fn directional(&self, direction: Direction, viewport: Viewport) -> GesturePath {
        let (start, end) = direction.endpoints(viewport);
        GesturePath::drag(start, end, self.dwell, self.travel)
    }

    /// Validate and send `path` to the backend.
    #[instrument(skip(self, driver, path), fields(start = %path.start(), end = %path.end()))]
    pub async fn dispatch(
        &self,
        driver: &dyn AutomationDriver,
        gesture: &str,
        path: GesturePath,
    ) -> Result<(), GestureError> {
        if let Some(bad) = path.points().iter().find(|p| p.point.x < 0 || p.point.y < 0) {
            return Err(GestureError::InvalidCoordinates {
                gesture: gesture.to_string(),
                x: bad.point.x,
                y: bad.point.y,
            });
        }

        let actions = path.into_actions();
        debug!(steps = actions.len(), "dispatching pointer sequence");
        match driver.perform_actions(&actions).await {
            Ok(()) => {
                info!(gesture, "gesture performed");
                Ok(())
            }
            Err(e) => {
                error!(gesture, error = %e, "gesture failed");
                Err(GestureError::Dispatch {
                    gesture: gesture.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Read the viewport, then perform a directional gesture.
    pub async fn swipe(
        &self,
        driver: &dyn AutomationDriver,
        direction: Direction,
    ) -> Result<(), GestureError> {
        let viewport = driver
            .window_size()
            .await
            .map_err(|source| GestureError::Viewport {
                gesture: direction.name().to_string(),
                source,
            })?;
        let path = self.directional(direction, viewport);
        self.dispatch(driver, direction.name(), path).await
    }

    pub async fn tap(&self, driver: &dyn AutomationDriver, point: Point) -> Result<(), GestureError> {
        self.dispatch(driver, "tap", GesturePath::tap(point)).await
    }

    pub async fn long_press(
        &self,
        driver: &dyn AutomationDriver,
        point: Point,
        hold: Duration,
    ) -> Result<(), GestureError> {
        self.dispatch(driver, "long press", GesturePath::long_press(point, hold))
            .await
    }
}
