//! Geometric feature extraction from facial landmark snapshots.
//!
//! A snapshot is one frame's worth of detected facial keypoints, indexed
//! positionally by the FaceMesh 468-point schema. The features computed here
//! are scale proxies for gesture state:
//!
//! - **EAR** (eye aspect ratio): vertical eyelid gap over horizontal eye
//!   width, averaged across both eyes. Lower means more closed.
//! - **MAR** (mouth aspect ratio): vertical lip gap over the outer eye-corner
//!   distance (a face-width proxy). Higher means more open.
//! - **Nose tip y**: the vertical coordinate used for nod displacement.
//!
//! All distances are Euclidean in the (x, y) plane; a `z` coordinate, if the
//! detector provides one, is dropped before the snapshot reaches this module.
//! A snapshot that is missing a required index, or whose reference distance
//! is degenerate (near zero), produces no reading at all — callers skip the
//! frame rather than compare against an infinite or NaN ratio.

use serde::{Deserialize, Serialize};

/// Number of points in a full FaceMesh landmark snapshot.
pub const LANDMARK_COUNT: usize = 468;

// FaceMesh schema indices read by the feature formulas.
const LEFT_EYE_TOP: usize = 159;
const LEFT_EYE_BOTTOM: usize = 145;
const LEFT_EYE_OUTER: usize = 33;
const LEFT_EYE_INNER: usize = 133;
const RIGHT_EYE_TOP: usize = 386;
const RIGHT_EYE_BOTTOM: usize = 374;
const RIGHT_EYE_INNER: usize = 362;
const RIGHT_EYE_OUTER: usize = 263;
const UPPER_LIP: usize = 13;
const LOWER_LIP: usize = 14;
const NOSE_TIP: usize = 1;

/// Reference distances below this are treated as degenerate geometry.
const MIN_REFERENCE_DISTANCE: f32 = 1e-6;

/// A single 2D landmark point, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point in the (x, y) plane.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

fn point(landmarks: &[Point], index: usize) -> Option<Point> {
    landmarks.get(index).copied()
}

/// Vertical gap over a horizontal reference distance, guarding against a
/// degenerate denominator.
fn ratio(gap: f32, reference: f32) -> Option<f32> {
    if reference < MIN_REFERENCE_DISTANCE {
        return None;
    }
    Some(gap / reference)
}

/// Mean eye aspect ratio across both eyes.
///
/// Each eye's EAR is the eyelid gap divided by the corner-to-corner width.
/// Returns `None` if either eye's landmarks are missing or its width is
/// degenerate.
pub fn eye_aspect_ratio(landmarks: &[Point]) -> Option<f32> {
    let left = ratio(
        point(landmarks, LEFT_EYE_TOP)?.distance(&point(landmarks, LEFT_EYE_BOTTOM)?),
        point(landmarks, LEFT_EYE_OUTER)?.distance(&point(landmarks, LEFT_EYE_INNER)?),
    )?;
    let right = ratio(
        point(landmarks, RIGHT_EYE_TOP)?.distance(&point(landmarks, RIGHT_EYE_BOTTOM)?),
        point(landmarks, RIGHT_EYE_INNER)?.distance(&point(landmarks, RIGHT_EYE_OUTER)?),
    )?;
    Some((left + right) / 2.0)
}

/// Mouth aspect ratio: lip gap over the outer eye-corner distance.
///
/// The eye-corner span is used as the horizontal reference because it stays
/// stable while the mouth itself deforms.
pub fn mouth_aspect_ratio(landmarks: &[Point]) -> Option<f32> {
    let gap = point(landmarks, UPPER_LIP)?.distance(&point(landmarks, LOWER_LIP)?);
    let width = point(landmarks, LEFT_EYE_OUTER)?.distance(&point(landmarks, RIGHT_EYE_OUTER)?);
    ratio(gap, width)
}

/// Vertical coordinate of the nose tip.
pub fn nose_tip_y(landmarks: &[Point]) -> Option<f32> {
    Some(point(landmarks, NOSE_TIP)?.y)
}

/// Test helper: build a full snapshot whose EAR and MAR come out to exactly
/// the requested values, with the nose tip at the given height.
#[cfg(test)]
pub(crate) fn synthetic_face(ear: f32, mar: f32, nose_y: f32) -> Vec<Point> {
    let mut lm = vec![Point::new(0.0, 0.0); LANDMARK_COUNT];

    // Left eye: 20 px wide, lid gap = ear * 20
    lm[LEFT_EYE_OUTER] = Point::new(100.0, 50.0);
    lm[LEFT_EYE_INNER] = Point::new(120.0, 50.0);
    lm[LEFT_EYE_TOP] = Point::new(110.0, 50.0 - ear * 10.0);
    lm[LEFT_EYE_BOTTOM] = Point::new(110.0, 50.0 + ear * 10.0);

    // Right eye: 20 px wide
    lm[RIGHT_EYE_INNER] = Point::new(160.0, 50.0);
    lm[RIGHT_EYE_OUTER] = Point::new(180.0, 50.0);
    lm[RIGHT_EYE_TOP] = Point::new(170.0, 50.0 - ear * 10.0);
    lm[RIGHT_EYE_BOTTOM] = Point::new(170.0, 50.0 + ear * 10.0);

    // Mouth: reference width is outer corner to outer corner = 80 px
    lm[UPPER_LIP] = Point::new(140.0, 80.0 - mar * 40.0);
    lm[LOWER_LIP] = Point::new(140.0, 80.0 + mar * 40.0);

    lm[NOSE_TIP] = Point::new(140.0, nose_y);
    lm
}
