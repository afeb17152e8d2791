use geo::{Coord, EuclideanLength, LineString, Simplify};
use image::GrayImage;
use imageproc::{
    contours::{find_contours, BorderType},
    point::Point,
};
use tracing::instrument;

use crate::{
    util::{contour_bounds, to_ring},
    BoundingBox, Quadrilateral,
};

#[derive(Debug, Clone, Copy)]
pub struct RegionOptions {
    /// Boxes narrower or shorter than this are noise.
    pub min_size: u32,
    /// Boxes at least this fraction of the page width or height are borders.
    pub max_fraction: f32,
    pub row_band_height: u32,
    /// Polygon approximation tolerance as a fraction of contour perimeter.
    pub polygon_epsilon: f64,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            min_size: 40,
            max_fraction: 0.9,
            row_band_height: 50,
            polygon_epsilon: 0.02,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCandidates {
    /// Text blocks in reading order.
    pub boxes: Vec<BoundingBox>,
    /// Four-cornered outlines, independent of `boxes`.
    pub quadrilaterals: Vec<Quadrilateral>,
}

impl RegionCandidates {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.quadrilaterals.is_empty()
    }
}

/// Turns a binarized page (foreground non-zero) into reading-ordered text
/// boxes plus quadrilateral outlines.
#[derive(Debug, Clone, Default)]
pub struct RegionDetector {
    options: RegionOptions,
}

impl RegionDetector {
    pub fn new(options: RegionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RegionOptions {
        &self.options
    }

    #[instrument(skip(self, image), level = "debug")]
    pub fn detect(&self, image: &GrayImage) -> RegionCandidates {
        let contours = find_contours::<i32>(image)
            .into_iter()
            .filter(|it| it.border_type == BorderType::Outer && it.parent.is_none())
            .map(|it| it.points)
            .filter(|points| !points.is_empty())
            .collect::<Vec<_>>();
        log::debug!("Found {} outer contours", contours.len());

        let sized = contours
            .iter()
            .filter_map(|points| contour_bounds(points))
            .filter(|bounds| self.within_size(bounds, image.width(), image.height()))
            .collect::<Vec<_>>();

        let mut boxes = filter_contained(&sized);
        log::debug!(
            "{} boxes passed the size filter, {} left after removing nested ones",
            sized.len(),
            boxes.len()
        );
        sort_reading_order(&mut boxes, self.options.row_band_height);

        let quadrilaterals = contours
            .iter()
            .filter_map(|points| {
                let approx = approximate_polygon(points, self.options.polygon_epsilon);
                <[Point<i32>; 4]>::try_from(approx)
                    .ok()
                    .map(|points| Quadrilateral { points })
            })
            .collect();

        RegionCandidates {
            boxes,
            quadrilaterals,
        }
    }

    fn within_size(&self, bounds: &BoundingBox, page_width: u32, page_height: u32) -> bool {
        let RegionOptions {
            min_size,
            max_fraction,
            ..
        } = self.options;
        bounds.width >= min_size
            && bounds.height >= min_size
            && (bounds.width as f32) < page_width as f32 * max_fraction
            && (bounds.height as f32) < page_height as f32 * max_fraction
    }
}

/// Drops every box that lies entirely inside another one. Of two identical
/// boxes the earlier one is kept. Overlapping boxes that do not nest both stay.
pub fn filter_contained(boxes: &[BoundingBox]) -> Vec<BoundingBox> {
    boxes
        .iter()
        .enumerate()
        .filter(|(i, inner)| {
            !boxes.iter().enumerate().any(|(j, outer)| {
                j != *i && outer.contains(inner) && (outer != *inner || j < *i)
            })
        })
        .map(|(_, it)| *it)
        .collect()
}

/// Stable sort by `(y / band_height, x)`: rows top to bottom, left to right
/// within a row, detection order on full ties.
pub fn sort_reading_order(boxes: &mut [BoundingBox], band_height: u32) {
    let band_height = band_height.max(1);
    boxes.sort_by_key(|it| (it.y / band_height, it.x));
}

/// Douglas-Peucker approximation of a closed contour with a tolerance of
/// `epsilon_fraction` times its perimeter. The ring is split at two mutually
/// distant points so the result does not depend on where tracing started.
pub fn approximate_polygon(points: &[Point<i32>], epsilon_fraction: f64) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let epsilon = to_ring(points).euclidean_length() * epsilon_fraction;

    let farthest_from = |origin: Point<i32>| {
        points
            .iter()
            .enumerate()
            .max_by_key(|(_, it)| {
                let (dx, dy) = ((it.x - origin.x) as i64, (it.y - origin.y) as i64);
                dx * dx + dy * dy
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let a = farthest_from(points[0]);
    let b = farthest_from(points[a]);
    if a == b {
        return vec![points[a]];
    }
    let (start, end) = (a.min(b), a.max(b));

    let forward = simplify_chain(points[start..=end].iter(), epsilon);
    let backward = simplify_chain(points[end..].iter().chain(&points[..=start]), epsilon);

    let mut polygon = forward;
    if backward.len() > 2 {
        polygon.extend_from_slice(&backward[1..backward.len() - 1]);
    }
    polygon.dedup();
    polygon
}

fn simplify_chain<'a>(
    points: impl Iterator<Item = &'a Point<i32>>,
    epsilon: f64,
) -> Vec<Point<i32>> {
    LineString::new(
        points
            .map(|it| Coord {
                x: it.x as f64,
                y: it.y as f64,
            })
            .collect(),
    )
    .simplify(&epsilon)
    .coords()
    .map(|it| Point::new(it.x.round() as i32, it.y.round() as i32))
    .collect()
}
