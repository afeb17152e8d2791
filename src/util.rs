use geo::{Coord, LineString};
use image::{imageops, DynamicImage, GrayImage, Pixel, Rgba, RgbaImage};
use imageproc::{
    geometric_transformations::{rotate_about_center, Interpolation},
    point::Point,
};
use tracing::instrument;

use crate::BoundingBox;

/// Side length of the square canvas used for arbitrary-angle rotation: the
/// diagonal plus a pixel of slack on each side, so any rotation of a
/// `width` x `height` image fits inside it.
pub fn padded_side(width: u32, height: u32) -> u32 {
    (width as f64).hypot(height as f64).ceil() as u32 + 2
}

/// Rotates `image` counter-clockwise by `angle` degrees without losing pixels.
///
/// Multiples of 90° are exact and swap the dimensions as needed. Any other
/// angle first centres the image on a `padded_side` square filled with
/// `background`, then rotates inside that square, so the output size only
/// depends on the input size and the angle.
#[instrument(level = "trace", skip(image, background))]
pub fn rotate_expanded(image: &DynamicImage, angle: i32, background: Rgba<u8>) -> DynamicImage {
    let normalized = angle.rem_euclid(360);
    match normalized {
        0 => image.clone(),
        90 => image.rotate270(),
        180 => image.rotate180(),
        270 => image.rotate90(),
        _ => {
            let side = padded_side(image.width(), image.height());
            let x = ((side - image.width()) / 2) as i64;
            let y = ((side - image.height()) / 2) as i64;
            // imageproc rotates clockwise
            let theta = -(normalized as f32).to_radians();
            log::trace!(
                "Rotating {}x{} image by {angle}° on a {side}x{side} canvas",
                image.width(),
                image.height()
            );
            match image {
                DynamicImage::ImageLuma8(gray) => {
                    let fill = background.to_luma();
                    let mut canvas = GrayImage::from_pixel(side, side, fill);
                    imageops::replace(&mut canvas, gray, x, y);
                    DynamicImage::ImageLuma8(rotate_about_center(
                        &canvas,
                        theta,
                        Interpolation::Bilinear,
                        fill,
                    ))
                }
                other => {
                    let mut canvas = RgbaImage::from_pixel(side, side, background);
                    imageops::replace(&mut canvas, &other.to_rgba8(), x, y);
                    DynamicImage::ImageRgba8(rotate_about_center(
                        &canvas,
                        theta,
                        Interpolation::Bilinear,
                        background,
                    ))
                }
            }
        }
    }
}

/// Cuts `bounds` out of `image`, clamped to the image.
pub fn crop_box(image: &DynamicImage, bounds: &BoundingBox) -> DynamicImage {
    let x = bounds.x.min(image.width());
    let y = bounds.y.min(image.height());
    let width = bounds.width.min(image.width() - x);
    let height = bounds.height.min(image.height() - y);
    log::trace!("Slicing subimage to {bounds:?}");
    image.crop_imm(x, y, width, height)
}

/// Closed ring through the given contour points.
pub(crate) fn to_ring(points: &[Point<i32>]) -> LineString<f64> {
    let mut ring = LineString::new(
        points
            .iter()
            .map(|point| Coord {
                x: point.x as f64,
                y: point.y as f64,
            })
            .collect(),
    );
    ring.close();
    ring
}

/// Inclusive axis-aligned bounds of a contour, or `None` for an empty one.
pub(crate) fn contour_bounds(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(BoundingBox::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}
