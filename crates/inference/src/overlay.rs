use image::{Rgb, RgbImage};

/// Semi-transparent green: RGB plus alpha.
pub const ROAD_OVERLAY: [u8; 4] = [0, 255, 0, 127];

/// Blend `color` over every pixel of `img` whose road probability exceeds
/// `threshold`. `probs` is row-major with one value per pixel.
///
/// Returns the number of painted pixels, or `None` if `probs` does not cover
/// the image exactly.
pub fn overlay_road(img: &mut RgbImage, probs: &[f32], threshold: f32, color: [u8; 4]) -> Option<usize> {
    let (w, h) = img.dimensions();
    if probs.len() != w as usize * h as usize {
        return None;
    }
    let alpha = color[3] as f32 / 255.0;
    let mut painted = 0;
    for (pixel, &p) in img.pixels_mut().zip(probs) {
        if p > threshold {
            *pixel = blend(*pixel, color, alpha);
            painted += 1;
        }
    }
    Some(painted)
}

fn blend(base: Rgb<u8>, color: [u8; 4], alpha: f32) -> Rgb<u8> {
    let mix = |b: u8, c: u8| -> u8 {
        (b as f32 * (1.0 - alpha) + c as f32 * alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(base[0], color[0]),
        mix(base[1], color[1]),
        mix(base[2], color[2]),
    ])
}
