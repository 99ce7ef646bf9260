use crate::prelude::*;

use rayon::prelude::*;

fn luminance(color: &Vector4<f32>) -> f32 {
    0.2126 * color.x + 0.7152 * color.y + 0.0722 * color.z
}

/// Average log luminance of the frame, used to normalize the filter weights
pub fn compute_intensity(color: &[Vector4<f32>]) -> f32 {
    if color.is_empty() {
        return 1.0;
    }
    let sum: f32 = color
        .par_iter()
        .map(|texel| (luminance(texel).max(0.0) + 1e-4).ln())
        .sum();
    (sum / color.len() as f32).exp()
}

/// Normal-aware 3x3 box filter.
///
/// `weights` receives each pixel's luminance relative to `intensity`;
/// `filtered` receives the smoothed color. Neighbours whose normal points
/// away from the center pixel are skipped so edges survive.
pub fn filter(
    color: &[Vector4<f32>],
    normal: &[Vector4<f32>],
    size: Vector2<u32>,
    intensity: f32,
    weights: &mut [Vector4<f32>],
    filtered: &mut [Vector4<f32>],
) {
    let width = size.x as i64;
    let height = size.y as i64;

    filtered
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, output)| {
            let x = index as i64 % width;
            let y = index as i64 / width;
            let center_normal = normal[index].xyz();

            let mut sum = Vector4::zeros();
            let mut count = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let neighbour = (ny * width + nx) as usize;
                    if center_normal.dot(&normal[neighbour].xyz()) < 0.5 && neighbour != index {
                        continue;
                    }
                    sum += color[neighbour];
                    count += 1.0;
                }
            }
            *output = sum / count;
        });

    let scale = 1.0 / intensity.max(1e-4);
    weights
        .par_iter_mut()
        .zip(color.par_iter())
        .for_each(|(weight, texel)| *weight = Vector4::repeat(luminance(texel) * scale));
}

/// Blend the filtered color back into `color` by `strength` in [0, 1]
pub fn blend(color: &mut [Vector4<f32>], filtered: &[Vector4<f32>], strength: f32) {
    let strength = strength.clamp(0.0, 1.0);
    color
        .par_iter_mut()
        .zip(filtered.par_iter())
        .for_each(|(texel, smooth)| *texel = texel.lerp(smooth, strength));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_image_is_unchanged() {
        let size = Vector2::new(4, 3);
        let color = vec![Vector4::new(0.5, 0.25, 0.125, 1.0); 12];
        let normal = vec![Vector4::new(0.0, 0.0, 1.0, 0.0); 12];
        let mut weights = vec![Vector4::zeros(); 12];
        let mut filtered = vec![Vector4::zeros(); 12];

        filter(&color, &normal, size, compute_intensity(&color), &mut weights, &mut filtered);

        for texel in &filtered {
            assert!((texel - color[0]).norm() < 1e-6);
        }
    }

    #[test]
    fn test_filter_smooths_a_spike() {
        let size = Vector2::new(3, 3);
        let mut color = vec![Vector4::zeros(); 9];
        color[4] = Vector4::new(9.0, 9.0, 9.0, 1.0);
        let normal = vec![Vector4::new(0.0, 1.0, 0.0, 0.0); 9];
        let mut weights = vec![Vector4::zeros(); 9];
        let mut filtered = vec![Vector4::zeros(); 9];

        filter(&color, &normal, size, 1.0, &mut weights, &mut filtered);

        assert!((filtered[4].x - 1.0).abs() < 1e-6);
        // Corner sees the spike among four pixels
        assert!((filtered[0].x - 2.25).abs() < 1e-6);
    }

    #[test]
    fn test_blend_strength() {
        let mut color = vec![Vector4::repeat(1.0)];
        blend(&mut color, &[Vector4::zeros()], 0.25);
        assert!((color[0].x - 0.75).abs() < 1e-6);

        let mut color = vec![Vector4::repeat(1.0)];
        blend(&mut color, &[Vector4::zeros()], 0.0);
        assert_eq!(color[0], Vector4::repeat(1.0));
    }

    #[test]
    fn test_intensity_of_uniform_frame() {
        let color = vec![Vector4::new(1.0, 1.0, 1.0, 1.0); 16];
        assert!((compute_intensity(&color) - 1.0001).abs() < 1e-3);
    }
}
