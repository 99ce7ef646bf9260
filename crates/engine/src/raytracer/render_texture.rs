use crate::prelude::*;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Default)]
struct Texels {
    size: Vector2<u32>,
    data: Vec<Vector4<f32>>,
}

/// Host-visible RGBA f32 render target a camera presents its frame into.
///
/// Clones share the same storage, which is how an imported texture stays
/// addressable by the backend that writes into it.
#[derive(Debug, Clone)]
pub struct RenderTexture {
    id: u64,
    texels: Arc<RwLock<Texels>>,
}

impl RenderTexture {
    pub fn new(size: Vector2<u32>) -> Self {
        let texture = Self {
            id: next_id(),
            texels: Arc::new(RwLock::new(Texels::default())),
        };
        texture.resize(size);
        texture
    }

    /// Stable identifier, used as the backend image handle on import
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> Vector2<u32> {
        self.texels.read().unwrap_or_else(PoisonError::into_inner).size
    }

    /// Reallocate the storage for `size`, clearing it to transparent black
    pub fn resize(&self, size: Vector2<u32>) {
        let mut texels = self.texels.write().unwrap_or_else(PoisonError::into_inner);
        texels.size = size;
        texels.data = vec![Vector4::zeros(); size.x as usize * size.y as usize];
    }

    /// Replace the contents; `data` is row-major with the top row first
    pub fn write(&self, data: Vec<Vector4<f32>>) -> Result<()> {
        let mut texels = self.texels.write().unwrap_or_else(PoisonError::into_inner);
        let expected = texels.size.x as usize * texels.size.y as usize;
        if data.len() != expected {
            anyhow::bail!(
                "render texture {} expects {} texels, got {}",
                self.id,
                expected,
                data.len()
            );
        }
        texels.data = data;
        Ok(())
    }

    pub fn read(&self) -> Vec<Vector4<f32>> {
        self.texels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .clone()
    }

    /// Save the current contents. The format follows the extension:
    /// `png` (lossless), `jpg`/`jpeg` (lossy) or `hdr` (high dynamic range).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let format = match extension.as_str() {
            "png" => image::ImageFormat::Png,
            "jpg" | "jpeg" => image::ImageFormat::Jpeg,
            "hdr" => image::ImageFormat::Hdr,
            _ => return Err(RaytracerError::UnsupportedImageFormat(extension).into()),
        };

        let image = {
            let texels = self.texels.read().unwrap_or_else(PoisonError::into_inner);
            let raw: Vec<f32> = bytemuck::cast_slice(&texels.data).to_vec();
            image::Rgba32FImage::from_raw(texels.size.x, texels.size.y, raw).ok_or_else(|| {
                RaytracerError::Export(format!("texture {} has inconsistent storage", self.id))
            })?
        };
        let image = image::DynamicImage::ImageRgba32F(image);

        let result = match format {
            image::ImageFormat::Png => image.to_rgba8().save_with_format(path, format),
            image::ImageFormat::Jpeg => image.to_rgb8().save_with_format(path, format),
            _ => image::DynamicImage::ImageRgb32F(image.to_rgb32f()).save_with_format(path, format),
        };
        result.map_err(|e| RaytracerError::Export(e.to_string()))?;

        log::info!("Saved render texture to {}", path.display());
        Ok(())
    }
}

/// Six-faced environment map, faces ordered +X, -X, +Y, -Y, +Z, -Z
#[derive(Debug, Clone)]
pub struct Cubemap {
    id: u64,
    resolution: u32,
    faces: Arc<[Vec<Vector4<f32>>; 6]>,
}

impl Cubemap {
    /// Single-texel cubemap of one color
    pub fn uniform(color: Vector3<f32>) -> Self {
        let texel = color.push(1.0);
        Self {
            id: next_id(),
            resolution: 1,
            faces: Arc::new(std::array::from_fn(|_| vec![texel])),
        }
    }

    /// Build from six square images of equal size
    pub fn from_faces(faces: [image::DynamicImage; 6]) -> Result<Self> {
        let resolution = faces[0].width();
        for (index, face) in faces.iter().enumerate() {
            if face.width() != resolution || face.height() != resolution {
                anyhow::bail!(
                    "cubemap face {} is {}x{}, expected {}x{}",
                    index,
                    face.width(),
                    face.height(),
                    resolution,
                    resolution
                );
            }
        }

        let faces = faces.map(|face| {
            face.to_rgba32f()
                .pixels()
                .map(|pixel| Vector4::from(pixel.0))
                .collect::<Vec<_>>()
        });

        Ok(Self {
            id: next_id(),
            resolution,
            faces: Arc::new(faces),
        })
    }

    /// Decode six encoded face images (HDR, PNG or JPEG)
    pub fn from_face_bytes(faces: [&[u8]; 6]) -> Result<Self> {
        let mut decoded = Vec::with_capacity(6);
        for (index, bytes) in faces.iter().enumerate() {
            let image = image::load_from_memory(bytes)
                .with_context(|| format!("failed to decode cubemap face {}", index))?;
            decoded.push(image);
        }

        let faces: [image::DynamicImage; 6] = decoded
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected six cubemap faces"))?;
        Self::from_faces(faces)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Nearest-texel lookup along a direction
    pub fn sample(&self, direction: &Vector3<f32>) -> Vector3<f32> {
        let (x, y, z) = (direction.x, direction.y, direction.z);
        let (ax, ay, az) = (x.abs(), y.abs(), z.abs());

        let (face, sc, tc, major) = if ax >= ay && ax >= az {
            if x > 0.0 { (0, -z, -y, ax) } else { (1, z, -y, ax) }
        } else if ay >= az {
            if y > 0.0 { (2, x, z, ay) } else { (3, x, -z, ay) }
        } else if z > 0.0 {
            (4, x, -y, az)
        } else {
            (5, -x, -y, az)
        };

        if major == 0.0 {
            return Vector3::zeros();
        }

        let u = (sc / major + 1.0) * 0.5;
        let v = (tc / major + 1.0) * 0.5;
        let last = self.resolution.saturating_sub(1) as f32;
        let column = (u * self.resolution as f32).clamp(0.0, last) as usize;
        let row = (v * self.resolution as f32).clamp(0.0, last) as usize;

        self.faces[face][row * self.resolution as usize + column].xyz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(size: Vector2<u32>) -> RenderTexture {
        let texture = RenderTexture::new(size);
        let data = (0..size.x * size.y)
            .map(|i| Vector4::new(i as f32 / (size.x * size.y) as f32, 0.5, 0.25, 1.0))
            .collect();
        texture.write(data).unwrap();
        texture
    }

    #[test]
    fn test_resize_is_visible_through_clones() {
        let texture = RenderTexture::new(Vector2::new(4, 4));
        let shared = texture.clone();

        texture.resize(Vector2::new(2, 3));
        assert_eq!(shared.size(), Vector2::new(2, 3));
        assert_eq!(shared.read().len(), 6);
        assert_eq!(shared.id(), texture.id());
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let texture = RenderTexture::new(Vector2::new(2, 2));
        assert!(texture.write(vec![Vector4::zeros(); 3]).is_err());
    }

    #[test]
    fn test_save_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let texture = gradient(Vector2::new(8, 4));

        for name in ["frame.png", "frame.jpg", "frame.jpeg", "frame.hdr"] {
            let path = dir.path().join(name);
            texture.save(&path).unwrap();

            let loaded = image::open(&path).unwrap();
            assert_eq!((loaded.width(), loaded.height()), (8, 4));
        }
    }

    #[test]
    fn test_save_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let error = gradient(Vector2::new(2, 2))
            .save(dir.path().join("frame.bmp"))
            .unwrap_err();

        assert_eq!(
            error.downcast_ref::<RaytracerError>(),
            Some(&RaytracerError::UnsupportedImageFormat("bmp".to_string()))
        );
    }

    #[test]
    fn test_cubemap_face_selection() {
        let colors: [[u8; 3]; 6] = [
            [255, 0, 0],
            [0, 255, 0],
            [0, 0, 255],
            [255, 255, 0],
            [0, 255, 255],
            [255, 0, 255],
        ];
        let faces = colors.map(|c| {
            image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(2, 2, image::Rgb(c)))
        });
        let cubemap = Cubemap::from_faces(faces).unwrap();

        assert_eq!(cubemap.sample(&Vector3::x()), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(cubemap.sample(&-Vector3::x()), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(cubemap.sample(&Vector3::y()), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(cubemap.sample(&-Vector3::z()), Vector3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_cubemap_rejects_mismatched_faces() {
        let mut faces: [image::DynamicImage; 6] =
            std::array::from_fn(|_| image::DynamicImage::new_rgb8(4, 4));
        faces[3] = image::DynamicImage::new_rgb8(2, 2);

        assert!(Cubemap::from_faces(faces).is_err());
    }

    #[test]
    fn test_uniform_cubemap() {
        let cubemap = Cubemap::uniform(Vector3::new(0.2, 0.4, 0.6));
        assert_eq!(cubemap.resolution(), 1);
        assert_eq!(
            cubemap.sample(&Vector3::new(0.3, -0.9, 0.1)),
            Vector3::new(0.2, 0.4, 0.6)
        );
    }
}
