//! Single-band float raster type and its on-disk codec.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic prefix for serialized rasters ("SRF1": sentinel raster format v1).
const MAGIC: u32 = 0x5352_4631;

/// A single-band float32 raster.
///
/// Pixel values hold the vegetation-index scalar; NaN marks pixels with no
/// usable observation (cloud-masked, outside the polygon, or outside the
/// data mask). The pixel buffer is shared so cache promotions clone cheaply.
#[derive(Debug, Clone)]
pub struct Raster {
    width: usize,
    height: usize,
    data: Arc<Vec<f32>>,
}

impl Raster {
    /// Build a raster from row-major pixel data. Panics if `data` does not
    /// match `width * height`; callers decode dimensions and payload from
    /// the same source.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height, "pixel buffer shape mismatch");
        Self {
            width,
            height,
            data: Arc::new(data),
        }
    }

    /// A raster with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.data[row * self.width + col])
    }

    /// Count of finite (usable) pixels.
    pub fn finite_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Whether the raster carries any usable observation at all.
    pub fn has_valid_pixels(&self) -> bool {
        self.data.iter().any(|v| v.is_finite())
    }

    /// Crop to the top-left `width` x `height` region.
    pub fn crop(&self, width: usize, height: usize) -> Raster {
        let width = width.min(self.width);
        let height = height.min(self.height);
        let mut out = Vec::with_capacity(width * height);
        for row in 0..height {
            let offset = row * self.width;
            out.extend_from_slice(&self.data[offset..offset + width]);
        }
        Raster::new(width, height, out)
    }

    /// Per-pixel difference `self - other`, cropping both to the common
    /// top-left region when shapes differ.
    pub fn subtract(&self, other: &Raster) -> Raster {
        let width = self.width.min(other.width);
        let height = self.height.min(other.height);
        let a = self.crop(width, height);
        let b = other.crop(width, height);
        let data = a
            .data()
            .iter()
            .zip(b.data().iter())
            .map(|(x, y)| x - y)
            .collect();
        Raster::new(width, height, data)
    }

    /// Per-pixel median across a stack of rasters, ignoring NaN samples.
    ///
    /// Rasters are cropped to the common top-left region. A pixel with no
    /// finite sample in any layer stays NaN. Returns None for an empty stack.
    pub fn median_stack(stack: &[Raster]) -> Option<Raster> {
        if stack.is_empty() {
            return None;
        }
        let width = stack.iter().map(Raster::width).min()?;
        let height = stack.iter().map(Raster::height).min()?;
        let cropped: Vec<Raster> = stack.iter().map(|r| r.crop(width, height)).collect();

        let mut out = Vec::with_capacity(width * height);
        let mut samples: Vec<f32> = Vec::with_capacity(cropped.len());
        for i in 0..width * height {
            samples.clear();
            samples.extend(
                cropped
                    .iter()
                    .map(|r| r.data()[i])
                    .filter(|v| v.is_finite()),
            );
            out.push(median_of(&mut samples));
        }
        Some(Raster::new(width, height, out))
    }

    /// Serialize to the on-disk format: magic, dims, little-endian f32 payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.data.len() * 4);
        buf.put_u32(MAGIC);
        buf.put_u32(self.width as u32);
        buf.put_u32(self.height as u32);
        for v in self.data.iter() {
            buf.put_f32_le(*v);
        }
        buf.freeze()
    }

    /// Deserialize from the on-disk format.
    pub fn from_bytes(mut buf: &[u8]) -> Result<Raster, RasterCodecError> {
        if buf.len() < 12 {
            return Err(RasterCodecError::Truncated);
        }
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(RasterCodecError::BadMagic(magic));
        }
        let width = buf.get_u32() as usize;
        let height = buf.get_u32() as usize;
        let expected = width
            .checked_mul(height)
            .ok_or(RasterCodecError::Truncated)?;
        if buf.len() != expected * 4 {
            return Err(RasterCodecError::Truncated);
        }
        let mut data = Vec::with_capacity(expected);
        for _ in 0..expected {
            data.push(buf.get_f32_le());
        }
        Ok(Raster::new(width, height, data))
    }
}

impl PartialEq for Raster {
    /// Bitwise pixel equality (NaN == NaN), so cached round-trips compare equal.
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

fn median_of(samples: &mut [f32]) -> f32 {
    if samples.is_empty() {
        return f32::NAN;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).expect("finite samples"));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        samples[mid]
    } else {
        0.5 * (samples[mid - 1] + samples[mid])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RasterCodecError {
    #[error("Raster file truncated or shape mismatch")]
    Truncated,

    #[error("Unrecognized raster file magic: {0:#x}")]
    BadMagic(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip_preserves_nan() {
        let r = Raster::new(2, 2, vec![0.5, f32::NAN, -0.25, 1.0]);
        let decoded = Raster::from_bytes(&r.to_bytes()).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(decoded.finite_count(), 3);
    }

    #[test]
    fn test_codec_rejects_garbage() {
        assert!(Raster::from_bytes(&[]).is_err());
        assert!(Raster::from_bytes(&[0u8; 11]).is_err());
        let mut bytes = Raster::filled(2, 2, 0.0).to_bytes().to_vec();
        bytes.truncate(bytes.len() - 3);
        assert!(Raster::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_median_stack_ignores_nan() {
        let a = Raster::new(2, 1, vec![0.1, f32::NAN]);
        let b = Raster::new(2, 1, vec![0.3, f32::NAN]);
        let c = Raster::new(2, 1, vec![0.5, 0.9]);
        let median = Raster::median_stack(&[a, b, c]).unwrap();
        assert!((median.data()[0] - 0.3).abs() < 1e-6);
        assert!((median.data()[1] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_median_stack_even_count() {
        let a = Raster::new(1, 1, vec![0.2]);
        let b = Raster::new(1, 1, vec![0.4]);
        let median = Raster::median_stack(&[a, b]).unwrap();
        assert!((median.data()[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_subtract_crops_to_common_shape() {
        let a = Raster::filled(3, 2, 0.8);
        let b = Raster::filled(2, 3, 0.3);
        let diff = a.subtract(&b);
        assert_eq!(diff.width(), 2);
        assert_eq!(diff.height(), 2);
        assert!(diff.data().iter().all(|v| (v - 0.5).abs() < 1e-6));
    }
}
