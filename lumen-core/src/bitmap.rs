use std::{fmt, io::Cursor, sync::Arc};

use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};

use crate::error::FetchError;

/// Decoded bitmap held by the memory tier.
///
/// Immutable once decoded; clones share the same pixel buffer.
#[derive(Clone)]
pub struct CachedImage {
    inner: Arc<DynamicImage>,
}

impl CachedImage {
    /// Wrap an already decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(image),
        }
    }

    /// Decode any format the `image` crate recognises.
    pub fn decode(bytes: &[u8]) -> Result<Self, FetchError> {
        image::load_from_memory(bytes)
            .map(Self::new)
            .map_err(|e| FetchError::InvalidImageData(e.to_string()))
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// Borrow the underlying image.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }

    /// Owned RGBA8 copy of the pixels.
    pub fn to_rgba8(&self) -> RgbaImage {
        self.inner.to_rgba8()
    }

    /// Rough resident size of the decoded pixels.
    pub fn estimated_bytes(&self) -> u64 {
        self.inner.as_bytes().len() as u64
    }

    /// Lossless PNG encoding, the format every persisted entry uses.
    pub fn encode_png(&self) -> Result<EncodedBlob, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.inner.write_to(&mut out, ImageFormat::Png)?;
        Ok(EncodedBlob::new(out.into_inner()))
    }

    /// True when both handles point at the same decoded buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CachedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.inner.dimensions();
        f.debug_struct("CachedImage")
            .field("width", &w)
            .field("height", &h)
            .field("color", &self.inner.color())
            .finish()
    }
}

/// Raw encoded bytes as stored on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedBlob(Vec<u8>);

impl EncodedBlob {
    /// Wrap raw bytes without inspecting them.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Byte length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sniff the container format from the header bytes.
    pub fn format(&self) -> Option<ImageFormat> {
        image::guess_format(&self.0).ok()
    }

    /// Decode the full payload; a valid header alone is not enough.
    pub fn decode(&self) -> Result<CachedImage, FetchError> {
        CachedImage::decode(&self.0)
    }
}

impl fmt::Debug for EncodedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedBlob")
            .field("len", &self.0.len())
            .field("format", &self.format())
            .finish()
    }
}

impl From<Vec<u8>> for EncodedBlob {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::CachedImage;

    /// Small gradient with a bit of alpha so lossy paths would show.
    pub(crate) fn gradient(width: u32, height: u32) -> CachedImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
                200,
            ])
        });
        CachedImage::new(DynamicImage::ImageRgba8(img))
    }
}
