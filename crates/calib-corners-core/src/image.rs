#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }

    /// Copy rotated by 90° clockwise; the result is `height × width`.
    pub fn rotated_cw(&self) -> Self {
        let mut out = Self::filled(self.height, self.width, 0);
        for y in 0..self.height {
            for x in 0..self.width {
                out.set(self.height - 1 - y, x, self.get(x, y));
            }
        }
        out
    }

    /// Widen to a 16-bit raw image (value `v` becomes `v << 8`).
    pub fn to_raw16(&self) -> RawImage {
        RawImage {
            width: self.width,
            height: self.height,
            pixels: Pixels::Mono16(self.data.iter().map(|&v| (v as u16) << 8).collect()),
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Clamp-to-edge pixel read.
#[inline]
pub fn get_gray_clamped(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, src.width as i32 - 1);
    let y = y.clamp(0, src.height as i32 - 1);
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample with pixel centers at integer coordinates.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("unsupported image encoding `{0}`")]
    UnsupportedImageEncoding(String),

    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },

    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
}

/// Sample storage of a single-channel frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pixels {
    Mono8(Vec<u8>),
    Mono16(Vec<u16>),
}

/// One single-channel camera frame as delivered by a dataset.
///
/// Detectors work on 8 bits; 16-bit sources are reduced to their top byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Pixels,
}

impl RawImage {
    pub fn mono16(width: usize, height: usize, data: Vec<u16>) -> Result<Self, ImageError> {
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            pixels: Pixels::Mono16(data),
        })
    }

    pub fn mono8(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        check_len(width, height, data.len())?;
        Ok(Self {
            width,
            height,
            pixels: Pixels::Mono8(data),
        })
    }

    /// Build from a raw byte buffer tagged with a ROS-style encoding name.
    ///
    /// 16-bit encodings are read little endian.
    pub fn from_encoded(
        width: usize,
        height: usize,
        encoding: &str,
        bytes: &[u8],
    ) -> Result<Self, ImageError> {
        match encoding.to_ascii_lowercase().as_str() {
            "mono8" | "8uc1" => Self::mono8(width, height, bytes.to_vec()),
            "mono16" | "16uc1" => {
                let expected = width
                    .checked_mul(height)
                    .and_then(|n| n.checked_mul(2))
                    .ok_or(ImageError::InvalidDimensions { width, height })?;
                if bytes.len() != expected {
                    return Err(ImageError::InvalidBuffer {
                        expected,
                        got: bytes.len(),
                    });
                }
                let data = bytes
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                Self::mono16(width, height, data)
            }
            _ => Err(ImageError::UnsupportedImageEncoding(encoding.to_string())),
        }
    }

    /// Check that the sample buffer matches `width × height`.
    ///
    /// Fields are public, so a frame built by hand may be inconsistent.
    pub fn validate(&self) -> Result<(), ImageError> {
        let len = match &self.pixels {
            Pixels::Mono8(d) => d.len(),
            Pixels::Mono16(d) => d.len(),
        };
        check_len(self.width, self.height, len)
    }

    /// 8-bit grayscale copy (top byte of 16-bit samples).
    pub fn to_gray8(&self) -> GrayImage {
        let data = match &self.pixels {
            Pixels::Mono8(d) => d.clone(),
            Pixels::Mono16(d) => d.iter().map(|&v| (v >> 8) as u8).collect(),
        };
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

#[cfg(feature = "image")]
impl RawImage {
    /// Convert a decoded single-channel image; colour layouts are rejected.
    pub fn from_dynamic(img: image::DynamicImage) -> Result<Self, ImageError> {
        let (width, height) = (img.width() as usize, img.height() as usize);
        match img {
            image::DynamicImage::ImageLuma8(buf) => Self::mono8(width, height, buf.into_raw()),
            image::DynamicImage::ImageLuma16(buf) => Self::mono16(width, height, buf.into_raw()),
            other => Err(ImageError::UnsupportedImageEncoding(format!(
                "{:?}",
                other.color()
            ))),
        }
    }

    /// `image` crate copy of the 8-bit view, e.g. for saving to disk.
    pub fn to_image_luma8(&self) -> Option<image::GrayImage> {
        let g = self.to_gray8();
        image::GrayImage::from_raw(g.width as u32, g.height as u32, g.data)
    }
}

fn check_len(width: usize, height: usize, got: usize) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    let expected = width
        .checked_mul(height)
        .ok_or(ImageError::InvalidDimensions { width, height })?;
    if expected != got {
        return Err(ImageError::InvalidBuffer { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_moves_top_left_to_top_right() {
        let mut img = GrayImage::filled(3, 2, 0);
        img.set(0, 0, 7);
        img.set(2, 1, 9);
        let rot = img.rotated_cw();
        assert_eq!((rot.width, rot.height), (2, 3));
        assert_eq!(rot.get(1, 0), 7);
        assert_eq!(rot.get(0, 2), 9);
    }

    #[test]
    fn validate_catches_hand_built_frames() {
        let ok = RawImage::mono8(2, 2, vec![0; 4]).unwrap();
        assert!(ok.validate().is_ok());

        let short = RawImage {
            width: 3,
            height: 3,
            pixels: Pixels::Mono16(vec![0; 8]),
        };
        assert_eq!(
            short.validate(),
            Err(ImageError::InvalidBuffer { expected: 9, got: 8 })
        );

        let huge = RawImage {
            width: usize::MAX,
            height: 2,
            pixels: Pixels::Mono8(Vec::new()),
        };
        assert_eq!(
            huge.validate(),
            Err(ImageError::InvalidDimensions {
                width: usize::MAX,
                height: 2
            })
        );
    }

    #[test]
    fn mono16_keeps_top_byte() {
        let img = RawImage::mono16(2, 1, vec![0xABCD, 0x00FF]).unwrap();
        let g = img.to_gray8();
        assert_eq!(g.data, vec![0xAB, 0x00]);
    }

    #[test]
    fn decodes_little_endian_mono16() {
        let img = RawImage::from_encoded(1, 1, "mono16", &[0x34, 0x12]).unwrap();
        assert_eq!(img.pixels, Pixels::Mono16(vec![0x1234]));
    }

    #[test]
    fn rejects_color_encodings() {
        let err = RawImage::from_encoded(1, 1, "bgr8", &[0, 0, 0]).unwrap_err();
        assert_eq!(err, ImageError::UnsupportedImageEncoding("bgr8".into()));
    }

    #[test]
    fn rejects_short_buffers() {
        let err = RawImage::mono8(4, 4, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            ImageError::InvalidBuffer {
                expected: 16,
                got: 15
            }
        );
    }

    #[cfg(feature = "image")]
    #[test]
    fn converts_luma16_dynamic_images() {
        let buf = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(2, 1, vec![0x1200, 0xff00])
            .unwrap();
        let img = RawImage::from_dynamic(image::DynamicImage::ImageLuma16(buf)).unwrap();
        assert_eq!(img.to_gray8().data, vec![0x12, 0xff]);

        let rgb = image::DynamicImage::new_rgb8(2, 2);
        assert!(matches!(
            RawImage::from_dynamic(rgb),
            Err(ImageError::UnsupportedImageEncoding(_))
        ));
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage {
            width: 2,
            height: 1,
            data: vec![0, 100],
        };
        let v = sample_bilinear(&img.view(), 0.5, 0.0);
        assert!((v - 50.0).abs() < 1e-4);
    }
}
