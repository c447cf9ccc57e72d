//! Mask bitmap decoding.

use anyhow::{Context, Result};

use seesay_core::answer::MaskBitmap;

/// Decode an encoded image (WebP or PNG) into an RGB mask.
pub fn decode_mask(bytes: &[u8]) -> Result<MaskBitmap> {
    let image = image::load_from_memory(bytes).context("unrecognized image data")?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let pixels = rgb.pixels().map(|p| p.0).collect();
    MaskBitmap::new(width, height, pixels)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use seesay_core::answer::ClickPoint;

    /// 4x2 PNG, green on the left half.
    pub(crate) fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgb([10, 230, 20])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_png_mask() {
        let mask = decode_mask(&png_bytes()).unwrap();
        assert_eq!((mask.width(), mask.height()), (4, 2));
        assert_eq!(mask.pixel(0, 0), Some([10, 230, 20]));

        let left = ClickPoint {
            x: 5.0,
            y: 5.0,
            display_width: 40.0,
            display_height: 20.0,
        };
        let right = ClickPoint { x: 35.0, ..left };
        assert!(mask.hit(left));
        assert!(!mask.hit(right));
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_mask(b"garbage").is_err());
    }
}
