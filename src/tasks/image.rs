//! Production-mode image compression.
//!
//! Each format goes through its own encoder, SVG through `usvg`. The result
//! is only kept when it is strictly smaller than the source, so compression
//! never grows a file.

use std::io::Cursor;

use camino::Utf8Path;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{AnimationDecoder, ExtendedColorType, ImageEncoder, ImageFormat};
use thiserror::Error;

/// Quality used when re-encoding JPEG images.
pub const JPEG_QUALITY: u8 = 80;

/// Errors that can occur when compressing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An error occurred during image decoding or encoding.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The SVG document could not be parsed.
    #[error("SVG error: {0}")]
    Svg(#[from] usvg::Error),
}

/// Compress `data`, choosing the encoder by the extension of `path`.
/// Unknown extensions are returned unchanged.
pub fn compress(path: &Utf8Path, data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let ext = path.extension().map(str::to_ascii_lowercase);

    let compressed = match ext.as_deref() {
        Some("png") => encode_png(data)?,
        Some("jpg" | "jpeg") => encode_jpeg(data)?,
        Some("gif") => encode_gif(data)?,
        Some("svg") => optimize_svg(data)?,
        _ => return Ok(data.to_vec()),
    };

    if compressed.len() < data.len() {
        Ok(compressed)
    } else {
        Ok(data.to_vec())
    }
}

/// Lossless re-encode at the highest compression level.
fn encode_png(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
        .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;

    Ok(out)
}

/// Lossy re-encode at [`JPEG_QUALITY`].
fn encode_jpeg(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    let rgb = img.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;

    Ok(out)
}

/// Re-encode every frame, re-quantising the palettes. The loop count of the
/// source is carried over; a source without one still plays once.
fn encode_gif(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let repeat = loop_count(data);
    let frames = GifDecoder::new(Cursor::new(data))?
        .into_frames()
        .collect_frames()?;

    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        match repeat {
            Some(0) => encoder.set_repeat(Repeat::Infinite)?,
            Some(n) => encoder.set_repeat(Repeat::Finite(n))?,
            None => {}
        }
        encoder.encode_frames(frames)?;
    }

    Ok(out)
}

/// Loop count from the NETSCAPE2.0 application extension, `0` meaning
/// forever. `None` when the extension is absent.
fn loop_count(data: &[u8]) -> Option<u16> {
    const APP: [&[u8]; 2] = [b"NETSCAPE2.0", b"ANIMEXTS1.0"];

    APP.iter().find_map(|app| {
        let pos = data.windows(app.len()).position(|w| w == *app)?;
        match data.get(pos + app.len()..pos + app.len() + 4)? {
            [3, 1, lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    })
}

/// Rewrite the document through `usvg` without indentation. Text needs
/// fonts to be converted, so documents with `<text>` are returned unchanged.
/// `viewBox` and `id` attributes survive the rewrite.
pub fn optimize_svg(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    if data.windows(5).any(|w| w == b"<text") {
        return Ok(data.to_vec());
    }

    let tree = usvg::Tree::from_data(data, &usvg::Options::default())?;

    let write_options = usvg::WriteOptions {
        indent: usvg::Indent::None,
        ..Default::default()
    };

    Ok(tree.to_string(&write_options).into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Frame, Rgba, RgbaImage};

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgba([200, 30, 30, 255])
            } else {
                Rgba([30, 30, 200, 255])
            }
        });

        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(img.as_raw(), 64, 64, ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn test_png_never_grows() {
        let source = sample_png();

        let compressed = compress(Utf8Path::new("img/a.png"), &source).unwrap();

        assert!(compressed.len() <= source.len());
        let decoded = image::load_from_memory(&compressed).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn test_jpeg_reencoded() {
        let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([x as u8 * 8, y as u8 * 8, 0]));
        let mut source = Vec::new();
        JpegEncoder::new_with_quality(&mut source, 100)
            .write_image(img.as_raw(), 32, 32, ExtendedColorType::Rgb8)
            .unwrap();

        let compressed = compress(Utf8Path::new("photo.JPG"), &source).unwrap();

        assert!(compressed.len() <= source.len());
        assert!(image::load_from_memory(&compressed).is_ok());
    }

    #[test]
    fn test_malformed_png_is_error() {
        let err = compress(Utf8Path::new("broken.png"), b"not a png").unwrap_err();
        assert!(matches!(err, ImageError::Image(_)));
    }

    #[test]
    fn test_unknown_extension_passthrough() {
        let data = b"\x00\x01binary";
        assert_eq!(compress(Utf8Path::new("icon.ico"), data).unwrap(), data);
    }

    #[test]
    fn test_svg_rewritten_compact() {
        let svg = br#"<?xml version="1.0"?>
<!-- drawn by hand -->
<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10" viewBox="0 0 10 10">
  <metadata>anything</metadata>
  <rect id="box" x="1" y="1" width="8" height="8" fill="red"/>
</svg>
"#;

        let out = String::from_utf8(optimize_svg(svg).unwrap()).unwrap();

        assert!(out.contains("<svg"), "{out}");
        assert!(out.contains("viewBox="), "{out}");
        assert!(out.contains("id=\"box\""), "{out}");
        assert!(!out.contains("drawn by hand"));
        assert!(!out.contains("metadata"));
        assert!(!out.trim_end().contains('\n'), "{out}");
    }

    #[test]
    fn test_svg_with_text_unchanged() {
        let svg = b"<svg><text><tspan>Hello</tspan> <tspan>World</tspan></text></svg>";

        assert_eq!(optimize_svg(svg).unwrap(), svg);
        assert_eq!(compress(Utf8Path::new("label.svg"), svg).unwrap(), svg);
    }

    #[test]
    fn test_malformed_svg_is_error() {
        let err = compress(Utf8Path::new("broken.svg"), b"<svg><g></svg>").unwrap_err();
        assert!(matches!(err, ImageError::Svg(_)));
    }

    fn sample_gif(repeat: Option<Repeat>) -> Vec<u8> {
        let frames = [Rgba([255, 0, 0, 255]), Rgba([0, 0, 255, 255])]
            .map(|color| Frame::new(RgbaImage::from_pixel(16, 16, color)));

        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            if let Some(repeat) = repeat {
                encoder.set_repeat(repeat).unwrap();
            }
            encoder.encode_frames(frames).unwrap();
        }
        out
    }

    fn frame_count(data: &[u8]) -> usize {
        GifDecoder::new(Cursor::new(data))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap()
            .len()
    }

    #[test]
    fn test_gif_keeps_frames_and_loop_count() {
        let source = sample_gif(Some(Repeat::Finite(3)));
        assert_eq!(loop_count(&source), Some(3));

        let out = encode_gif(&source).unwrap();

        assert_eq!(frame_count(&out), 2);
        assert_eq!(loop_count(&out), Some(3));
    }

    #[test]
    fn test_gif_infinite_and_play_once() {
        let forever = encode_gif(&sample_gif(Some(Repeat::Infinite))).unwrap();
        let once = encode_gif(&sample_gif(None)).unwrap();

        assert_eq!(loop_count(&forever), Some(0));
        assert_eq!(loop_count(&once), None);
        assert_eq!(frame_count(&once), 2);
    }

    #[test]
    fn test_gif_never_grows() {
        let source = sample_gif(Some(Repeat::Finite(1)));

        let out = compress(Utf8Path::new("anim.gif"), &source).unwrap();

        assert!(out.len() <= source.len());
        assert_eq!(frame_count(&out), 2);
    }
}
