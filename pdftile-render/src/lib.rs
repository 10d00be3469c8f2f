//! Concrete document engines for `pdftile-core`.
//!
//! With the default `pdf` feature, [`PdfiumEngine`] opens PDF files through
//! Pdfium. Each page records a backdrop that Pdfium rasterizes at whatever
//! size a tile replay asks for, plus an invisible text layer carrying
//! Pdfium's character boxes.

use anyhow::{Context, Result};
use pdftile_core::{Image, Matrix, PageGeometry, PageTransform, POINTS_PER_INCH};

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumEngine;

/// Converts tightly packed RGBA bytes into `0xAARRGGBB` pixels.
pub fn rgba_to_argb(rgba: &[u8]) -> Vec<u32> {
    rgba.chunks_exact(4)
        .map(|px| u32::from_be_bytes([px[3], px[0], px[1], px[2]]))
        .collect()
}

pub fn image_from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Image> {
    Image::from_argb(width, height, rgba_to_argb(rgba))
        .with_context(|| format!("bitmap of {} bytes is not {width}x{height}", rgba.len()))
}

/// Places an upright rendering of the page's visible area: the matrix maps
/// the unit image square onto the page bounds in native space, first texel
/// row along the displayed top edge.
pub fn backdrop_placement(geometry: &PageGeometry) -> Result<Matrix> {
    let natural = PageTransform::natural(geometry, POINTS_PER_INCH)?;
    let inverse = natural.inverse()?;
    let device = natural.ctm.transform_rect(&geometry.bounds);
    let unit_to_device = Matrix::new(
        device.width(),
        0.0,
        0.0,
        device.height(),
        device.x0,
        device.y0,
    );
    Ok(unit_to_device.concat(&inverse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdftile_core::{Point, Rect, Rotation};

    fn assert_near(actual: Point, expected: Point) {
        assert!(
            (actual.x - expected.x).abs() < 0.01 && (actual.y - expected.y).abs() < 0.01,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn rgba_bytes_pack_into_argb() {
        let pixels = rgba_to_argb(&[0x11, 0x22, 0x33, 0x44, 0xff, 0x00, 0x80, 0xff]);
        assert_eq!(pixels, vec![0x4411_2233, 0xffff_0080]);
    }

    #[test]
    fn image_size_must_match_bytes() {
        assert!(image_from_rgba(2, 1, &[0; 8]).is_ok());
        assert!(image_from_rgba(2, 2, &[0; 8]).is_err());
    }

    #[test]
    fn backdrop_covers_the_upright_page() {
        let geometry = PageGeometry::new(Rect::new(0.0, 0.0, 612.0, 792.0), Rotation::Zero);
        let placement = backdrop_placement(&geometry).unwrap();
        // Top-left texel corner lands on the page's top-left corner.
        assert_near(placement.transform_point(Point::new(0.0, 0.0)), Point::new(0.0, 792.0));
        assert_near(placement.transform_point(Point::new(1.0, 1.0)), Point::new(612.0, 0.0));
    }

    #[test]
    fn backdrop_follows_page_rotation() {
        let geometry = PageGeometry::new(Rect::new(0.0, 0.0, 612.0, 792.0), Rotation::Quarter);
        let placement = backdrop_placement(&geometry).unwrap();
        // The upright raster's top-left is the page's bottom-left after a
        // clockwise quarter turn.
        assert_near(placement.transform_point(Point::new(0.0, 0.0)), Point::new(0.0, 0.0));
        let natural = PageTransform::natural(&geometry, 72.0).unwrap();
        let corner = natural.page_to_device(placement.transform_point(Point::new(1.0, 1.0)));
        assert_near(corner, Point::new(792.0, 612.0));
    }

    #[test]
    fn backdrop_covers_a_crop_box_smaller_than_the_media_box() {
        let crop = Rect::new(50.0, 50.0, 562.0, 742.0);
        let geometry = PageGeometry::new(crop, Rotation::Zero);
        let placement = backdrop_placement(&geometry).unwrap();
        assert_near(placement.transform_point(Point::new(0.0, 0.0)), Point::new(50.0, 742.0));
        assert_near(placement.transform_point(Point::new(1.0, 1.0)), Point::new(562.0, 50.0));

        // A glyph at native (50, 742) lands where the backdrop's first texel
        // is drawn, at every zoom.
        for resolution in [72.0, 160.0] {
            let natural = PageTransform::natural(&geometry, resolution).unwrap();
            assert_eq!(natural.bbox.width(), (512.0 * resolution / 72.0f32).round() as i32);
            let texel = natural.page_to_device(placement.transform_point(Point::new(0.0, 0.0)));
            let glyph = natural.page_to_device(Point::new(50.0, 742.0));
            assert_near(texel, glyph);
            assert_near(glyph, Point::new(0.0, 0.0));
        }
    }
}
