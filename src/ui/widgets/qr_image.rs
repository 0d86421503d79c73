//! License QR code rendered into a GDK texture.

use gtk4 as gtk;

use crate::license::LicenseQr;

/// Light modules on a dark card, matching the license dialog
const FOREGROUND: [u8; 3] = [0xf1, 0xf1, 0xf2];
const BACKGROUND: [u8; 3] = [0x3e, 0x3f, 0x44];

/// Quiet zone around the code, in modules
const QUIET_ZONE: usize = 2;

/// Rasterize a QR code as packed RGB rows. Returns the side length in pixels.
pub fn qr_pixels(qr: &LicenseQr, module_px: usize) -> (usize, Vec<u8>) {
    let modules = qr.width + QUIET_ZONE * 2;
    let side = modules * module_px;
    let mut pixels = Vec::with_capacity(side * side * 3);

    for py in 0..side {
        let y = py / module_px;
        for px in 0..side {
            let x = px / module_px;
            let dark = x >= QUIET_ZONE
                && y >= QUIET_ZONE
                && x < qr.width + QUIET_ZONE
                && y < qr.width + QUIET_ZONE
                && qr.is_dark(x - QUIET_ZONE, y - QUIET_ZONE);
            pixels.extend_from_slice(if dark { &FOREGROUND } else { &BACKGROUND });
        }
    }

    (side, pixels)
}

pub fn qr_texture(qr: &LicenseQr, module_px: u32) -> gtk::gdk::MemoryTexture {
    let (side, pixels) = qr_pixels(qr, module_px as usize);
    let bytes = glib::Bytes::from_owned(pixels);
    gtk::gdk::MemoryTexture::new(
        side as i32,
        side as i32,
        gtk::gdk::MemoryFormat::R8g8b8,
        &bytes,
        side * 3,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixels_cover_quiet_zone() {
        let qr = LicenseQr::encode("https://portal.example/license?sn=1").unwrap();
        let (side, pixels) = qr_pixels(&qr, 3);

        assert_eq!(side, (qr.width + 4) * 3);
        assert_eq!(pixels.len(), side * side * 3);
        // Top-left pixel is quiet zone, the first finder module is dark
        assert_eq!(&pixels[0..3], &BACKGROUND);
        let first_module = (QUIET_ZONE * 3 * side + QUIET_ZONE * 3) * 3;
        assert_eq!(&pixels[first_module..first_module + 3], &FOREGROUND);
    }
}
