//! Reusable UI widgets.

pub mod qr_image;

pub use qr_image::qr_texture;
