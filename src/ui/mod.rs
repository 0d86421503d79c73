//! GTK front-end.

pub mod license_overlay;
pub mod print_panel;
pub mod widgets;
pub mod window;

pub use window::MainWindow;
