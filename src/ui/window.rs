//! Main application window: print screen with the license dialog layered on top.

use gtk4 as gtk;
use gtk4::prelude::*;
use libadwaita as adw;
use libadwaita::prelude::*;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::app::{AppContext, AppMessage, View};
use crate::config::ExecutionContext;
use crate::license::LicenseQr;
use crate::state::{LicenseEvent, OverlayLayout};
use crate::ui::license_overlay::LicenseOverlay;
use crate::ui::print_panel::PrintPanel;

pub struct MainWindow {
    pub window: adw::ApplicationWindow,
    ctx: Rc<AppContext>,
    overlay: gtk::Overlay,
    print_panel: PrintPanel,
    license: RefCell<Option<LicenseOverlay>>,
    /// QR that arrived before the dialog was mounted
    pending_qr: RefCell<Option<LicenseQr>>,
}

impl MainWindow {
    pub fn new(app: &adw::Application, ctx: Rc<AppContext>) -> Rc<Self> {
        let window = adw::ApplicationWindow::builder()
            .application(app)
            .title("坐席卡打印")
            .default_width(1024)
            .default_height(600)
            .build();

        // The device panel runs the app full screen
        if ctx.config.execution_context == ExecutionContext::Embedded {
            window.connect_map(|window| {
                let window = window.clone();
                glib::timeout_add_local_once(std::time::Duration::from_millis(100), move || {
                    window.fullscreen();
                });
            });
        }

        let print_panel = PrintPanel::new();

        let overlay = gtk::Overlay::new();
        overlay.set_child(Some(&print_panel.root));
        window.set_content(Some(&overlay));

        let main_window = Rc::new(Self {
            window,
            ctx,
            overlay,
            print_panel,
            license: RefCell::new(None),
            pending_qr: RefCell::new(None),
        });

        main_window.connect_handlers();
        main_window.load_css();

        main_window
    }

    fn load_css(&self) {
        let provider = gtk::CssProvider::new();
        provider.load_from_string(include_str!("../../resources/style.css"));

        match gtk::gdk::Display::default() {
            Some(display) => gtk::style_context_add_provider_for_display(
                &display,
                &provider,
                gtk::STYLE_PROVIDER_PRIORITY_APPLICATION,
            ),
            None => log::warn!("No display, skipping stylesheet"),
        }
    }

    /// Connect print screen handlers to the app context
    fn connect_handlers(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.print_panel.connect_print(move || {
            if let Some(this) = weak.upgrade() {
                let settings = this.print_panel.settings();
                this.ctx.request_print(settings, this.as_ref());
            }
        });

        let weak = Rc::downgrade(self);
        self.print_panel.connect_download(move || {
            if let Some(this) = weak.upgrade() {
                this.ctx.request_download(this.as_ref());
            }
        });

        let ctx = self.ctx.clone();
        self.print_panel.connect_storage(move || ctx.check_storage());
    }

    fn connect_license_handlers(ctx: &Rc<AppContext>, license: &LicenseOverlay) {
        let submit_ctx = ctx.clone();
        license.connect_authorize(move |code| submit_ctx.submit_code(&code));

        let retry_ctx: Weak<AppContext> = Rc::downgrade(ctx);
        license.connect_retry(move || {
            if let Some(ctx) = retry_ctx.upgrade() {
                ctx.send_event(LicenseEvent::RetryStatus);
            }
        });
    }

    /// Handle app messages - main entry point for state updates
    pub fn handle_message(self: &Rc<Self>, msg: AppMessage) {
        self.ctx.handle_message(msg, self.as_ref());
    }
}

impl View for MainWindow {
    fn mount_license_overlay(&self, layout: OverlayLayout) {
        if self.license.borrow().is_some() {
            return;
        }

        let license = LicenseOverlay::new(layout, &self.ctx.config.license_portal_url);
        Self::connect_license_handlers(&self.ctx, &license);
        if let Some(qr) = self.pending_qr.borrow_mut().take() {
            license.set_qr(&qr);
        }
        self.overlay.add_overlay(&license.root);
        *self.license.borrow_mut() = Some(license);
    }

    fn set_license_overlay_visible(&self, visible: bool) {
        if let Some(ref license) = *self.license.borrow() {
            license.set_visible(visible);
        }
    }

    fn set_license_message(&self, message: &str) {
        if let Some(ref license) = *self.license.borrow() {
            license.set_message(message);
        }
    }

    fn set_license_qr(&self, qr: &LicenseQr) {
        match *self.license.borrow() {
            Some(ref license) => license.set_qr(qr),
            None => *self.pending_qr.borrow_mut() = Some(qr.clone()),
        }
    }

    fn set_status(&self, message: &str) {
        self.print_panel.set_status(message);
    }

    fn set_print_enabled(&self, enabled: bool) {
        self.print_panel.set_print_enabled(enabled);
    }

    fn set_usb_present(&self, present: bool) {
        self.print_panel.set_usb_present(present);
    }
}
