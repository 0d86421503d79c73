//! License dialog layered over the app until a valid code is entered.

use gtk4 as gtk;
use gtk4::prelude::*;
use std::rc::Rc;

use crate::config;
use crate::license::{LicenseQr, LICENSE_CODE_LEN};
use crate::state::OverlayLayout;
use crate::ui::widgets;

pub struct LicenseOverlay {
    pub root: gtk::Box,
    qr: gtk::Picture,
    entry: gtk::Entry,
    authorize_button: gtk::Button,
    retry_button: gtk::Button,
    message: gtk::Label,
    portal_link: Option<gtk::LinkButton>,
}

impl LicenseOverlay {
    pub fn new(layout: OverlayLayout, portal_url: &str) -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 16);
        root.add_css_class("license-card");
        root.set_hexpand(true);
        root.set_vexpand(true);
        root.set_visible(false);

        let title = gtk::Label::new(Some("应用授权"));
        title.add_css_class("license-title");
        root.append(&title);

        let qr = gtk::Picture::new();
        qr.set_can_shrink(true);

        let entry = gtk::Entry::new();
        entry.set_placeholder_text(Some("请输入7位授权码"));
        entry.set_max_length(LICENSE_CODE_LEN as i32);
        entry.set_alignment(0.5);
        entry.add_css_class("license-entry");

        let authorize_button = gtk::Button::with_label("授权");
        authorize_button.add_css_class("suggested-action");

        let retry_button = gtk::Button::with_label("重新检查授权状态");
        retry_button.add_css_class("flat");

        let message = gtk::Label::new(None);
        message.add_css_class("license-message");
        message.set_wrap(true);

        let form = gtk::Box::new(gtk::Orientation::Vertical, 12);
        form.set_valign(gtk::Align::Center);

        let portal_link = match layout {
            OverlayLayout::FullScreen => {
                let body = gtk::Box::new(gtk::Orientation::Vertical, 12);
                body.set_halign(gtk::Align::Center);
                body.append(&gtk::Label::new(Some("请扫描二维码或访问网址获取授权码")));
                qr.set_size_request(320, 320);
                body.append(&qr);
                body.append(&gtk::Label::new(Some(portal_url)));
                root.append(&body);
                None
            }
            OverlayLayout::Compact => {
                let body = gtk::Box::new(gtk::Orientation::Horizontal, 24);
                body.set_halign(gtk::Align::Center);
                qr.set_size_request(220, 220);
                body.append(&qr);
                form.append(&gtk::Label::new(Some("请扫描二维码或点击获取授权码")));
                body.append(&form);
                root.append(&body);
                Some(gtk::LinkButton::with_label(portal_url, "获取授权码"))
            }
        };

        form.append(&entry);
        form.append(&authorize_button);
        form.append(&message);
        form.append(&retry_button);
        if let Some(ref link) = portal_link {
            form.append(link);
        }
        if layout == OverlayLayout::FullScreen {
            root.append(&form);
        }

        Self {
            root,
            qr,
            entry,
            authorize_button,
            retry_button,
            message,
            portal_link,
        }
    }

    /// Call `on_submit` with the entry text on click or Enter
    pub fn connect_authorize<F>(&self, on_submit: F)
    where
        F: Fn(String) + 'static,
    {
        let on_submit = Rc::new(on_submit);

        let entry = self.entry.clone();
        let submit = on_submit.clone();
        self.authorize_button.connect_clicked(move |_| {
            submit(entry.text().to_string());
        });

        self.entry.connect_activate(move |entry| {
            on_submit(entry.text().to_string());
        });
    }

    pub fn connect_retry<F>(&self, on_retry: F)
    where
        F: Fn() + 'static,
    {
        self.retry_button.connect_clicked(move |_| on_retry());
    }

    pub fn set_visible(&self, visible: bool) {
        self.root.set_visible(visible);
        if visible {
            self.entry.grab_focus();
        }
    }

    pub fn set_message(&self, message: &str) {
        self.message.set_text(message);
    }

    pub fn set_qr(&self, qr: &LicenseQr) {
        let texture = widgets::qr_texture(qr, config::QR_MODULE_PX);
        self.qr.set_paintable(Some(&texture));
        if let Some(ref link) = self.portal_link {
            link.set_uri(&qr.payload);
        }
    }
}
