//! Print screen: font choices, print and USB actions, status line.

use gtk4 as gtk;
use gtk4::prelude::*;

use crate::print::{self, FontColor, PrintSettings};

pub struct PrintPanel {
    pub root: gtk::Box,
    size_buttons: Vec<(u32, gtk::CheckButton)>,
    color_buttons: Vec<(FontColor, gtk::CheckButton)>,
    print_button: gtk::Button,
    download_button: gtk::Button,
    storage_button: gtk::Button,
    usb_label: gtk::Label,
    status: gtk::Label,
}

/// Row of mutually exclusive check buttons, one per option
fn radio_row<T: Copy + PartialEq>(
    title: &str,
    options: &[(T, String)],
    selected: T,
) -> (gtk::Box, Vec<(T, gtk::CheckButton)>) {
    let row = gtk::Box::new(gtk::Orientation::Horizontal, 12);
    row.append(&gtk::Label::new(Some(title)));

    let mut buttons: Vec<(T, gtk::CheckButton)> = Vec::new();
    for (value, label) in options {
        let button = gtk::CheckButton::with_label(label);
        if let Some((_, first)) = buttons.first() {
            button.set_group(Some(first));
        }
        button.set_active(*value == selected);
        row.append(&button);
        buttons.push((*value, button));
    }

    (row, buttons)
}

impl PrintPanel {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 16);
        root.add_css_class("print-panel");
        root.set_valign(gtk::Align::Center);
        root.set_halign(gtk::Align::Center);

        let sizes: Vec<(u32, String)> = print::FONT_SIZES
            .iter()
            .map(|size| (*size, size.to_string()))
            .collect();
        let (size_row, size_buttons) =
            radio_row("字体大小", &sizes, print::DEFAULT_FONT_SIZE);

        let colors: Vec<(FontColor, String)> = FontColor::ALL
            .iter()
            .map(|color| (*color, color.label().to_string()))
            .collect();
        let (color_row, color_buttons) =
            radio_row("字体颜色", &colors, FontColor::default());

        let print_button = gtk::Button::with_label("打印");
        print_button.add_css_class("suggested-action");
        print_button.set_sensitive(false);

        let download_button = gtk::Button::with_label("下载参考文件");
        let storage_button = gtk::Button::with_label("查看文件");

        let actions = gtk::Box::new(gtk::Orientation::Horizontal, 12);
        actions.set_halign(gtk::Align::Center);
        actions.append(&print_button);
        actions.append(&download_button);
        actions.append(&storage_button);

        let usb_label = gtk::Label::new(Some(print::MSG_INSERT_USB));

        let status = gtk::Label::new(None);
        status.add_css_class("status-label");
        status.set_wrap(true);

        root.append(&size_row);
        root.append(&color_row);
        root.append(&actions);
        root.append(&usb_label);
        root.append(&status);

        Self {
            root,
            size_buttons,
            color_buttons,
            print_button,
            download_button,
            storage_button,
            usb_label,
            status,
        }
    }

    /// Settings for the currently selected font options
    pub fn settings(&self) -> PrintSettings {
        let font_size = self
            .size_buttons
            .iter()
            .find(|(_, b)| b.is_active())
            .map(|(size, _)| *size)
            .unwrap_or(print::DEFAULT_FONT_SIZE);
        let font_color = self
            .color_buttons
            .iter()
            .find(|(_, b)| b.is_active())
            .map(|(color, _)| *color)
            .unwrap_or_default();
        PrintSettings::new(font_size, font_color)
    }

    pub fn connect_print<F: Fn() + 'static>(&self, f: F) {
        self.print_button.connect_clicked(move |_| f());
    }

    pub fn connect_download<F: Fn() + 'static>(&self, f: F) {
        self.download_button.connect_clicked(move |_| f());
    }

    pub fn connect_storage<F: Fn() + 'static>(&self, f: F) {
        self.storage_button.connect_clicked(move |_| f());
    }

    pub fn set_print_enabled(&self, enabled: bool) {
        self.print_button.set_sensitive(enabled);
    }

    pub fn set_usb_present(&self, present: bool) {
        self.usb_label
            .set_text(if present { "USB已插入" } else { print::MSG_INSERT_USB });
    }

    pub fn set_status(&self, message: &str) {
        self.status.set_text(message);
    }
}
