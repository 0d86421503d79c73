//! Headless front-end: UI changes go to the log, input comes from stdin.

use std::cell::{Cell, RefCell};
use std::io::BufRead;
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::app::{AppContext, AppMessage, View};
use crate::license::LicenseQr;
use crate::print::{self, FontColor, PrintSettings};
use crate::state::{LicenseEvent, OverlayLayout};

/// A line typed on the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Anything that is not a keyword is taken as a license code
    Code(String),
    Print { font_size: u32, font_color: FontColor },
    Download,
    CheckStorage,
    CheckLicense,
    RetryLicense,
    RemoveLicense,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "print" => {
            let mut font_size = print::DEFAULT_FONT_SIZE;
            let mut font_color = FontColor::default();
            for word in words {
                match word {
                    "black" => font_color = FontColor::Black,
                    "blue" => font_color = FontColor::Blue,
                    "golden" => font_color = FontColor::Golden,
                    other => font_size = other.parse().ok()?,
                }
            }
            ConsoleCommand::Print {
                font_size,
                font_color,
            }
        }
        "download" => ConsoleCommand::Download,
        "files" => ConsoleCommand::CheckStorage,
        "status" => ConsoleCommand::CheckLicense,
        "retry" => ConsoleCommand::RetryLicense,
        "remove" => ConsoleCommand::RemoveLicense,
        // Codes are taken verbatim so the length check sees what was typed
        _ => ConsoleCommand::Code(line.trim_end_matches(['\r', '\n']).to_string()),
    };
    Some(command)
}

/// View that reports UI changes through the log
#[derive(Default)]
pub struct ConsoleView {
    layout: Cell<Option<OverlayLayout>>,
    overlay_visible: Cell<bool>,
    qr: RefCell<Option<LicenseQr>>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    fn print_dialog(&self) {
        println!("=== 应用授权 ===");
        if let Some(ref qr) = *self.qr.borrow() {
            println!("{}", qr.to_text());
            if self.layout.get() == Some(OverlayLayout::Compact) {
                println!("获取授权码: {}", qr.payload);
            }
        }
        println!("请扫描二维码或访问网址获取授权码，然后输入7位授权码:");
    }
}

impl View for ConsoleView {
    fn mount_license_overlay(&self, layout: OverlayLayout) {
        log::debug!("License overlay mounted ({:?})", layout);
        self.layout.set(Some(layout));
    }

    fn set_license_overlay_visible(&self, visible: bool) {
        let was_visible = self.overlay_visible.replace(visible);
        if visible && !was_visible {
            self.print_dialog();
        } else if !visible && was_visible {
            println!("授权成功！");
        }
    }

    fn set_license_message(&self, message: &str) {
        if !message.is_empty() {
            println!("{}", message);
        }
    }

    fn set_license_qr(&self, qr: &LicenseQr) {
        *self.qr.borrow_mut() = Some(qr.clone());
        if self.overlay_visible.get() {
            self.print_dialog();
        }
    }

    fn set_status(&self, message: &str) {
        log::info!("Status: {}", message);
        println!("{}", message);
    }

    fn set_print_enabled(&self, enabled: bool) {
        log::info!("Print {}", if enabled { "enabled" } else { "disabled" });
    }

    fn set_usb_present(&self, present: bool) {
        log::info!("USB {}", if present { "inserted" } else { "removed" });
    }
}

/// Read stdin lines on a dedicated thread
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn execute(ctx: &Rc<AppContext>, view: &ConsoleView, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Code(code) => ctx.submit_code(&code),
        ConsoleCommand::Print {
            font_size,
            font_color,
        } => ctx.request_print(PrintSettings::new(font_size, font_color), view),
        ConsoleCommand::Download => ctx.request_download(view),
        ConsoleCommand::CheckStorage => ctx.check_storage(),
        ConsoleCommand::CheckLicense => ctx.send_event(LicenseEvent::CheckStatus),
        ConsoleCommand::RetryLicense => ctx.send_event(LicenseEvent::RetryStatus),
        ConsoleCommand::RemoveLicense => ctx.send_event(LicenseEvent::Remove),
    }
}

/// Drive the context until both the message channel and stdin close
pub async fn run(
    ctx: Rc<AppContext>,
    mut rx: mpsc::UnboundedReceiver<AppMessage>,
    view: ConsoleView,
) {
    let mut input = spawn_stdin_reader();
    let mut input_open = true;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => ctx.handle_message(msg, &view),
                None => break,
            },
            line = input.recv(), if input_open => match line {
                Some(line) => {
                    if let Some(command) = parse_command(&line) {
                        execute(&ctx, &view, command);
                    }
                }
                None => input_open = false,
            },
        }
    }
}
