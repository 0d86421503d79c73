//! License codes, application identity, the license QR code and the
//! authorization signal fired once the app is licensed.

use std::sync::Mutex;

use qrcode::{Color, EcLevel, QrCode};
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::api::http::{AppContextInfo, Capability};

/// Required length of a license code
pub const LICENSE_CODE_LEN: usize = 7;

/// Leading characters that mark a valid license category
pub const LICENSE_CATEGORIES: [char; 4] = ['1', '2', '3', '9'];

/// Client-side license code format errors. The display text is shown inline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeError {
    #[error("请输入7位License码！")]
    WrongLength,
    #[error("License码不合法！")]
    BadCategory,
}

/// A license code that passed the client-side format check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseCode(String);

impl LicenseCode {
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        if input.chars().count() != LICENSE_CODE_LEN {
            return Err(CodeError::WrongLength);
        }
        match input.chars().next() {
            Some(c) if LICENSE_CATEGORIES.contains(&c) => Ok(Self(input.to_string())),
            _ => Err(CodeError::BadCategory),
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Identity of this application on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: String,
    /// Unknown when the id was supplied by an administrative caller
    pub app_version: Option<String>,
}

impl AppIdentity {
    pub fn explicit(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_version: None,
        }
    }
}

impl From<AppContextInfo> for AppIdentity {
    fn from(info: AppContextInfo) -> Self {
        Self {
            app_id: info.app_id,
            app_version: Some(info.app_version),
        }
    }
}

/// Portal URL encoded in the license QR code
pub fn qr_payload(
    portal: &str,
    capability: &Capability,
    context: &AppContextInfo,
) -> Result<String, url::ParseError> {
    let url = Url::parse_with_params(
        portal,
        &[
            ("sn", capability.serial_no.as_str()),
            ("mn", capability.model_name.as_str()),
            ("appid", context.app_id.as_str()),
            ("appv", context.app_version.as_str()),
        ],
    )?;
    Ok(url.into())
}

#[derive(Error, Debug)]
pub enum QrError {
    #[error("QR encoding failed: {0}")]
    Encode(String),
}

/// Square module matrix of an encoded QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseQr {
    pub payload: String,
    pub width: usize,
    modules: Vec<bool>,
}

impl LicenseQr {
    pub fn encode(payload: &str) -> Result<Self, QrError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
            .map_err(|e| QrError::Encode(e.to_string()))?;
        let modules = code
            .to_colors()
            .into_iter()
            .map(|c| c == Color::Dark)
            .collect();

        Ok(Self {
            payload: payload.to_string(),
            width: code.width(),
            modules,
        })
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.modules[y * self.width + x]
    }

    /// Render as text, two modules per character row, for consoles.
    pub fn to_text(&self) -> String {
        let quiet = 2;
        let size = self.width + quiet * 2;
        let dark = |x: usize, y: usize| {
            x >= quiet
                && y >= quiet
                && x < self.width + quiet
                && y < self.width + quiet
                && self.is_dark(x - quiet, y - quiet)
        };

        let mut out = String::new();
        for y in (0..size).step_by(2) {
            for x in 0..size {
                out.push(match (dark(x, y), dark(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            out.push('\n');
        }
        out
    }
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    settled: bool,
    callbacks: Vec<Callback>,
}

/// Settled exactly once, when the license is first found valid.
///
/// Callbacks run in registration order at that moment; callbacks registered
/// afterwards run immediately. `wait` resolves `true` once settled.
pub struct Authorization {
    registry: Mutex<Registry>,
    tx: watch::Sender<bool>,
}

impl Default for Authorization {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorization {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            registry: Mutex::new(Registry::default()),
            tx,
        }
    }

    pub fn on_authorized<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if registry.settled {
            drop(registry);
            callback();
        } else {
            registry.callbacks.push(Box::new(callback));
        }
    }

    /// Settle and run the pending callbacks. Returns false if already settled.
    pub fn settle(&self) -> bool {
        let callbacks = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            if registry.settled {
                return false;
            }
            registry.settled = true;
            std::mem::take(&mut registry.callbacks)
        };

        log::info!("License authorized, running {} callback(s)", callbacks.len());
        for callback in callbacks {
            callback();
        }
        self.tx.send_replace(true);
        true
    }

    /// Future resolving `true` once settled
    pub fn wait(&self) -> impl std::future::Future<Output = bool> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move { rx.wait_for(|settled| *settled).await.is_ok() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_code_format() {
        assert!(LicenseCode::parse("1234567").is_ok());
        assert!(LicenseCode::parse("2abcdef").is_ok());
        assert!(LicenseCode::parse("3000000").is_ok());
        assert!(LicenseCode::parse("9999999").is_ok());

        assert_eq!(LicenseCode::parse("abc"), Err(CodeError::WrongLength));
        assert_eq!(LicenseCode::parse(""), Err(CodeError::WrongLength));
        assert_eq!(LicenseCode::parse("12345678"), Err(CodeError::WrongLength));
        assert_eq!(LicenseCode::parse("4123456"), Err(CodeError::BadCategory));
        assert_eq!(LicenseCode::parse("0123456"), Err(CodeError::BadCategory));
        assert_eq!(LicenseCode::parse(" 123456"), Err(CodeError::BadCategory));
    }

    #[test]
    fn test_code_error_messages() {
        assert_eq!(CodeError::WrongLength.to_string(), "请输入7位License码！");
        assert_eq!(CodeError::BadCategory.to_string(), "License码不合法！");
    }

    #[test]
    fn test_code_length_counts_characters() {
        assert_eq!(LicenseCode::parse("1授权码授权码"), Ok(LicenseCode("1授权码授权码".into())));
    }

    #[test]
    fn test_qr_payload() {
        let capability = Capability {
            serial_no: "CJJ12345".into(),
            model_name: "2010AC".into(),
        };
        let context = AppContextInfo {
            app_id: "X".into(),
            app_version: "1.0".into(),
        };
        assert_eq!(
            qr_payload("https://portal.example/license/embedded", &capability, &context).unwrap(),
            "https://portal.example/license/embedded?sn=CJJ12345&mn=2010AC&appid=X&appv=1.0"
        );
    }

    #[test]
    fn test_qr_encode() {
        let qr = LicenseQr::encode("https://portal.example/license?sn=1").unwrap();
        assert!(qr.width >= 21);
        // Finder pattern corner
        assert!(qr.is_dark(0, 0));
        assert!(!qr.to_text().is_empty());
    }

    #[test]
    fn test_callbacks_fire_once_in_order() {
        let auth = Authorization::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            auth.on_authorized(move || order.lock().unwrap().push(id));
        }
        assert!(order.lock().unwrap().is_empty());

        assert!(auth.settle());
        assert!(!auth.settle());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let auth = Authorization::new();
        auth.settle();

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        auth.on_authorized(move || *flag.lock().unwrap() = true);
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_wait_resolves_after_settle() {
        let auth = Arc::new(Authorization::new());
        let pending = auth.wait();

        let settler = auth.clone();
        tokio::spawn(async move {
            settler.settle();
        });

        assert!(pending.await);
        // Late waiters see the settled value straight away
        assert!(auth.wait().await);
    }
}
