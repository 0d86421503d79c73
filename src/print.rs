//! Print job and USB file flows.
//!
//! The flows themselves run in `app`; this module holds the request types and
//! the mapping from outcomes to the messages shown on screen.

use serde::Serialize;

use crate::api::http::{ApiError, CopyDirection, CopyRequest};

/// File read from the USB drive for every print job
pub const PRINT_SOURCE_FILE: &str = "zxk.csv";
/// App storage directory the print source is copied into
pub const PRINT_SOURCE_DIR: &str = "documents";
/// Directory of reference documents offered for download to USB
pub const REFERENCE_DIR: &str = "坐席卡打印参考";

/// Name font sizes offered on the print screen
pub const FONT_SIZES: [u32; 3] = [120, 130, 140];
pub const DEFAULT_FONT_SIZE: u32 = 130;

pub const MSG_INSERT_USB: &str = "请插入USB再试！";
pub const MSG_CSV_READ: &str = "成功读取到CSV文件！";
pub const MSG_CSV_MISSING: &str = "CSV文件没有找到！";
pub const MSG_JOB_DISPATCHED: &str = "打印作业将在后台启动！";
pub const MSG_DOWNLOADING: &str = "下载中！";
pub const MSG_DOWNLOAD_OK: &str = "参考文件下载成功！请查看USB！";
pub const MSG_DOWNLOAD_FAILED: &str = "参考文件下载失败！";

/// Error codes returned by the app backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Undefined = 0,
    InvalidRequest = 1,
    CommunicationFailed = 2,
    PrintJobCannotStarted = 3,
    ScanJobCannotStarted = 4,
    ScanJobCannotResumed = 5,
}

impl ErrorCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Undefined),
            1 => Some(Self::InvalidRequest),
            2 => Some(Self::CommunicationFailed),
            3 => Some(Self::PrintJobCannotStarted),
            4 => Some(Self::ScanJobCannotStarted),
            5 => Some(Self::ScanJobCannotResumed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontColor {
    #[default]
    Black,
    Blue,
    Golden,
}

impl FontColor {
    pub const ALL: [FontColor; 3] = [FontColor::Black, FontColor::Blue, FontColor::Golden];

    pub fn label(self) -> &'static str {
        match self {
            FontColor::Black => "黑色",
            FontColor::Blue => "蓝色",
            FontColor::Golden => "金色",
        }
    }
}

/// Settings sent with `POST /print/jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintSettings {
    pub sets: u32,
    pub paper_size: String,
    pub color_mode: String,
    pub font_size: u32,
    pub font_color: FontColor,
}

impl PrintSettings {
    /// One A4 full-colour set with the chosen font
    pub fn new(font_size: u32, font_color: FontColor) -> Self {
        Self {
            sets: 1,
            paper_size: "a4".to_string(),
            color_mode: "full_color".to_string(),
            font_size,
            font_color,
        }
    }
}

/// Copy of the print source from USB into app storage
pub fn print_source_copy() -> CopyRequest {
    CopyRequest {
        from_path: PRINT_SOURCE_FILE.to_string(),
        to_path: PRINT_SOURCE_DIR.to_string(),
        operation_type: CopyDirection::UsbToApp,
    }
}

/// Copy of the reference documents from app storage onto USB
pub fn reference_copy() -> CopyRequest {
    CopyRequest {
        from_path: REFERENCE_DIR.to_string(),
        to_path: String::new(),
        operation_type: CopyDirection::AppToUsb,
    }
}

/// Message shown when a print job could not be started
pub fn print_failure_message(error: &ApiError) -> String {
    match error.rejection() {
        Some(rejection)
            if ErrorCode::from_code(rejection.error_code)
                == Some(ErrorCode::PrintJobCannotStarted) =>
        {
            let error_type = rejection
                .error_details
                .and_then(|d| d.error_type)
                .unwrap_or_default();
            format!("无法启动打印作业，错误原因：\"{}\".", error_type)
        }
        _ => match error {
            ApiError::Server { body, .. } => format!("启动打印作业时发生意外错误！{}", body),
            other => format!("启动打印作业时发生意外错误！{}", other),
        },
    }
}

/// Status line summarising the app and USB storage listings
pub fn storage_summary(app_files: Option<&[String]>, usb_files: Option<&[String]>) -> String {
    let mut summary = String::new();
    if let Some(files) = app_files {
        summary.push_str(&format!("App中的文件有：{}", files.join(", ")));
    }
    if let Some(files) = usb_files {
        summary.push_str(&format!("USB中的文件有：{}", files.join(", ")));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_print_settings_wire_format() {
        let settings = PrintSettings::new(90, FontColor::Golden);
        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({
                "sets": 1,
                "paper_size": "a4",
                "color_mode": "full_color",
                "font_size": 90,
                "font_color": "golden",
            })
        );
    }

    #[test]
    fn test_print_cannot_start_message() {
        let err = ApiError::Server {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error_code":3,"error_details":{"error_type":"Storage Full Error"}}"#.into(),
        };
        assert_eq!(
            print_failure_message(&err),
            "无法启动打印作业，错误原因：\"Storage Full Error\"."
        );
    }

    #[test]
    fn test_unexpected_print_error_message() {
        let err = ApiError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: r#"{"error_code":2}"#.into(),
        };
        assert_eq!(
            print_failure_message(&err),
            "启动打印作业时发生意外错误！{\"error_code\":2}"
        );
        assert_eq!(
            print_failure_message(&ApiError::MissingAppId),
            "启动打印作业时发生意外错误！Application id is not resolved yet"
        );
    }

    #[test]
    fn test_copy_requests() {
        let source = print_source_copy();
        assert_eq!(source.from_path, "zxk.csv");
        assert_eq!(source.operation_type, CopyDirection::UsbToApp);

        let reference = reference_copy();
        assert_eq!(reference.to_path, "");
        assert_eq!(reference.operation_type, CopyDirection::AppToUsb);
    }

    #[test]
    fn test_storage_summary() {
        let app = vec!["documents/zxk.csv".to_string()];
        assert_eq!(
            storage_summary(Some(app.as_slice()), None),
            "App中的文件有：documents/zxk.csv"
        );
        assert_eq!(storage_summary(None, None), "");
    }
}
