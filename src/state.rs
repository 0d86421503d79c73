//! GTK-free license gate state machine.
//!
//! This module contains the pure Rust state machine that can be tested
//! independently of GTK and the network. The app layer executes the
//! commands it emits and feeds request outcomes back in as events.

use crate::config::ExecutionContext;
use crate::license::{AppIdentity, LicenseCode};

pub const MSG_VERIFY_REJECTED: &str = "License码验证失败！";
pub const MSG_VERIFY_FAILED: &str = "授权验证请求失败，请重试！";
pub const MSG_STATUS_FAILED: &str = "无法获取授权状态，请点击授权重试！";

/// License states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseState {
    /// Not checked yet
    Unknown,
    /// Checked and invalid
    Unlicensed,
    /// A code was submitted and awaits the server's answer
    PendingValidation,
    /// Valid. Terminal.
    Licensed,
}

/// Overlay layout variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayLayout {
    /// Full-screen dialog for the device panel
    FullScreen,
    /// Fixed-size dialog with a portal link for the console
    Compact,
}

impl From<ExecutionContext> for OverlayLayout {
    fn from(context: ExecutionContext) -> Self {
        match context {
            ExecutionContext::Embedded => OverlayLayout::FullScreen,
            ExecutionContext::Administrative => OverlayLayout::Compact,
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum LicenseEvent {
    // Caller actions
    Initialize { app_id: Option<String> },
    CheckStatus,
    Remove,

    // User actions
    SubmitCode { code: String },
    RetryStatus,

    // Backend responses
    IdentityResolved { identity: AppIdentity },
    IdentityFailed { error: String },
    StatusChecked { is_valid: bool },
    StatusCheckFailed { error: String },
    CodeVerified { is_valid: bool, err_msg: Option<String> },
    VerifyFailed { error: String },
    Removed,
    RemoveFailed { error: String },
}

/// Commands emitted by the state machine for the UI/API layer to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseCommand {
    /// Query the device for the current application context
    ResolveIdentity,
    /// Route backend requests through this application id
    BindAppId { app_id: String },
    /// Insert the overlay and bind its submit handler
    MountOverlay { layout: OverlayLayout },
    /// Fetch capability and context, then render the QR code
    BuildQr,
    /// Call the license status API
    CheckStatus,
    /// Call the license verify API
    VerifyCode { code: String },
    /// Call the license remove API
    RemoveLicense,
    ShowOverlay,
    HideOverlay,
    /// Replace the inline message under the code entry
    ShowMessage { message: String },
    /// Settle the authorization and run its callbacks
    Authorize,
}

/// The license gate state machine
#[derive(Debug)]
pub struct LicenseStateMachine {
    pub state: LicenseState,
    pub identity: Option<AppIdentity>,
    pub layout: OverlayLayout,
    pub overlay_visible: bool,
    pub message: Option<String>,
    initialized: bool,
}

impl LicenseStateMachine {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            state: LicenseState::Unknown,
            identity: None,
            layout: context.into(),
            overlay_visible: false,
            message: None,
            initialized: false,
        }
    }

    pub fn is_licensed(&self) -> bool {
        self.state == LicenseState::Licensed
    }

    /// Process an event and return commands to execute
    pub fn process(&mut self, event: LicenseEvent) -> Vec<LicenseCommand> {
        let mut commands = Vec::new();

        match event {
            LicenseEvent::Initialize { app_id } => {
                if self.initialized {
                    log::debug!("License gate already initialized");
                    return commands;
                }
                self.initialized = true;

                match app_id {
                    Some(app_id) => self.resolve(AppIdentity::explicit(app_id), &mut commands),
                    None => commands.push(LicenseCommand::ResolveIdentity),
                }
            }

            LicenseEvent::IdentityResolved { identity } => {
                if self.identity.is_none() {
                    self.resolve(identity, &mut commands);
                }
            }

            LicenseEvent::IdentityFailed { error } => {
                log::error!("Failed to resolve application identity: {}", error);
            }

            LicenseEvent::CheckStatus => {
                if self.identity.is_some() {
                    commands.push(LicenseCommand::CheckStatus);
                }
            }

            LicenseEvent::RetryStatus => {
                if self.identity.is_some() && !self.is_licensed() {
                    self.message = None;
                    commands.push(LicenseCommand::ShowMessage {
                        message: String::new(),
                    });
                    commands.push(LicenseCommand::CheckStatus);
                }
            }

            LicenseEvent::StatusChecked { is_valid: true } => {
                log::info!("License is valid");
                self.overlay_visible = false;
                commands.push(LicenseCommand::HideOverlay);
                if !self.is_licensed() {
                    self.state = LicenseState::Licensed;
                    commands.push(LicenseCommand::Authorize);
                }
            }

            LicenseEvent::StatusChecked { is_valid: false } => {
                log::info!("License is not valid");
                match self.state {
                    LicenseState::Licensed => {}
                    LicenseState::PendingValidation => self.show(&mut commands),
                    LicenseState::Unknown | LicenseState::Unlicensed => {
                        self.state = LicenseState::Unlicensed;
                        self.show(&mut commands);
                    }
                }
            }

            LicenseEvent::StatusCheckFailed { error } => {
                log::error!("License status check failed: {}", error);
                // State is left as is; an unchecked gate offers a retry instead
                if self.state == LicenseState::Unknown {
                    self.show(&mut commands);
                    self.set_message(MSG_STATUS_FAILED.to_string(), &mut commands);
                }
            }

            LicenseEvent::SubmitCode { code } => match self.state {
                LicenseState::Unknown if !self.overlay_visible => {}
                LicenseState::Unknown => {
                    // Status could not be checked; the code is the only way forward
                    self.submit(&code, &mut commands);
                }
                LicenseState::Unlicensed => self.submit(&code, &mut commands),
                LicenseState::PendingValidation | LicenseState::Licensed => {
                    log::debug!("Ignoring submit in state {:?}", self.state);
                }
            },

            LicenseEvent::CodeVerified { is_valid, err_msg } => {
                if self.state != LicenseState::PendingValidation {
                    return commands;
                }
                if is_valid {
                    log::info!("License code accepted");
                    self.state = LicenseState::Licensed;
                    self.overlay_visible = false;
                    self.message = None;
                    commands.push(LicenseCommand::HideOverlay);
                    commands.push(LicenseCommand::Authorize);
                } else {
                    self.state = LicenseState::Unlicensed;
                    let message = err_msg
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| MSG_VERIFY_REJECTED.to_string());
                    self.set_message(message, &mut commands);
                }
            }

            LicenseEvent::VerifyFailed { error } => {
                if self.state == LicenseState::PendingValidation {
                    log::error!("License verification failed: {}", error);
                    self.state = LicenseState::Unlicensed;
                    self.set_message(MSG_VERIFY_FAILED.to_string(), &mut commands);
                }
            }

            LicenseEvent::Remove => {
                commands.push(LicenseCommand::RemoveLicense);
            }

            LicenseEvent::Removed => {
                log::info!("License removed");
            }

            LicenseEvent::RemoveFailed { error } => {
                log::error!("Failed to remove license: {}", error);
            }
        }

        commands
    }

    fn resolve(&mut self, identity: AppIdentity, commands: &mut Vec<LicenseCommand>) {
        commands.push(LicenseCommand::BindAppId {
            app_id: identity.app_id.clone(),
        });
        commands.push(LicenseCommand::MountOverlay {
            layout: self.layout,
        });
        commands.push(LicenseCommand::BuildQr);
        commands.push(LicenseCommand::CheckStatus);
        self.identity = Some(identity);
    }

    fn submit(&mut self, code: &str, commands: &mut Vec<LicenseCommand>) {
        match LicenseCode::parse(code) {
            Ok(code) => {
                self.state = LicenseState::PendingValidation;
                commands.push(LicenseCommand::VerifyCode {
                    code: code.into_inner(),
                });
            }
            Err(e) => {
                log::debug!("Rejected license code input: {}", e);
                self.set_message(e.to_string(), commands);
            }
        }
    }

    fn show(&mut self, commands: &mut Vec<LicenseCommand>) {
        self.overlay_visible = true;
        commands.push(LicenseCommand::ShowOverlay);
    }

    fn set_message(&mut self, message: String, commands: &mut Vec<LicenseCommand>) {
        self.message = Some(message.clone());
        commands.push(LicenseCommand::ShowMessage { message });
    }
}
