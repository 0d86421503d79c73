//! Application context - bridges the GTK-free state machine with the UI and
//! the device API.
//!
//! All state lives on the UI thread. Network calls run on the tokio runtime
//! and report back through [`AppMessage`]s, which the UI loop feeds into
//! [`AppContext::handle_message`].

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::future;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::api::http::{CopyKind, EventTopic, Storage};
use crate::api::{ApiClient, DeviceApi, EventSubscription};
use crate::config::Config;
use crate::events::{self, DeviceEvent, EventRecord, Reaction};
use crate::license::{self, Authorization, LicenseQr};
use crate::print::{self, PrintSettings};
use crate::state::{LicenseCommand, LicenseEvent, LicenseStateMachine, OverlayLayout};

/// What the UI must be able to show
pub trait View {
    /// Insert the license overlay. Called at most once.
    fn mount_license_overlay(&self, layout: OverlayLayout);
    fn set_license_overlay_visible(&self, visible: bool);
    fn set_license_message(&self, message: &str);
    fn set_license_qr(&self, qr: &LicenseQr);
    /// Status line of the main screen
    fn set_status(&self, message: &str);
    fn set_print_enabled(&self, enabled: bool);
    fn set_usb_present(&self, _present: bool) {}
}

/// Messages sent from async tasks to the UI loop
#[derive(Debug, Clone)]
pub enum AppMessage {
    /// Process a license event through the state machine
    License(LicenseEvent),
    /// The license QR code is ready to display
    QrReady(LicenseQr),
    /// An event receiver reacted to a device event
    Device(Reaction),
    /// Current USB state reported by the device
    UsbStatus(bool),
    /// Show a status line message
    Status(String),
    PrintEnabled(bool),
}

/// Sender that can dispatch messages to the UI loop from any thread
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<AppMessage>,
}

impl MessageSender {
    pub fn send(&self, msg: AppMessage) {
        let _ = self.tx.send(msg);
    }
}

/// Application context - holds state and provides methods to interact with it
pub struct AppContext<A: DeviceApi = ApiClient> {
    pub config: Arc<Config>,
    /// The GTK-free license state machine
    pub state_machine: RefCell<LicenseStateMachine>,
    /// Device and backend API
    pub api: A,
    /// Settled when the license first becomes valid
    pub authorization: Arc<Authorization>,
    /// Tokio runtime for async operations
    pub runtime: Handle,
    /// Sender for dispatching messages to the UI loop
    pub message_tx: MessageSender,
    usb_present: Cell<bool>,
    print_enabled: Cell<bool>,
}

impl<A: DeviceApi> AppContext<A> {
    pub fn new(
        config: Arc<Config>,
        api: A,
        runtime: Handle,
    ) -> (Rc<Self>, mpsc::UnboundedReceiver<AppMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let message_tx = MessageSender { tx };

        let authorization = Arc::new(Authorization::new());
        let unlock = message_tx.clone();
        authorization.on_authorized(move || unlock.send(AppMessage::PrintEnabled(true)));

        let ctx = Rc::new(Self {
            state_machine: RefCell::new(LicenseStateMachine::new(config.execution_context)),
            config,
            api,
            authorization,
            runtime,
            message_tx,
            usb_present: Cell::new(false),
            print_enabled: Cell::new(false),
        });

        (ctx, rx)
    }

    pub fn usb_present(&self) -> bool {
        self.usb_present.get()
    }

    pub fn print_enabled(&self) -> bool {
        self.print_enabled.get()
    }

    /// Send a license event to the state machine (from any thread)
    pub fn send_event(&self, event: LicenseEvent) {
        self.message_tx.send(AppMessage::License(event));
    }

    /// Start the license gate. The returned future resolves `true` once the
    /// license is valid.
    pub fn initialize_license(
        &self,
        app_id: Option<String>,
    ) -> impl Future<Output = bool> + Send + 'static {
        self.send_event(LicenseEvent::Initialize { app_id });
        self.authorization.wait()
    }

    /// Register a callback to run once the license is valid
    pub fn on_authorized<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.authorization.on_authorized(callback);
    }

    pub fn submit_code(&self, code: &str) {
        self.send_event(LicenseEvent::SubmitCode {
            code: code.to_string(),
        });
    }

    /// Handle app messages - main entry point for state updates
    pub fn handle_message(self: &Rc<Self>, msg: AppMessage, view: &dyn View) {
        match msg {
            AppMessage::License(event) => {
                self.process_event(event, view);
            }
            AppMessage::QrReady(qr) => view.set_license_qr(&qr),
            AppMessage::Device(reaction) => self.apply_reaction(reaction, view),
            AppMessage::UsbStatus(present) => self.set_usb_present(present, view),
            AppMessage::Status(message) => view.set_status(&message),
            AppMessage::PrintEnabled(enabled) => self.set_print_enabled(enabled, view),
        }
    }

    /// Process an event and execute resulting commands
    pub fn process_event(self: &Rc<Self>, event: LicenseEvent, view: &dyn View) -> Vec<LicenseCommand> {
        let commands = self.state_machine.borrow_mut().process(event);

        for cmd in &commands {
            self.execute_command(cmd.clone(), view);
        }

        commands
    }

    /// Execute a command from the state machine
    fn execute_command(self: &Rc<Self>, cmd: LicenseCommand, view: &dyn View) {
        match cmd {
            LicenseCommand::ResolveIdentity => {
                self.spawn_request(|api| async move {
                    match api.app_context().await {
                        Ok(info) => LicenseEvent::IdentityResolved {
                            identity: info.into(),
                        },
                        Err(e) => LicenseEvent::IdentityFailed {
                            error: e.to_string(),
                        },
                    }
                });
            }

            LicenseCommand::BindAppId { app_id } => {
                self.api.bind_app_id(&app_id);
            }

            LicenseCommand::MountOverlay { layout } => {
                view.mount_license_overlay(layout);
            }

            LicenseCommand::BuildQr => {
                let tx = self.message_tx.clone();
                let api = self.api.clone();
                let portal = self.config.license_portal_url.clone();

                self.runtime.spawn(async move {
                    let (capability, context) =
                        match future::try_join(api.capability(), api.app_context()).await {
                            Ok(pair) => pair,
                            Err(e) => {
                                log::error!("Failed to fetch QR code details: {}", e);
                                return;
                            }
                        };

                    let qr = license::qr_payload(&portal, &capability, &context)
                        .map_err(|e| e.to_string())
                        .and_then(|payload| LicenseQr::encode(&payload).map_err(|e| e.to_string()));
                    match qr {
                        Ok(qr) => {
                            log::info!("License QR payload: {}", qr.payload);
                            tx.send(AppMessage::QrReady(qr));
                        }
                        Err(e) => log::error!("Failed to build license QR code: {}", e),
                    }
                });
            }

            LicenseCommand::CheckStatus => {
                self.spawn_request(|api| async move {
                    match api.license_status().await {
                        Ok(status) => LicenseEvent::StatusChecked {
                            is_valid: status.is_valid,
                        },
                        Err(e) => LicenseEvent::StatusCheckFailed {
                            error: e.to_string(),
                        },
                    }
                });
            }

            LicenseCommand::VerifyCode { code } => {
                self.spawn_request(move |api| async move {
                    match api.verify_license(&code).await {
                        Ok(resp) => LicenseEvent::CodeVerified {
                            is_valid: resp.is_valid,
                            err_msg: resp.err_msg,
                        },
                        Err(e) => LicenseEvent::VerifyFailed {
                            error: e.to_string(),
                        },
                    }
                });
            }

            LicenseCommand::RemoveLicense => {
                self.spawn_request(|api| async move {
                    match api.remove_license().await {
                        Ok(()) => LicenseEvent::Removed,
                        Err(e) => LicenseEvent::RemoveFailed {
                            error: e.to_string(),
                        },
                    }
                });
            }

            LicenseCommand::ShowOverlay => view.set_license_overlay_visible(true),
            LicenseCommand::HideOverlay => view.set_license_overlay_visible(false),
            LicenseCommand::ShowMessage { message } => view.set_license_message(&message),

            LicenseCommand::Authorize => {
                self.authorization.settle();
            }
        }
    }

    /// Run an API call on the runtime and feed its outcome back as a license event
    fn spawn_request<F, Fut>(&self, call: F)
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = LicenseEvent> + Send + 'static,
    {
        let tx = self.message_tx.clone();
        let request = call(self.api.clone());
        self.runtime.spawn(async move {
            tx.send(AppMessage::License(request.await));
        });
    }

    /// Subscribe to device notifications and read the current USB state.
    pub fn subscribe_device_events(&self) {
        let subscriptions = [
            (EventTopic::Usb, Vec::new()),
            (
                EventTopic::DeviceStatus,
                vec!["device_adf_paper_changed".to_string()],
            ),
            (EventTopic::Jobs, Vec::new()),
        ];

        for (topic, names) in subscriptions {
            let api = self.api.clone();
            self.runtime.spawn(async move {
                match api.subscribe_events(topic, names).await {
                    Ok(()) => log::info!("Subscription for {:?} events: success", topic),
                    Err(e) => log::error!("Subscription for {:?} events: fail ({})", topic, e),
                }
            });
        }

        let api = self.api.clone();
        let tx = self.message_tx.clone();
        self.runtime.spawn(async move {
            match api.usb_status().await {
                Ok(status) => tx.send(AppMessage::UsbStatus(status.is_inserted)),
                Err(e) => log::error!("Getting the USB status failed: {}", e),
            }
        });
    }

    /// Register the job and USB receivers as event stream listeners
    pub fn register_receivers(&self, subscription: &mut EventSubscription) {
        let tx = self.message_tx.clone();
        subscription.add_listener(move |record: &EventRecord| {
            log::debug!("Printer status event: {:?}", record);
            if let Some(reaction) = events::job_receiver(&DeviceEvent::classify(record)) {
                tx.send(AppMessage::Device(reaction));
            }
        });

        let tx = self.message_tx.clone();
        subscription.add_listener(move |record: &EventRecord| {
            if let Some(reaction) = events::usb_receiver(&DeviceEvent::classify(record)) {
                tx.send(AppMessage::Device(reaction));
            }
        });
    }

    /// Open the device event stream with the receivers attached
    pub fn start_event_stream(&self) {
        let mut subscription = EventSubscription::new(&self.config);
        self.register_receivers(&mut subscription);
        subscription.start(&self.runtime);
    }

    fn apply_reaction(&self, reaction: Reaction, view: &dyn View) {
        match reaction {
            Reaction::Logged => {}
            Reaction::Notify(message) => view.set_status(&message),
            Reaction::PrintJobFinished => {
                view.set_status(events::MSG_JOB_COMPLETED);
                self.set_print_enabled(true, view);
            }
            Reaction::UsbPresent(present) => self.set_usb_present(present, view),
        }
    }

    fn set_usb_present(&self, present: bool, view: &dyn View) {
        self.usb_present.set(present);
        view.set_usb_present(present);
    }

    fn set_print_enabled(&self, enabled: bool, view: &dyn View) {
        self.print_enabled.set(enabled);
        view.set_print_enabled(enabled);
    }

    /// Print trigger: copy the CSV from USB, then start the print job.
    pub fn request_print(&self, settings: PrintSettings, view: &dyn View) {
        if !self.usb_present() {
            view.set_status(print::MSG_INSERT_USB);
            return;
        }
        if !self.print_enabled() {
            log::debug!("Print trigger is disabled");
            return;
        }
        self.set_print_enabled(false, view);

        let api = self.api.clone();
        let tx = self.message_tx.clone();
        self.runtime.spawn(async move {
            if let Err(e) = api.copy_usb(CopyKind::Files, print::print_source_copy()).await {
                log::error!("Failed to copy print source: {}", e);
                tx.send(AppMessage::Status(print::MSG_CSV_MISSING.to_string()));
                tx.send(AppMessage::PrintEnabled(true));
                return;
            }
            tx.send(AppMessage::Status(print::MSG_CSV_READ.to_string()));

            match api.start_print_job(settings).await {
                Ok(()) => {
                    log::info!("Print job dispatched to background");
                    tx.send(AppMessage::Status(print::MSG_JOB_DISPATCHED.to_string()));
                }
                Err(e) => {
                    log::error!("Failed to start print job: {}", e);
                    tx.send(AppMessage::Status(print::print_failure_message(&e)));
                    tx.send(AppMessage::PrintEnabled(true));
                }
            }
        });
    }

    /// Copy the reference documents onto the USB drive.
    pub fn request_download(&self, view: &dyn View) {
        view.set_status(print::MSG_DOWNLOADING);
        if !self.usb_present() {
            view.set_status(print::MSG_INSERT_USB);
            return;
        }

        let api = self.api.clone();
        let tx = self.message_tx.clone();
        self.runtime.spawn(async move {
            let message = match api.copy_usb(CopyKind::Directories, print::reference_copy()).await {
                Ok(()) => print::MSG_DOWNLOAD_OK,
                Err(e) => {
                    log::error!("Failed to copy reference documents: {}", e);
                    print::MSG_DOWNLOAD_FAILED
                }
            };
            tx.send(AppMessage::Status(message.to_string()));
        });
    }

    /// Report the files present in app storage and on the USB drive.
    pub fn check_storage(&self) {
        let api = self.api.clone();
        let tx = self.message_tx.clone();
        self.runtime.spawn(async move {
            let (app_files, usb_files) =
                future::join(api.list_files(Storage::App), api.list_files(Storage::Usb)).await;
            let app_files = app_files
                .map_err(|e| log::error!("Failed to list app files: {}", e))
                .ok();
            let usb_files = usb_files
                .map_err(|e| log::error!("Failed to list USB files: {}", e))
                .ok();
            tx.send(AppMessage::Status(print::storage_summary(
                app_files.as_deref(),
                usb_files.as_deref(),
            )));
        });
    }
}
