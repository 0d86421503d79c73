//! Device event records and the receivers that react to them.

use serde::Deserialize;

pub const MSG_JOB_SUSPENDED: &str = "打印作业暂停！请查看是否缺纸";
pub const MSG_JOB_COMPLETED: &str = "打印作业完成！";

/// Raw event payload delivered by the device event stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub job_status: Option<JobStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
}

impl JobStatus {
    fn is_successful_print(&self) -> bool {
        self.job_type.as_deref() == Some("print_job")
            && self.status.as_deref() == Some("completed")
            && self.status_reason.as_deref() == Some("success")
    }
}

/// The event shapes this app reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    InputProcessingCompleted,
    JobSuspended,
    PrintJobCompleted,
    UsbInserted,
    UsbRemoved,
    /// Anything else, with its event name if it had one
    Unhandled(Option<String>),
}

impl DeviceEvent {
    /// Classify a record. Event names take precedence over job status.
    pub fn classify(record: &EventRecord) -> Self {
        match record.event_name.as_deref() {
            Some("jobs_input_processing_completed") => DeviceEvent::InputProcessingCompleted,
            Some("jobs_suspended") => DeviceEvent::JobSuspended,
            Some("usb_inserted") => DeviceEvent::UsbInserted,
            Some("usb_removed") => DeviceEvent::UsbRemoved,
            _ if record
                .job_status
                .as_ref()
                .is_some_and(JobStatus::is_successful_print) =>
            {
                DeviceEvent::PrintJobCompleted
            }
            name => DeviceEvent::Unhandled(name.map(String::from)),
        }
    }
}

/// What the application should do in response to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing beyond the log line
    Logged,
    /// Show a status message
    Notify(String),
    /// Show completion and re-enable the print trigger
    PrintJobFinished,
    /// Update the shared USB-present flag
    UsbPresent(bool),
}

/// Receiver for print job events
pub fn job_receiver(event: &DeviceEvent) -> Option<Reaction> {
    match event {
        DeviceEvent::InputProcessingCompleted => {
            log::info!("Print input processing completed");
            Some(Reaction::Logged)
        }
        DeviceEvent::JobSuspended => {
            log::info!("Print job suspended");
            Some(Reaction::Notify(MSG_JOB_SUSPENDED.to_string()))
        }
        DeviceEvent::PrintJobCompleted => {
            log::info!("Print job completed");
            Some(Reaction::PrintJobFinished)
        }
        DeviceEvent::UsbInserted | DeviceEvent::UsbRemoved | DeviceEvent::Unhandled(_) => None,
    }
}

/// Receiver for USB insertion events
pub fn usb_receiver(event: &DeviceEvent) -> Option<Reaction> {
    match event {
        DeviceEvent::UsbInserted => {
            log::info!("USB drive inserted");
            Some(Reaction::UsbPresent(true))
        }
        DeviceEvent::UsbRemoved => {
            log::info!("USB drive removed");
            Some(Reaction::UsbPresent(false))
        }
        DeviceEvent::Unhandled(name) => {
            log::debug!("Ignoring device event {:?}", name);
            None
        }
        _ => None,
    }
}
