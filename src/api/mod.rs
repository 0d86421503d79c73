//! Clients for the device WebAPI, the app backend and the device event stream.

pub mod http;
pub mod sse;

pub use http::{ApiClient, DeviceApi};
pub use sse::EventSubscription;
