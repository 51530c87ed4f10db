//! Control-plane half of the WAF (§4.10, §4.11): HMAC signing, the in-memory
//! license/command/nonce store, outbound event push, the inbound command
//! poller, and the ingest HTTP surface.

pub mod event_sender;
pub mod hmac;
pub mod ingest;
pub mod poller;
pub mod store;

pub use event_sender::{send_event, Event};
pub use ingest::{App as IngestApp, ControlPlaneState};
pub use poller::CommandPoller;
pub use store::Store;
