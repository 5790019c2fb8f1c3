pub mod client_events;
pub mod models;
pub mod observer;
pub mod server_events;
pub mod telephony;

pub use client_events::ClientEvent;
pub use observer::{ObserverMessage, SessionSummary};
pub use server_events::ServerEvent;
pub use telephony::{MediaPayload, StreamStart, TelephonyCommand, TelephonyEvent};
