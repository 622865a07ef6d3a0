//! Notification delivery.
//!
//! - `gate`: injectable send-rate gates (in-process interval, Redis window, unthrottled)
//! - `sender`: provider adapters (Resend email API, log-only)
//! - `dispatcher`: concurrent batch delivery with backoff on provider backpressure

pub mod dispatcher;
pub mod gate;
pub mod sender;

pub use dispatcher::{DispatchError, DispatchReport, Dispatcher, JobOutcome, JobReport};
pub use gate::{IntervalGate, RateGate, RedisWindowGate, Unthrottled};
pub use sender::{LogSender, NotificationSender, ResendSender};
