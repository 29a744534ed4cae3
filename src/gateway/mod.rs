//! Reminder gateway, the delayed-delivery service that fires nudges back
//! at us after a delay.
//!
//! The engine never sleeps on its own timers. It hands each reminder to an
//! external scheduler and receives an opaque handle for later cancellation.
//! The scheduler calls the fire endpoint when the delay elapses.

pub mod http;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::nudge::model::ReminderPayload;

pub use http::HttpReminderGateway;

/// A scheduler that delivers a payload back to the engine after a delay.
#[async_trait]
pub trait ReminderGateway: Send + Sync {
    /// Register a delayed reminder. Returns the gateway's handle for the
    /// job, which must be stored before the reminder is considered placed.
    async fn schedule(
        &self,
        payload: &ReminderPayload,
        delay_minutes: u32,
    ) -> Result<String, GatewayError>;

    /// Cancel a previously scheduled reminder by its handle.
    async fn cancel(&self, handle: &str) -> Result<(), GatewayError>;
}
