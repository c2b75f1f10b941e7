//! In-process notification channel driven from SQL.
//!
//! # Responsibility
//! - Install a `notify(channel, payload)` SQL function on a connection.
//! - Fan every call out to the subscribers of a `NotificationHub`.
//!
//! # Invariants
//! - The SQL function returns NULL and never fails on dead subscribers;
//!   they are pruned on the next dispatch.

use log::debug;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

/// Channel every façade notification is published on.
pub const NOTIFY_CHANNEL: &str = "events";

/// Name of the SQL function installed by `register_notify_function`.
pub const NOTIFY_FUNCTION: &str = "notify";

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Cloneable set of notification subscribers.
#[derive(Debug, Clone, Default)]
pub struct NotificationHub {
    subscribers: Arc<Mutex<Vec<Sender<Notification>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (sender, receiver) = channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers `notification` to every live subscriber and returns how
    /// many received it.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(notification.clone()).is_ok());
        subscribers.len()
    }
}

/// Installs the `notify(channel, payload)` SQL function backed by `hub`.
pub fn register_notify_function(conn: &Connection, hub: NotificationHub) -> rusqlite::Result<()> {
    let hub = AssertUnwindSafe(hub);
    conn.create_scalar_function(
        NOTIFY_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8,
        move |ctx| {
            let hub = &hub;
            let notification = Notification {
                channel: ctx.get::<String>(0)?,
                payload: ctx.get::<String>(1)?,
            };
            let delivered = hub.dispatch(&notification);
            debug!(
                "event=notify_dispatch module=notify status=ok channel={} subscribers={}",
                notification.channel, delivered
            );
            Ok(rusqlite::types::Null)
        },
    )
}
