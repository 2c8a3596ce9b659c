//! Background email delivery.
//!
//! Handlers enqueue a [`Notification`] and return immediately. A single
//! tokio task owns the receiving end, renders each notification and hands
//! it to the [`Mailer`]. Failures are logged and never retried.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::EventDetails;
use crate::services::email::{Mailer, Notification};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Creates the queue without a worker. The caller decides what drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Starts the delivery task. It stops once every `Notifier` clone is dropped.
    pub fn spawn(mailer: Mailer, event: EventDetails, capacity: usize) -> (Self, JoinHandle<()>) {
        let (notifier, rx) = Self::channel(capacity);
        let handle = tokio::spawn(run_worker(rx, mailer, event));
        (notifier, handle)
    }

    /// Queues a notification without waiting. A full queue drops it.
    pub fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    kind = dropped.kind(),
                    to = %dropped.recipient(),
                    "Notification queue full, dropping email"
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::error!(
                    kind = dropped.kind(),
                    to = %dropped.recipient(),
                    "Notification worker is gone, dropping email"
                );
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Notification>,
    mailer: Mailer,
    event: EventDetails,
) {
    tracing::info!("Notification worker started");

    while let Some(notification) = rx.recv().await {
        deliver(&mailer, &event, &notification).await;
    }

    tracing::info!("Notification worker stopped");
}

async fn deliver(mailer: &Mailer, event: &EventDetails, notification: &Notification) {
    let email = match notification.render(mailer.brand(), event) {
        Ok(email) => email,
        Err(e) => {
            tracing::error!(kind = notification.kind(), error = %e, "Failed to render email");
            return;
        }
    };

    if let Err(e) = mailer.send(&email).await {
        tracing::error!(
            kind = notification.kind(),
            to = %email.to,
            error = %e,
            "Failed to send email"
        );
    }
}
