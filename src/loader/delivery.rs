//! Delivery of decoded images to their destinations.
//!
//! Workers and cache hits push completions onto a channel. A single consumer, the owner of
//! [`Deliveries`], applies them. A completion is applied only if the destination still
//! carries the identity tag captured when the load was requested; otherwise the slot has
//! been reassigned and the image is discarded.

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::decode::DecodedImage;

/// A display slot that can receive a decoded image.
pub trait Destination: Send + Sync {
    /// Identity of the resource this slot currently represents.
    fn identity_tag(&self) -> String;

    /// Desired size in pixels. Non-positive dimensions mean "unknown".
    fn target_size(&self) -> (i32, i32);

    /// Show the image. Only ever called from the delivery consumer.
    fn apply_decoded_image(&self, image: DecodedImage);
}

/// A finished load on its way to the consumer.
pub struct Completion {
    pub resource_id: String,
    /// Tag the destination carried when the load was requested.
    pub expected_tag: String,
    pub destination: Arc<dyn Destination>,
    pub image: DecodedImage,
}

/// What happened to a completion on the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Applied,
    Stale,
}

impl Completion {
    fn deliver(self) -> DeliveryOutcome {
        let current = self.destination.identity_tag();
        if current != self.expected_tag {
            debug!(
                resource_id = %self.resource_id,
                expected = %self.expected_tag,
                current = %current,
                "Discarding stale delivery"
            );
            return DeliveryOutcome::Stale;
        }
        trace!(resource_id = %self.resource_id, "Applying decoded image");
        self.destination.apply_decoded_image(self.image);
        DeliveryOutcome::Applied
    }
}

pub(crate) fn channel() -> (Sender<Completion>, Deliveries) {
    let (tx, rx) = flume::unbounded();
    (
        tx,
        Deliveries {
            rx,
            applied: 0,
            stale: 0,
        },
    )
}

/// The single consumer side of the delivery channel.
pub struct Deliveries {
    rx: Receiver<Completion>,
    applied: u64,
    stale: u64,
}

impl Deliveries {
    /// Apply every completion that is ready without waiting. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.rx.try_recv() {
            if self.handle(completion) == DeliveryOutcome::Applied {
                applied += 1;
            }
        }
        applied
    }

    /// Wait up to `timeout` for one completion and handle it.
    ///
    /// Returns `None` on timeout or once the loader has shut down.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<DeliveryOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => Some(self.handle(completion)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Handle completions until every sender is gone.
    pub fn run(&mut self) {
        while let Ok(completion) = self.rx.recv() {
            self.handle(completion);
        }
        debug!(applied = self.applied, stale = self.stale, "Delivery loop finished");
    }

    /// Number of completions waiting to be handled.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn stale_count(&self) -> u64 {
        self.stale
    }

    fn handle(&mut self, completion: Completion) -> DeliveryOutcome {
        let outcome = completion.deliver();
        match outcome {
            DeliveryOutcome::Applied => self.applied += 1,
            DeliveryOutcome::Stale => self.stale += 1,
        }
        outcome
    }
}
