//! Scheduling message delivery.
//!
//! Fans a batch of scheduling messages out to their recipients, one send
//! per recipient, all independent: a failed recipient never blocks the
//! rest, and the caller gets a count summary instead of a fast-fail. The
//! state mutation that produced the messages is never rolled back on
//! delivery failure.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::SchedResult;
use crate::event::Attendee;
use crate::itip::SchedulingMessage;

/// Transport for scheduling messages (mail, in practice).
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &SchedulingMessage, recipient: &Attendee) -> SchedResult<()>;
}

/// Outcome summary of a delivery fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// Deliver every message to every recipient concurrently.
pub async fn deliver_all(
    sender: &dyn MessageSender,
    messages: &[SchedulingMessage],
) -> DeliveryReport {
    let sends = messages.iter().flat_map(|message| {
        message.recipients.iter().map(move |recipient| async move {
            let result = sender.send(message, recipient).await;
            if let Err(e) = &result {
                warn!(recipient = %recipient.email, error = %e, "scheduling message delivery failed");
            }
            result.is_ok()
        })
    });

    let results = join_all(sends).await;
    let attempted = results.len();
    let succeeded = results.iter().filter(|ok| **ok).count();
    let report = DeliveryReport {
        attempted,
        succeeded,
        failed: attempted - succeeded,
    };
    debug!(?report, "delivery fan-out finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::{TimeZone, Utc};
    use crate::error::SchedError;
    use crate::event::{Event, EventTime};
    use crate::itip::Method;

    /// Fails every send to an address containing "bad".
    struct FlakySender {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send(
            &self,
            _message: &SchedulingMessage,
            recipient: &Attendee,
        ) -> SchedResult<()> {
            if recipient.email.contains("bad") {
                return Err(SchedError::Delivery {
                    recipient: recipient.email.clone(),
                    reason: "mailbox unavailable".into(),
                });
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message(recipients: &[&str]) -> SchedulingMessage {
        let start = EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap());
        let end = EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap());
        SchedulingMessage {
            method: Method::Request,
            event: Event::new("sync", start, end),
            comment: None,
            recipients: recipients.iter().map(|e| Attendee::new(*e)).collect(),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let sender = FlakySender { sent: AtomicUsize::new(0) };
        let messages = vec![message(&["a@example.com", "bad@example.com", "b@example.com"])];

        let report = deliver_all(&sender, &messages).await;
        assert_eq!(report, DeliveryReport { attempted: 3, succeeded: 2, failed: 1 });
        assert!(!report.all_delivered());
        assert_eq!(sender.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_reports_nothing_attempted() {
        let sender = FlakySender { sent: AtomicUsize::new(0) };
        let report = deliver_all(&sender, &[]).await;
        assert_eq!(report.attempted, 0);
        assert!(report.all_delivered());
    }
}
