use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::drum::DrumStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event after its unit of work has committed.
    ///
    /// The state change is already durable at this point, so a closed
    /// channel is logged rather than reported as a failure.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping drum ledger event");
        }
    }
}

/// Domain events emitted by the drum ledger once a change is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    DrumCreated {
        drum_id: Uuid,
        drum_number: String,
        initial_quantity: Decimal,
    },
    UsageApplied {
        drum_id: Uuid,
        drum_number: String,
        line_details_id: String,
        quantity_used: Decimal,
        wastage: Decimal,
        new_quantity: Decimal,
    },
    UsageCleared {
        drum_id: Uuid,
        line_details_id: String,
        restored: Decimal,
    },
    DrumRecalculated {
        drum_id: Uuid,
        previous_quantity: Decimal,
        new_quantity: Decimal,
    },
    DrumQuantityAdjusted {
        drum_id: Uuid,
        previous_quantity: Decimal,
        new_quantity: Decimal,
    },
    DrumStatusChanged {
        drum_id: Uuid,
        old_status: DrumStatus,
        new_status: DrumStatus,
    },
    MonthReset {
        month: u32,
        year: i32,
        total_restored: Decimal,
        timestamp: DateTime<Utc>,
    },
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut event_receiver: mpsc::Receiver<Event>) {
    while let Some(event) = event_receiver.recv().await {
        match &event {
            Event::DrumCreated { drum_number, .. } => {
                info!(drum_number = %drum_number, "Event: drum created")
            }
            Event::UsageApplied {
                drum_number,
                line_details_id,
                ..
            } => info!(
                drum_number = %drum_number,
                line_details_id = %line_details_id,
                "Event: usage applied"
            ),
            Event::UsageCleared {
                line_details_id, ..
            } => info!(line_details_id = %line_details_id, "Event: usage cleared"),
            Event::DrumRecalculated { drum_id, .. } => {
                info!(drum_id = %drum_id, "Event: drum recalculated")
            }
            Event::DrumQuantityAdjusted { drum_id, .. } => {
                info!(drum_id = %drum_id, "Event: drum quantity adjusted")
            }
            Event::DrumStatusChanged {
                drum_id,
                new_status,
                ..
            } => info!(drum_id = %drum_id, status = new_status.as_str(), "Event: drum status changed"),
            Event::MonthReset { month, year, .. } => {
                info!(month, year, "Event: monthly usage reset")
            }
        }
    }
}
