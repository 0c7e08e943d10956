//! Event system for ledger operations
//!
//! Provides an event bus for notifying listeners about balance changes.
//! Useful for:
//! - Audit logging
//! - Security alerting on denied privileged calls
//! - Cache invalidation of displayed balances

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::auth::Role;

/// Ledger events emitted by the credit service
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    ProfileCreated {
        user_id: String,
        role: Role,
        balance: i64,
    },
    TransactionRecorded {
        user_id: String,
        transaction_id: String,
        tx_type: String,
        amount: i64,
        balance_after: i64,
    },
    AdminAdjusted {
        caller_id: String,
        target_id: String,
        amount: i64,
        balance_after: i64,
    },
    DailyBonusGranted {
        user_id: String,
        amount: i64,
    },
    HoldPlaced {
        hold_id: String,
        user_id: String,
        amount: i64,
    },
    HoldCommitted {
        hold_id: String,
        user_id: String,
    },
    HoldReleased {
        hold_id: String,
        user_id: String,
    },
    RoleChanged {
        caller_id: String,
        target_id: String,
        role: Role,
    },
    AccessDenied {
        caller_id: String,
        operation: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::TransactionRecorded {
                user_id,
                tx_type,
                amount,
                balance_after,
                ..
            } => {
                debug!(user_id = %user_id, tx_type = %tx_type, amount, balance_after, "Transaction recorded");
            }
            LedgerEvent::AdminAdjusted {
                caller_id,
                target_id,
                amount,
                balance_after,
            } => {
                info!(
                    caller = %caller_id,
                    target = %target_id,
                    amount,
                    balance_after,
                    "Admin adjustment"
                );
            }
            LedgerEvent::AccessDenied { caller_id, operation } => {
                warn!(target: "security", caller = %caller_id, operation = %operation, "Access denied");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::DailyBonusGranted {
            user_id: "alice".into(),
            amount: 5,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(
            event,
            LedgerEvent::DailyBonusGranted {
                user_id: "alice".into(),
                amount: 5,
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::with_capacity(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(LedgerEvent::HoldReleased {
            hold_id: "h".into(),
            user_id: "alice".into(),
        });
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(bus.clone());
        bus.emit(LedgerEvent::AccessDenied {
            caller_id: "mallory".into(),
            operation: "admin_adjust".into(),
        });
        drop(bus);
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .expect("listener panicked");
    }

    #[test]
    fn test_listener_drains_buffered_events_on_current_thread_runtime() {
        let services = crate::services::Services::in_memory().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let handle = {
            let _guard = runtime.enter();
            spawn_logging_listener(services.events.clone())
        };

        // writes happen outside the runtime, as in the binary
        services.credit.create_profile("alice", crate::Role::User).unwrap();
        services
            .credit
            .deduct_for_operation("alice", crate::OperationKind::Sem, None)
            .unwrap();
        assert_eq!(services.events.subscriber_count(), 1);

        drop(services);
        runtime.block_on(handle).expect("listener panicked");
    }
}
