use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};

use crate::{
    debugger::{Position, RunState},
    ErrorInfo,
};

/// Lifecycle notifications published by sessions, runs and agents.
#[derive(Debug, Clone, PartialEq, Serialize, strum::Display)]
pub enum Event {
    SessionCreated {
        token: String,
        user_id: String,
    },
    SessionEvicted {
        token: String,
    },
    RunStarted {
        exec_id: String,
        session: Option<String>,
    },
    RunPaused {
        exec_id: String,
        position: Position,
    },
    RunResumed {
        exec_id: String,
    },
    RunStopped {
        exec_id: String,
        state: RunState,
    },
    AgentCreated {
        agent: String,
    },
    AgentStopped {
        agent: String,
    },
    PlanStarted {
        agent: String,
        plan: String,
    },
    PlanFinished {
        agent: String,
        plan: String,
    },
    PlanDropped {
        agent: String,
        plan: String,
        step: usize,
    },
    PlanFailed {
        agent: String,
        plan: String,
    },
}

/// Failure reported next to the regular event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub source: String,
    pub error: ErrorInfo,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("failed to send event: {message}")]
    SendFailed { message: String },
    #[error("receiver lagged, {count} events skipped")]
    Lagged { count: u64 },
    #[error("failed to receive event: {message}")]
    ReceiveFailed { message: String },
}

pub type EventResult<T> = Result<T, EventError>;

pub struct EventBus {
    event_sender: broadcast::Sender<Event>,
    error_sender: broadcast::Sender<ErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity);
        let (error_sender, _) = broadcast::channel(capacity);
        Self {
            event_sender,
            error_sender,
        }
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    /// Fails only when nobody is subscribed.
    pub async fn publish(&self, event: Event) -> EventResult<()> {
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub async fn publish_error(&self, error: ErrorEvent) -> EventResult<()> {
        self.error_sender
            .send(error)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Events as a stream. Gaps from lagging are skipped.
    pub fn stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_sender.subscribe()).filter_map(|received| match received {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(count)) => {
                tracing::debug!(count, "event stream lagged");
                None
            }
        })
    }

    /// Publishes and drops the "no subscriber" failure.
    pub async fn notify(&self, event: Event) {
        if let Err(e) = self.publish(event).await {
            tracing::trace!("event not delivered: {}", e);
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. On lag the receiver resubscribes (skipping
    /// the backlog) and reports how many events were lost.
    pub async fn recv(&mut self) -> EventResult<Event> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

pub struct ErrorReceiver {
    receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{debugger::StopReason, ChariotError};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_basic_publish_subscribe() {
        let bus = EventBus::new(16);
        let (mut event_rx, _) = bus.subscribe();

        bus.publish(Event::AgentCreated {
            agent: "helloAgent".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            event_rx.recv().await.unwrap(),
            Event::AgentCreated {
                agent: "helloAgent".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let (mut rx1, _) = bus.subscribe();
        let (mut rx2, _) = bus.subscribe();

        let event = Event::RunStopped {
            exec_id: "e1".to_string(),
            state: RunState::Stopped(StopReason::Completed),
        };
        bus.publish(event.clone()).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_error_channel() {
        let bus = EventBus::new(16);
        let (_, mut error_rx) = bus.subscribe();

        let error = ErrorEvent {
            source: "helloAgent.greet".to_string(),
            error: ErrorInfo::from(&ChariotError::invalid_argument("boom")),
        };
        bus.publish_error(error.clone()).await.unwrap();

        assert_eq!(error_rx.recv().await.unwrap(), error);
    }

    #[tokio::test]
    async fn test_lagged_receiver_recovers() {
        let bus = EventBus::new(2);
        let (mut rx, _) = bus.subscribe();
        for i in 0..5 {
            bus.publish(Event::RunResumed {
                exec_id: i.to_string(),
            })
            .await
            .unwrap();
        }
        assert!(matches!(rx.recv().await, Err(EventError::Lagged { .. })));

        bus.publish(Event::RunResumed {
            exec_id: "fresh".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::RunResumed {
                exec_id: "fresh".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_stream_yields_published_events() {
        let bus = EventBus::new(8);
        let mut stream = Box::pin(bus.stream());
        bus.publish(Event::AgentStopped {
            agent: "aAgent".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            stream.next().await,
            Some(Event::AgentStopped {
                agent: "aAgent".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus
            .publish(Event::SessionEvicted {
                token: "t".to_string()
            })
            .await
            .is_err());
        // notify swallows the same failure
        bus.notify(Event::SessionEvicted {
            token: "t".to_string(),
        })
        .await;
    }
}
