use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::TaskStatus;

/// Event the background cycle pushes to the interface layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProactiveEvent {
    /// Once per day inside the briefing window.
    Briefing { content: String },
    /// A due task that needs the user's go-ahead.
    Suggestion { task_id: Uuid, description: String },
    /// Routine-based guess of what the user wants next.
    Prediction { category: String, confidence: f64 },
    TaskFinished { task_id: Uuid, description: String, status: TaskStatus },
}

impl ProactiveEvent {
    /// Plain text for interfaces that only print.
    pub fn render(&self) -> String {
        match self {
            Self::Briefing { content } => content.clone(),
            Self::Suggestion { description, .. } => {
                format!("It's time to {description}. Should I go ahead? (/accept or /override)")
            }
            Self::Prediction { category, confidence } => {
                format!("You usually ask about {category} around now ({:.0}% of the time).", confidence * 100.0)
            }
            Self::TaskFinished { description, status, .. } => {
                format!("Task {}: {description}", status.as_str())
            }
        }
    }
}

/// Event channel sender. The scheduler pushes here.
pub type EventSender = mpsc::Sender<ProactiveEvent>;
/// Event channel receiver. The interface layer consumes from here.
pub type EventReceiver = mpsc::Receiver<ProactiveEvent>;

pub fn channel(buffer: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer)
}

/// Send with a bounded wait. A full or closed channel drops the event.
pub async fn emit(tx: &EventSender, event: ProactiveEvent, timeout: Duration) -> bool {
    match tx.send_timeout(event, timeout).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "proactive event dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_delivers() {
        let (tx, mut rx) = channel(4);
        let sent = emit(&tx, ProactiveEvent::Briefing { content: "Good morning.".into() }, Duration::from_millis(50)).await;
        assert!(sent);
        assert_eq!(rx.recv().await.unwrap().render(), "Good morning.");
    }

    #[tokio::test]
    async fn full_channel_drops_event() {
        let (tx, _rx) = channel(1);
        let event = ProactiveEvent::Prediction {
            category: "weather".into(),
            confidence: 0.9,
        };
        assert!(emit(&tx, event.clone(), Duration::from_millis(20)).await);
        assert!(!emit(&tx, event, Duration::from_millis(20)).await);
    }

    #[test]
    fn prediction_text() {
        let event = ProactiveEvent::Prediction {
            category: "news".into(),
            confidence: 0.75,
        };
        assert!(event.render().contains("news"));
        assert!(event.render().contains("75%"));
    }
}
