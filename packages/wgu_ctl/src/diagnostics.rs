use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One line the helper wrote to stderr
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticLine {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Most recent helper output, oldest lines dropped first
#[derive(Debug)]
pub(crate) struct DiagnosticLog {
    lines: VecDeque<DiagnosticLine>,
    capacity: usize,
}

impl DiagnosticLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, line: DiagnosticLine) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn lines(&self) -> Vec<DiagnosticLine> {
        self.lines.iter().cloned().collect()
    }

    /// Newline-terminated concatenation of every retained line
    pub(crate) fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

/// Drain forwarded stderr into the log and fan it out to subscribers.
pub(crate) async fn collect(
    mut lines: mpsc::Receiver<String>,
    log: Arc<RwLock<DiagnosticLog>>,
    events: broadcast::Sender<DiagnosticLine>,
    cancel: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            text = lines.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let line = DiagnosticLine {
            text,
            received_at: Utc::now(),
        };
        log.write().push(line.clone());
        // No subscribers is fine
        let _ = events.send(line);
    }

    debug!("Diagnostic collector exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> DiagnosticLine {
        DiagnosticLine {
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut log = DiagnosticLog::new(2);
        log.push(line("a"));
        log.push(line("b"));
        log.push(line("c"));

        let texts: Vec<_> = log.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(log.text(), "b\nc\n");
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut log = DiagnosticLog::new(0);
        log.push(line("a"));
        assert!(log.lines().is_empty());
        assert_eq!(log.text(), "");
    }

    #[tokio::test]
    async fn collector_logs_and_broadcasts() {
        let (tx, rx) = mpsc::channel(4);
        let log = Arc::new(RwLock::new(DiagnosticLog::new(10)));
        let (events, mut events_rx) = broadcast::channel(4);

        let task = tokio::spawn(collect(rx, log.clone(), events, CancellationToken::new()));
        tx.send("handshake complete".to_string()).await.unwrap();
        tx.send("peer up".to_string()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(log.read().text(), "handshake complete\npeer up\n");
        assert_eq!(events_rx.recv().await.unwrap().text, "handshake complete");
        assert_eq!(events_rx.recv().await.unwrap().text, "peer up");
    }
}
