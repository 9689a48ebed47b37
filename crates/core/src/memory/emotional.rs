use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::error::{CoreError, DataIntegrityError};
use crate::types::{MemoryRecord, Mood};

const COMMAND_BUFFER: usize = 64;

/// Shared, immutable view of the log at one point in time.
pub type MemorySnapshot = Arc<Vec<MemoryRecord>>;

/// Append-only emotional memory, kept oldest first.
///
/// Writers go through `Arc::make_mut`, so a snapshot handed to a reader is
/// never modified; the writer copies instead. The first write while any
/// snapshot is alive costs one O(n) copy; later writes before the next
/// snapshot reuse it. The worker publishes once per burst of queued appends
/// to keep that copy per burst rather than per record.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: MemorySnapshot,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted records. Rejects out-of-order input.
    pub fn from_records(records: Vec<MemoryRecord>) -> Result<Self, DataIntegrityError> {
        if let Some(pair) = records.windows(2).find(|w| w[0].timestamp > w[1].timestamp) {
            return Err(DataIntegrityError::InvalidState(format!(
                "memory record {} is older than its predecessor {}",
                pair[1].id, pair[0].id
            )));
        }
        Ok(Self {
            records: Arc::new(records),
        })
    }

    /// Insert after every record with an equal or earlier timestamp.
    pub fn append(&mut self, record: MemoryRecord) -> Uuid {
        let id = record.id;
        let records = Arc::make_mut(&mut self.records);
        let at = records.partition_point(|r| r.timestamp <= record.timestamp);
        records.insert(at, record);
        id
    }

    /// Drop unpinned records older than `now - retention`. Returns the number removed.
    pub fn compact_at(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        if self.records.iter().all(|r| r.survives(cutoff)) {
            return 0;
        }
        let records = Arc::make_mut(&mut self.records);
        let before = records.len();
        records.retain(|r| r.survives(cutoff));
        before - records.len()
    }

    pub fn clear(&mut self) {
        self.records = Arc::new(Vec::new());
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        Arc::clone(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Records a compaction at `now` would keep.
pub fn window(records: &[MemoryRecord], retention: Duration, now: DateTime<Utc>) -> Vec<MemoryRecord> {
    let cutoff = now - retention;
    records.iter().filter(|r| r.survives(cutoff)).cloned().collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Query filter. All bounds are inclusive; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub mood: Option<Mood>,
    pub topic: Option<String>,
    pub order: Order,
}

impl MemoryFilter {
    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn mood(mut self, mood: Mood) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = Order::OldestFirst;
        self
    }

    fn keeps(&self, record: &MemoryRecord) -> bool {
        self.mood.is_none_or(|m| m == record.mood)
            && self.topic.as_deref().is_none_or(|t| t == record.topic)
    }
}

/// Result of a query: a snapshot plus a filter. Evaluated lazily; every call
/// to `iter` starts over from the same snapshot.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    records: MemorySnapshot,
    filter: MemoryFilter,
}

impl MemoryQuery {
    pub fn new(records: MemorySnapshot, filter: MemoryFilter) -> Self {
        Self { records, filter }
    }

    pub fn iter(&self) -> QueryIter<'_> {
        // records are sorted, so the time range is a contiguous slice
        let lo = match self.filter.since {
            Some(since) => self.records.partition_point(|r| r.timestamp < since),
            None => 0,
        };
        let hi = match self.filter.until {
            Some(until) => self.records.partition_point(|r| r.timestamp <= until),
            None => self.records.len(),
        };
        QueryIter {
            slice: self.records.get(lo..hi).unwrap_or(&[]),
            filter: &self.filter,
            newest_first: self.filter.order == Order::NewestFirst,
        }
    }
}

impl<'a> IntoIterator for &'a MemoryQuery {
    type Item = &'a MemoryRecord;
    type IntoIter = QueryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct QueryIter<'a> {
    slice: &'a [MemoryRecord],
    filter: &'a MemoryFilter,
    newest_first: bool,
}

impl<'a> Iterator for QueryIter<'a> {
    type Item = &'a MemoryRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let slice = self.slice;
            let (record, rest) = if self.newest_first {
                slice.split_last()?
            } else {
                slice.split_first()?
            };
            self.slice = rest;
            if self.filter.keeps(record) {
                return Some(record);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slice.len()))
    }
}

// ── Worker ─────────────────────────────────────────────────────

enum Command {
    Append(MemoryRecord, oneshot::Sender<Uuid>),
    Compact {
        retention: Duration,
        now: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    Clear(oneshot::Sender<()>),
    Replace(Vec<MemoryRecord>, oneshot::Sender<Result<(), DataIntegrityError>>),
}

/// Handle to the memory worker. Writes are serialized through one task;
/// reads go straight to the last published snapshot and never wait.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<MemorySnapshot>,
}

impl MemoryStore {
    pub fn spawn() -> Self {
        let log = MemoryLog::new();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (publish, state) = watch::channel(log.snapshot());
        tokio::spawn(run(log, rx, publish));
        Self { tx, state }
    }

    pub async fn append(&self, record: MemoryRecord) -> Result<Uuid, CoreError> {
        self.request(|reply| Command::Append(record, reply)).await
    }

    pub async fn compact(&self, retention: Duration) -> Result<usize, CoreError> {
        self.compact_at(retention, Utc::now()).await
    }

    pub async fn compact_at(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize, CoreError> {
        self.request(|reply| Command::Compact { retention, now, reply })
            .await
    }

    pub async fn clear(&self) -> Result<(), CoreError> {
        self.request(Command::Clear).await
    }

    pub async fn replace(&self, records: Vec<MemoryRecord>) -> Result<(), CoreError> {
        self.request(|reply| Command::Replace(records, reply))
            .await?
            .map_err(CoreError::from)
    }

    pub fn query(&self, filter: MemoryFilter) -> MemoryQuery {
        MemoryQuery::new(self.snapshot(), filter)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        Arc::clone(&self.state.borrow())
    }

    /// Records a snapshot persists: inside retention, or pinned.
    pub fn window(&self, retention: Duration, now: DateTime<Utc>) -> Vec<MemoryRecord> {
        window(&self.snapshot(), retention, now)
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CoreError::WorkerStopped("memory"))?;
        rx.await.map_err(|_| CoreError::WorkerStopped("memory"))
    }
}

async fn run(mut log: MemoryLog, mut rx: mpsc::Receiver<Command>, publish: watch::Sender<MemorySnapshot>) {
    let mut carried: Option<Command> = None;
    loop {
        let cmd = match carried.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            Command::Append(record, reply) => {
                let mut replies = vec![(log.append(record), reply)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        Command::Append(record, reply) => replies.push((log.append(record), reply)),
                        other => {
                            carried = Some(other);
                            break;
                        }
                    }
                }
                publish.send_replace(log.snapshot());
                for (id, reply) in replies {
                    let _ = reply.send(id);
                }
            }
            Command::Compact { retention, now, reply } => {
                let removed = log.compact_at(retention, now);
                if removed > 0 {
                    tracing::info!(removed, remaining = log.len(), "memory compacted");
                    publish.send_replace(log.snapshot());
                }
                let _ = reply.send(removed);
            }
            Command::Clear(reply) => {
                log.clear();
                publish.send_replace(log.snapshot());
                let _ = reply.send(());
            }
            Command::Replace(records, reply) => {
                let result = MemoryLog::from_records(records).map(|restored| {
                    log = restored;
                    publish.send_replace(log.snapshot());
                });
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!("memory worker stopped");
}
