//! In-process scan publisher driven by a scripted timeline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::value::Value;

use super::{DataStore, ScanHandle, ScanInfo, ScanState, StreamCursor, StreamInfo, StreamRead, UpdateMode};

/// One step of a [`MemoryScan`] timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    State(ScanState),
    Block { label: String, block: Value },
    Fail { label: String, reason: String },
    End { label: String },
}

#[derive(Debug, Default)]
struct Buffer {
    items: VecDeque<std::result::Result<Value, String>>,
    ended: bool,
}

/// A scan whose state changes and stream data are replayed from a script.
///
/// Each non-blocking update applies one event; a blocking update applies
/// events up to and including the next state change. Updating past the end
/// of the script fails with [`Error::ScanStalled`].
#[derive(Debug)]
pub struct MemoryScan {
    info: ScanInfo,
    state: ScanState,
    streams: Vec<(StreamInfo, Arc<Mutex<Buffer>>)>,
    timeline: VecDeque<ScanEvent>,
}

impl MemoryScan {
    pub fn new(info: ScanInfo) -> Self {
        Self {
            info,
            state: ScanState::Unstarted,
            streams: Vec::new(),
            timeline: VecDeque::new(),
        }
    }

    pub fn with_stream(mut self, label: &str, kind: &str, shape: &[usize]) -> Self {
        self.streams.push((
            StreamInfo {
                label: label.to_string(),
                kind: kind.to_string(),
                shape: shape.to_vec(),
            },
            Arc::default(),
        ));
        self
    }

    pub fn then(mut self, event: ScanEvent) -> Self {
        self.timeline.push_back(event);
        self
    }

    pub fn then_state(self, state: ScanState) -> Self {
        self.then(ScanEvent::State(state))
    }

    pub fn then_block(self, label: &str, block: Value) -> Self {
        self.then(ScanEvent::Block {
            label: label.to_string(),
            block,
        })
    }

    pub fn then_end(self, label: &str) -> Self {
        self.then(ScanEvent::End {
            label: label.to_string(),
        })
    }

    pub fn then_fail(self, label: &str, reason: &str) -> Self {
        self.then(ScanEvent::Fail {
            label: label.to_string(),
            reason: reason.to_string(),
        })
    }

    /// The usual lifecycle: prepared, streaming, `events`, stopped, closed.
    pub fn scripted(info: ScanInfo, events: impl IntoIterator<Item = ScanEvent>) -> Self {
        let mut scan = Self::new(info)
            .then_state(ScanState::Prepared)
            .then_state(ScanState::Streaming);
        scan.timeline.extend(events);
        scan.then_state(ScanState::Stopped)
            .then_state(ScanState::Closed)
    }

    fn buffer(&self, label: &str) -> Option<&Arc<Mutex<Buffer>>> {
        self.streams
            .iter()
            .find(|(info, _)| info.label == label)
            .map(|(_, buf)| buf)
    }

    /// Apply one event; true if it changed the state.
    fn apply(&mut self, event: ScanEvent) -> bool {
        match event {
            ScanEvent::State(state) => {
                self.state = self.state.max(state);
                return true;
            }
            ScanEvent::Block { label, block } => {
                if let Some(buf) = self.buffer(&label) {
                    buf.lock().items.push_back(Ok(block));
                }
            }
            ScanEvent::Fail { label, reason } => {
                if let Some(buf) = self.buffer(&label) {
                    buf.lock().items.push_back(Err(reason));
                }
            }
            ScanEvent::End { label } => {
                if let Some(buf) = self.buffer(&label) {
                    buf.lock().ended = true;
                }
            }
        }
        false
    }
}

impl ScanHandle for MemoryScan {
    fn info(&self) -> &ScanInfo {
        &self.info
    }

    fn state(&self) -> ScanState {
        self.state
    }

    fn update(&mut self, mode: UpdateMode) -> Result<()> {
        match mode {
            UpdateMode::NonBlocking => {
                let event = self
                    .timeline
                    .pop_front()
                    .ok_or(Error::ScanStalled(self.info.number))?;
                self.apply(event);
                Ok(())
            }
            UpdateMode::Blocking => {
                while let Some(event) = self.timeline.pop_front() {
                    if self.apply(event) {
                        return Ok(());
                    }
                }
                Err(Error::ScanStalled(self.info.number))
            }
        }
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.streams.iter().map(|(info, _)| info.clone()).collect()
    }

    fn cursor(&self, label: &str) -> Option<Box<dyn StreamCursor>> {
        self.buffer(label).map(|buf| {
            Box::new(MemoryCursor {
                label: label.to_string(),
                buffer: Arc::clone(buf),
            }) as Box<dyn StreamCursor>
        })
    }
}

struct MemoryCursor {
    label: String,
    buffer: Arc<Mutex<Buffer>>,
}

impl StreamCursor for MemoryCursor {
    fn read(&mut self) -> Result<StreamRead> {
        let mut buf = self.buffer.lock();
        match buf.items.pop_front() {
            Some(Ok(block)) => Ok(StreamRead::Block(block)),
            Some(Err(reason)) => Err(Error::Stream {
                label: self.label.clone(),
                reason,
            }),
            None if buf.ended => Ok(StreamRead::EndOfStream),
            None => Ok(StreamRead::Empty),
        }
    }
}

#[derive(Debug, Default)]
struct Published {
    last_timestamp: u64,
    scans: Vec<(u64, String, Option<MemoryScan>)>,
}

/// Shared in-process scan queue. Clones publish to and read from the same
/// queue, so one clone can feed a service running on another thread.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataStore {
    shared: Arc<(Mutex<Published>, Condvar)>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `scan` discoverable; returns its key.
    pub fn publish(&self, scan: MemoryScan) -> String {
        let (lock, ready) = &*self.shared;
        let mut published = lock.lock();
        published.last_timestamp += 1;
        let timestamp = published.last_timestamp;
        let key = format!("scan:{}:{timestamp}", scan.info.number);
        published.scans.push((timestamp, key.clone(), Some(scan)));
        ready.notify_all();
        key
    }

    /// Published scans not loaded yet.
    pub fn pending(&self) -> usize {
        let (lock, _) = &*self.shared;
        lock.lock()
            .scans
            .iter()
            .filter(|(_, _, scan)| scan.is_some())
            .count()
    }
}

impl DataStore for MemoryDataStore {
    type Scan = MemoryScan;

    fn next_scan(
        &mut self,
        since: Option<u64>,
        timeout: Duration,
    ) -> Result<Option<(u64, String)>> {
        let (lock, ready) = &*self.shared;
        let deadline = Instant::now() + timeout;
        let mut published = lock.lock();
        loop {
            let after = since.unwrap_or(0);
            if let Some((ts, key, _)) = published.scans.iter().find(|(ts, _, _)| *ts > after) {
                return Ok(Some((*ts, key.clone())));
            }
            if ready.wait_until(&mut published, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn load_scan(&mut self, key: &str) -> Result<MemoryScan> {
        let (lock, _) = &*self.shared;
        lock.lock()
            .scans
            .iter_mut()
            .find(|(_, k, _)| k == key)
            .and_then(|(_, _, scan)| scan.take())
            .ok_or_else(|| Error::ScanNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(number: u64) -> ScanInfo {
        ScanInfo {
            number,
            ..ScanInfo::default()
        }
    }

    #[test]
    fn blocking_update_stops_at_state_change() {
        let mut scan = MemoryScan::new(info(1))
            .with_stream("a", "float64", &[])
            .then_block("a", Value::from(1.0))
            .then_state(ScanState::Prepared)
            .then_end("a");
        scan.update(UpdateMode::Blocking).unwrap();
        assert_eq!(scan.state(), ScanState::Prepared);
        let mut cursor = scan.cursor("a").unwrap();
        assert_eq!(cursor.read().unwrap(), StreamRead::Block(Value::from(1.0)));
        assert_eq!(cursor.read().unwrap(), StreamRead::Empty);
        scan.update(UpdateMode::NonBlocking).unwrap();
        assert_eq!(cursor.read().unwrap(), StreamRead::EndOfStream);
        assert!(matches!(
            scan.update(UpdateMode::Blocking),
            Err(Error::ScanStalled(1))
        ));
        assert!(scan.update(UpdateMode::NonBlocking).is_err());
    }

    #[test]
    fn failures_surface_once() {
        let mut scan = MemoryScan::new(info(2))
            .with_stream("a", "int64", &[])
            .then_fail("a", "boom")
            .then_block("a", Value::from(5i64));
        scan.update(UpdateMode::NonBlocking).unwrap();
        scan.update(UpdateMode::NonBlocking).unwrap();
        let mut cursor = scan.cursor("a").unwrap();
        assert!(matches!(cursor.read(), Err(Error::Stream { .. })));
        assert_eq!(cursor.read().unwrap(), StreamRead::Block(Value::from(5i64)));
        assert!(scan.cursor("missing").is_none());
    }

    #[test]
    fn discovery_in_publish_order() {
        let mut store = MemoryDataStore::new();
        assert_eq!(store.next_scan(None, Duration::from_millis(10)).unwrap(), None);
        store.publish(MemoryScan::new(info(7)));
        store.publish(MemoryScan::new(info(8)));

        let (ts, key) = store.next_scan(None, Duration::ZERO).unwrap().unwrap();
        assert_eq!(store.load_scan(&key).unwrap().info().number, 7);
        let (_, key) = store.next_scan(Some(ts), Duration::ZERO).unwrap().unwrap();
        assert_eq!(store.load_scan(&key).unwrap().info().number, 8);
        assert!(store.load_scan(&key).is_err());
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn discovery_wakes_on_publish() {
        let mut store = MemoryDataStore::new();
        let publisher = store.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(MemoryScan::new(info(3)));
        });
        let found = store.next_scan(None, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(found.is_some());
    }
}
