//! Incremental appends of streamed channel data.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::kind::ValueKind;
use crate::path::NodePath;
use crate::scan::{ChannelInfo, ScanHandle, StreamCursor, StreamInfo, StreamRead};
use crate::snapshot::Failure;
use crate::store::{Layout, NodeId, Store, StoreError};
use crate::tree;
use crate::value::Value;

/// Where and how one stream is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub label: String,
    /// Field path, `name:NXclass` segments allowed.
    pub path: String,
    pub kind: String,
    /// Shape of one sample.
    pub shape: Vec<usize>,
    pub skip: bool,
}

impl ChannelDescriptor {
    /// Merge the scan's streams with its per-channel overrides. Channels
    /// without an explicit path go under `template`.
    pub fn derive(
        streams: &[StreamInfo],
        overrides: &BTreeMap<String, ChannelInfo>,
        template: &str,
    ) -> Vec<ChannelDescriptor> {
        let default_path =
            |label: &str| format!("{}/{}", template.trim_end_matches('/'), label.replace(':', "_"));

        let mut out: Vec<ChannelDescriptor> = streams
            .iter()
            .map(|stream| {
                let o = overrides.get(&stream.label).cloned().unwrap_or_default();
                ChannelDescriptor {
                    label: stream.label.clone(),
                    path: o.path.unwrap_or_else(|| default_path(&stream.label)),
                    kind: o.kind.unwrap_or_else(|| stream.kind.clone()),
                    shape: o.shape.unwrap_or_else(|| stream.shape.clone()),
                    skip: o.skip,
                }
            })
            .collect();

        // overrides for streams the scan does not expose stay visible in
        // the report as skipped channels
        for (label, o) in overrides {
            if streams.iter().any(|s| &s.label == label) {
                continue;
            }
            out.push(ChannelDescriptor {
                label: label.clone(),
                path: o.path.clone().unwrap_or_else(|| default_path(label)),
                kind: o.kind.clone().unwrap_or_default(),
                shape: o.shape.clone().unwrap_or_default(),
                skip: o.skip,
            });
        }
        out
    }
}

/// Result of [`ChannelWriter::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Too early; try again after the remaining interval.
    Throttled(Duration),
    /// Polled every active channel, appending `rows` points in total.
    Ran { rows: usize },
}

/// Per-channel counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub label: String,
    pub path: String,
    /// Length of the field along dimension 0.
    pub rows: usize,
    pub blocks: usize,
    pub ended: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelReport {
    pub channels: Vec<ChannelStats>,
    pub ticks: usize,
    pub failures: Vec<Failure>,
}

impl ChannelReport {
    pub fn rows(&self, label: &str) -> Option<usize> {
        self.channels
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.rows)
    }
}

struct Channel {
    desc: ChannelDescriptor,
    cursor: Option<Box<dyn StreamCursor>>,
    field: Option<NodeId>,
    rows: usize,
    blocks: usize,
    ended: bool,
}

impl Channel {
    fn active(&self) -> bool {
        !self.ended && self.cursor.is_some() && self.field.is_some()
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            label: self.desc.label.clone(),
            path: self.desc.path.clone(),
            rows: self.rows,
            blocks: self.blocks,
            ended: self.ended,
            skipped: self.field.is_none() || self.cursor.is_none(),
        }
    }
}

/// Appends stream blocks to extensible fields, one tick at a time.
pub struct ChannelWriter {
    min_interval: Duration,
    last_tick: Option<Instant>,
    channels: Vec<Channel>,
    ticks: usize,
    failures: Vec<Failure>,
}

impl ChannelWriter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: None,
            channels: Vec::new(),
            ticks: 0,
            failures: Vec::new(),
        }
    }

    /// Attach cursors and open or create one field per channel. Channels
    /// that cannot be set up are kept as skipped.
    pub fn prepare<S, H>(&mut self, store: &mut S, descriptors: Vec<ChannelDescriptor>, scan: &H)
    where
        S: Store + ?Sized,
        H: ScanHandle + ?Sized,
    {
        for desc in descriptors {
            let mut channel = Channel {
                cursor: None,
                field: None,
                rows: 0,
                blocks: 0,
                ended: false,
                desc,
            };
            if channel.desc.skip {
                debug!(channel = %channel.desc.label, "channel skipped by configuration");
            } else {
                match scan.cursor(&channel.desc.label) {
                    Some(cursor) => match open_field(store, &channel.desc) {
                        Ok((field, rows)) => {
                            channel.cursor = Some(cursor);
                            channel.field = Some(field);
                            channel.rows = rows;
                        }
                        Err(e) => record(&mut self.failures, &channel.desc, &e),
                    },
                    None => debug!(channel = %channel.desc.label, "scan has no such stream"),
                }
            }
            self.channels.push(channel);
        }
        info!(
            channels = self.channels.len(),
            active = self.active(),
            "channels prepared"
        );
    }

    /// Channels still being polled.
    pub fn active(&self) -> usize {
        self.channels.iter().filter(|c| c.active()).count()
    }

    pub fn tick<S: Store + ?Sized>(&mut self, store: &mut S) -> Tick {
        self.tick_at(store, Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock reading.
    pub fn tick_at<S: Store + ?Sized>(&mut self, store: &mut S, now: Instant) -> Tick {
        if let Some(last) = self.last_tick {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Tick::Throttled(self.min_interval - elapsed);
            }
        }
        self.last_tick = Some(now);
        let (rows, _) = self.poll(store);
        Tick::Ran { rows }
    }

    /// Poll without throttling until a pass reads no block; returns the
    /// number of points appended. Read errors are recorded but do not
    /// count as progress.
    pub fn drain<S: Store + ?Sized>(&mut self, store: &mut S) -> usize {
        let mut total = 0;
        loop {
            let (rows, blocks) = self.poll(store);
            total += rows;
            if blocks == 0 {
                break;
            }
        }
        if total > 0 {
            debug!(rows = total, "drained trailing blocks");
        }
        total
    }

    pub fn report(&self) -> ChannelReport {
        ChannelReport {
            channels: self.channels.iter().map(Channel::stats).collect(),
            ticks: self.ticks,
            failures: self.failures.clone(),
        }
    }

    /// One pass over the active channels: (points appended, blocks read).
    fn poll<S: Store + ?Sized>(&mut self, store: &mut S) -> (usize, usize) {
        self.ticks += 1;
        let mut appended = 0;
        let mut blocks = 0;
        for ch in self.channels.iter_mut().filter(|c| c.active()) {
            let (Some(cursor), Some(field)) = (ch.cursor.as_mut(), ch.field) else {
                continue;
            };
            match cursor.read() {
                Ok(StreamRead::Empty) => {}
                Ok(StreamRead::EndOfStream) => {
                    ch.ended = true;
                    info!(channel = %ch.desc.label, rows = ch.rows, "end of stream");
                }
                Ok(StreamRead::Block(block)) => {
                    blocks += 1;
                    let block = as_points(block, &ch.desc.shape);
                    match append(store, field, ch.rows, &block) {
                        Ok(0) => {}
                        Ok(n) => {
                            ch.rows += n;
                            ch.blocks += 1;
                            appended += n;
                        }
                        Err(e) => {
                            record(&mut self.failures, &ch.desc, &e);
                            if let Ok(info) = store.field_info(field) {
                                ch.rows = info.rows();
                            }
                        }
                    }
                }
                Err(e) => record(&mut self.failures, &ch.desc, &e),
            }
        }
        (appended, blocks)
    }
}

fn open_field<S: Store + ?Sized>(store: &mut S, desc: &ChannelDescriptor) -> Result<(NodeId, usize)> {
    let kind: ValueKind = desc.kind.parse()?;
    let path = NodePath::parse(&desc.path)?;
    let handle = tree::build_field(store, &path, kind, None, Some(Layout::extensible(&desc.shape)))?;
    let info = store.field_info(handle.node)?;
    if info.chunk.is_none() {
        return Err(StoreError::NotExtensible {
            path: desc.path.clone(),
        }
        .into());
    }
    Ok((handle.node, info.rows()))
}

/// Extend dimension 0 by the block's point count and write it at `offset`.
/// A block of the wrong sample shape is refused before the field grows;
/// a write that fails anyway shrinks the field back to `offset`.
fn append<S: Store + ?Sized>(store: &mut S, field: NodeId, offset: usize, block: &Value) -> Result<usize> {
    let points = block.rows();
    if points == 0 {
        return Ok(0);
    }
    let info = store.field_info(field)?;
    let sample = block.shape().get(1..).unwrap_or(&[]);
    if info.shape.get(1..) != Some(sample) {
        let mut got = vec![offset + points];
        got.extend_from_slice(sample);
        return Err(StoreError::ShapeMismatch {
            path: store.node_path(field)?,
            stored: info.shape,
            got,
        }
        .into());
    }
    store.extend(field, offset + points)?;
    if let Err(e) = store.write_rows(field, offset, block) {
        if let Err(undo) = store.extend(field, offset) {
            warn!(error = %undo, "could not shrink field after a failed write");
        }
        return Err(e.into());
    }
    Ok(points)
}

/// A block shaped like a single sample is one point.
fn as_points(block: Value, sample: &[usize]) -> Value {
    if block.shape() != sample {
        return block;
    }
    let mut shape = Vec::with_capacity(sample.len() + 1);
    shape.push(1);
    shape.extend_from_slice(sample);
    Value::Array {
        shape,
        data: block.scalars().to_vec(),
    }
}

fn record(failures: &mut Vec<Failure>, desc: &ChannelDescriptor, error: &Error) {
    warn!(channel = %desc.label, path = %desc.path, error = %error, "channel write failed");
    failures.push(Failure {
        scope: desc.label.clone(),
        target: desc.path.clone(),
        message: error.to_string(),
    });
}
