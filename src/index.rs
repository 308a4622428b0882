//! Handing parsed events to a search index in batches.

use std::{collections::BTreeMap, io::Write};

use anyhow::{Context, Error};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

use crate::{
    event::Event,
    stream::{EventStream, FeedReport},
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Flush once this many events are pending. Zero is treated as one.
    pub batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Events waiting to be written, keyed by uid.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<(String, Event)>,
}

impl Batch {
    pub fn new() -> Batch {
        Batch::default()
    }

    /// Queue `event` to be indexed under `id`, replacing anything already
    /// stored under that id.
    pub fn index(&mut self, id: String, event: Event) {
        self.entries.push((id, event));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Event)] {
        &self.entries
    }
}

impl IntoIterator for Batch {
    type Item = (String, Event);
    type IntoIter = std::vec::IntoIter<(String, Event)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Something that can store events, overwriting by id.
pub trait BatchIndex {
    fn index_batch(&mut self, batch: Batch) -> Result<(), Error>;
}

/// Keeps the latest event per uid in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    events: BTreeMap<String, Event>,
}

impl MemoryIndex {
    pub fn new() -> MemoryIndex {
        MemoryIndex::default()
    }

    pub fn get(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Event)> {
        self.events.iter().map(|(id, event)| (id.as_str(), event))
    }
}

impl BatchIndex for MemoryIndex {
    fn index_batch(&mut self, batch: Batch) -> Result<(), Error> {
        self.events.extend(batch);
        Ok(())
    }
}

/// Writes each event as one line of JSON. Later lines for the same id are
/// expected to replace earlier ones.
#[derive(Debug)]
pub struct JsonLinesIndex<W> {
    writer: W,
}

#[derive(Serialize)]
struct Document<'a> {
    id: &'a str,
    #[serde(flatten)]
    event: &'a Event,
}

impl<W: Write> JsonLinesIndex<W> {
    pub fn new(writer: W) -> JsonLinesIndex<W> {
        JsonLinesIndex { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> BatchIndex for JsonLinesIndex<W> {
    fn index_batch(&mut self, batch: Batch) -> Result<(), Error> {
        for (id, event) in batch.entries() {
            serde_json::to_writer(&mut self.writer, &Document { id, event })
                .with_context(|| format!("writing event {}", id))?;
            self.writer.write_all(b"\n")?;
        }

        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub feed: FeedReport,
}

/// Drain `stream` into `index`, flushing every `batch_size` events.
///
/// If the feed fails part way, everything received up to that point is
/// still flushed before the error is returned.
pub async fn batch_index_events<I>(
    mut stream: EventStream,
    index: &mut I,
    options: &IndexOptions,
) -> Result<IndexReport, Error>
where
    I: BatchIndex + ?Sized,
{
    let batch_size = options.batch_size.max(1);
    let mut count = 0;
    let mut batch = Batch::new();

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                count += flush(index, &mut batch)?;
                info!("Indexed {} Events", count);
                return Err(Error::new(err).context("reading events"));
            }
        };

        batch.index(event.uid.clone(), event);
        if batch.len() >= batch_size {
            count += flush(index, &mut batch)?;
            info!("Indexed {} Events", count);
        }
    }

    count += flush(index, &mut batch)?;
    info!("Indexed {} Events", count);

    let feed = stream.finish().await?;

    Ok(IndexReport {
        indexed: count,
        feed,
    })
}

fn flush<I>(index: &mut I, batch: &mut Batch) -> Result<usize, Error>
where
    I: BatchIndex + ?Sized,
{
    if batch.is_empty() {
        return Ok(0);
    }

    let batch = std::mem::take(batch);
    let size = batch.len();
    index.index_batch(batch).context("indexing batch")?;

    Ok(size)
}
