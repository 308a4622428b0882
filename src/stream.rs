use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::FeedError, event::Event, line::decode_line, parser::BlockParser, source::Source,
};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// How many parsed events may wait for the consumer before the producer
    /// blocks. Zero is treated as one.
    pub channel_capacity: usize,

    /// Applied to remote sources only.
    pub request_timeout: Option<Duration>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        FeedOptions {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout: None,
        }
    }
}

/// What happened while producing a stream, available once it has ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedReport {
    /// `None` when parsing from an arbitrary reader.
    pub source: Option<String>,

    /// When the source was successfully opened.
    pub loaded_at: Option<DateTime<Utc>>,

    /// Number of events handed to the consumer.
    pub events: usize,

    /// Whether the input ended inside a block that was then dropped.
    pub discarded_partial_block: bool,

    /// True only if the whole input was read without error.
    pub completed: bool,
}

impl FeedReport {
    fn new(source: Option<String>) -> FeedReport {
        FeedReport {
            source,
            loaded_at: None,
            events: 0,
            discarded_partial_block: false,
            completed: false,
        }
    }
}

type Item = Result<Event, FeedError>;

/// Events parsed on a background task, delivered in feed order.
///
/// At most one `Err` is yielded and it is always the last item. The
/// producer waits whenever `channel_capacity` events are queued.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Item>,
    producer: JoinHandle<FeedReport>,
}

impl EventStream {
    /// Open `source` and parse it on a new task. Must be called from within a
    /// tokio runtime.
    pub fn open(source: Source, options: &FeedOptions) -> EventStream {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let timeout = options.request_timeout;

        let producer = tokio::spawn(async move {
            let mut report = FeedReport::new(Some(source.to_string()));

            match source.open(timeout).await {
                Ok(reader) => {
                    report.loaded_at = Some(Utc::now());
                    produce(reader, &tx, &mut report).await;
                }
                Err(err) => {
                    warn!("{}", err);
                    let _ = tx.send(Err(err)).await;
                }
            }

            report
        });

        EventStream { rx, producer }
    }

    /// Parse an already open reader on a new task.
    pub fn from_reader<R>(reader: R, options: &FeedOptions) -> EventStream
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));

        let producer = tokio::spawn(async move {
            let mut report = FeedReport::new(None);
            report.loaded_at = Some(Utc::now());
            produce(reader, &tx, &mut report).await;
            report
        });

        EventStream { rx, producer }
    }

    /// Stop consuming and wait for the producer to wind down.
    ///
    /// Events not yet received are dropped; call this after the stream has
    /// returned `None` to get a report covering the whole feed.
    pub async fn finish(self) -> Result<FeedReport, FeedError> {
        let EventStream { rx, producer } = self;
        drop(rx);

        Ok(producer.await?)
    }
}

impl Stream for EventStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn produce<R>(reader: R, tx: &mpsc::Sender<Item>, report: &mut FeedReport)
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();
    let mut parser = BlockParser::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                report.discarded_partial_block = parser.finish();
                report.completed = true;
                return;
            }
            Ok(_) => {
                if let Some(event) = parser.push_line(&decode_line(&buf)) {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("event consumer went away, stopping");
                        return;
                    }
                    report.events += 1;
                }
            }
            Err(err) => {
                warn!("error reading feed: {}", err);
                report.discarded_partial_block = parser.finish();
                let _ = tx.send(Err(err.into())).await;
                return;
            }
        }
    }
}
