use std::{
    fs::File,
    io::{stdout, BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Error};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ics_feed::{
    index::{batch_index_events, IndexOptions, JsonLinesIndex, DEFAULT_BATCH_SIZE},
    stream::DEFAULT_CHANNEL_CAPACITY,
    EventStream, FeedOptions, Source,
};

/// Parse a calendar feed and write its events out in index batches, one JSON
/// document per line.
#[derive(Parser, Debug)]
#[command(name = "index_feed", version)]
struct Args {
    /// Path or http(s) URL of the feed.
    #[arg(long, default_value = "events.ics")]
    events: Source,

    /// Where to write the documents. Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Give up on a remote feed after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(stdout())),
    };
    let mut index = JsonLinesIndex::new(writer);

    let feed_options = FeedOptions {
        channel_capacity: args.channel_capacity,
        request_timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let index_options = IndexOptions {
        batch_size: args.batch_size,
    };

    let stream = EventStream::open(args.events.clone(), &feed_options);
    let report = batch_index_events(stream, &mut index, &index_options)
        .await
        .with_context(|| format!("indexing {}", args.events))?;

    if let Some(loaded_at) = report.feed.loaded_at {
        tracing::info!("Loaded {} at {}", args.events, loaded_at);
    }
    if report.feed.discarded_partial_block {
        tracing::warn!("feed ended inside an unterminated block");
    }

    Ok(())
}
