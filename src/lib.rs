//! Streaming extraction of events from `BEGIN`/`END` calendar feeds.
//!
//! Lines are read one at a time and each completed block becomes an
//! [`Event`]. Parsing runs on its own task and the results are exposed as an
//! ordered [`EventStream`], which [`index::batch_index_events`] can drain
//! into a search index.

pub mod error;
pub mod event;
pub mod extract;
pub mod index;
pub mod line;
pub mod parser;
pub mod source;
pub mod stream;
pub mod timezone;

pub use error::FeedError;
pub use event::Event;
pub use parser::{parse_lines, BlockParser, Events};
pub use source::Source;
pub use stream::{EventStream, FeedOptions, FeedReport};
