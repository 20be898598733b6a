//! 🔄 Extractors: where angle brackets go in and averages come out 🎭
//!
//! ## Architecture 📐
//!
//! ```text
//!   bytes on disk          ParserEvent             ProductMetric
//!  ┌──────────────┐     ┌───────────────┐      ┌──────────────┐
//!  │ quick-xml    │────▶│ ElementStart  │─────▶│ product_id   │
//!  │ async reader │     │ Characters    │      │ mean_value   │
//!  │ (owns file)  │     │ ElementEnd    │      │ source_file  │
//!  └──────────────┘     └───────────────┘      └──────────────┘
//!   StreamingMetricExtractor   ParseHandler      MetricAccumulator
//! ```
//!
//! The reader never builds a tree. It hands out one event at a time, the handler
//! folds it into its little state machine, and whenever a `</product>` closes the
//! handler may cough up a finished record. Peak memory = one event buffer plus one
//! product's worth of numbers. Your 4GB export file is welcome here.
//!
//! ## Knowledge Graph 🧠
//! - `ParserEvent`: the boundary type. The reader speaks XML, the handler speaks events.
//! - `ParseHandler`: the capability. Three methods, no inheritance, no vtable required.
//! - `MetricAccumulator`: the one handler that actually matters.
//! - `StreamingMetricExtractor`: the adapter that owns the byte stream and pumps events.
//!
//! 🦆

use std::path::PathBuf;

use thiserror::Error;

pub mod accumulator;
pub mod xml_stream;

pub use accumulator::{MetricAccumulator, RECOGNIZED_METRIC_TAGS};
pub use xml_stream::StreamingMetricExtractor;

/// 📡 One structural event out of the streaming reader, fully owned.
///
/// Owned strings on purpose: the reader reuses its buffer for the next event, so
/// whatever the handler wants to keep has to leave the buffer first.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// 🚪 `<name attr="value">`, or the first half of `<name/>`
    ElementStart {
        name: String,
        attributes: Vec<(String, String)>,
    },
    /// 📝 Text or CDATA content, entities already unescaped, NOT trimmed
    Characters(String),
    /// 🚪 `</name>`, or the second half of `<name/>`
    ElementEnd { name: String },
}

/// 🎯 The capability a streaming reader drives. Start, characters, end. That's the whole API.
///
/// Implementors are state machines. Only `on_element_end` can produce output because
/// that is the only moment anything is ever finished.
pub trait ParseHandler {
    /// 📦 What comes out when something completes.
    type Output;

    fn on_element_start(&mut self, name: &str, attributes: &[(String, String)]);

    fn on_characters(&mut self, text: &str);

    fn on_element_end(&mut self, name: &str) -> Option<Self::Output>;

    /// 🔀 Routes one [`ParserEvent`] to the matching method.
    fn handle(&mut self, event: ParserEvent) -> Option<Self::Output> {
        match event {
            ParserEvent::ElementStart { name, attributes } => {
                self.on_element_start(&name, &attributes);
                None
            }
            ParserEvent::Characters(text) => {
                self.on_characters(&text);
                None
            }
            ParserEvent::ElementEnd { name } => self.on_element_end(&name),
        }
    }
}

/// 💀 Everything that can make a whole file un-extractable.
///
/// Note what is NOT in here: bad numbers, missing ids, empty products. Those are
/// per-product problems and the accumulator shrugs them off. This enum is for when
/// the file itself is broken, and every variant knows which file it was.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("💀 could not open '{}' for reading", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("💀 malformed XML in '{}' near byte {position}", path.display())]
    Malformed {
        path: PathBuf,
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("💀 '{}' ended with {open_elements} element(s) still open", path.display())]
    Truncated { path: PathBuf, open_elements: usize },

    #[error("💀 '{}' has no root element, it is XML in name only", path.display())]
    NoRootElement { path: PathBuf },

    /// 🚫 A second root element, or stray text, outside the one document element.
    #[error("💀 '{}' has content outside its root element near byte {position}", path.display())]
    ContentOutsideRoot { path: PathBuf, position: u64 },
}

impl ParseError {
    /// 📂 Which file broke. Every variant knows.
    pub fn path(&self) -> &std::path::Path {
        match self {
            ParseError::Open { path, .. }
            | ParseError::Malformed { path, .. }
            | ParseError::Truncated { path, .. }
            | ParseError::NoRootElement { path }
            | ParseError::ContentOutsideRoot { path, .. } => path,
        }
    }
}
