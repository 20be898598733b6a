//! 📂 StreamingMetricExtractor: the adapter that owns the byte stream.
//!
//! quick-xml's async reader pulls one event at a time into a reusable buffer. We copy
//! out what the handler needs, clear the buffer, and go again. The whole document
//! never exists in memory at once, which is the entire point.
//!
//! ⚠️ One pass. Once `next_metric` has returned `Ok(None)` or an error, the extractor is
//! done for good. Need to read the file again? Open it again. Like a book you lent out.

use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::trace;

use crate::common::source_file_name;
use crate::extractors::{MetricAccumulator, ParseError, ParseHandler, ParserEvent};

/// 🔄 What one raw reader event turned into, after leaving the borrowed buffer.
enum Pumped {
    Parsed(ParserEvent),
    // -- 🚪🚪 `<x/>` is an entrance and an exit in one tag
    SelfClosing { start: ParserEvent, end: ParserEvent },
    Eof,
    Ignored,
}

/// 📡 Drives a streaming XML reader and feeds a [`ParseHandler`], one event at a time.
///
/// Defaults to the [`MetricAccumulator`] handler, which is what every production
/// caller wants. Records come out in document order, lazily, as each `</product>` closes.
pub struct StreamingMetricExtractor<R, H = MetricAccumulator> {
    reader: Reader<R>,
    handler: H,
    path: PathBuf,
    buf: Vec<u8>,
    // -- 📏 open element count. non-zero at EOF = truncated document
    depth: usize,
    seen_root: bool,
    finished: bool,
}

impl<R, H> std::fmt::Debug for StreamingMetricExtractor<R, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🔧 the reader and handler stay out of it, nobody wants a byte buffer in their logs
        f.debug_struct("StreamingMetricExtractor")
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamingMetricExtractor<BufReader<File>> {
    /// 🚀 Opens `path` and gets ready to stream it. Nothing is parsed until `next_metric`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }
}

impl<R: AsyncBufRead + Unpin> StreamingMetricExtractor<R> {
    /// 🧪 Streams from any async buffered reader. `path` is only used for naming:
    /// its base name becomes every record's `source_file`, and errors report it.
    pub fn from_reader(reader: R, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let accumulator = MetricAccumulator::new(source_file_name(&path));
        Self::with_handler(reader, path, accumulator)
    }
}

impl<R: AsyncBufRead + Unpin, H: ParseHandler> StreamingMetricExtractor<R, H> {
    /// 🔧 Same as `from_reader`, bring your own handler.
    pub fn with_handler(reader: R, path: impl Into<PathBuf>, handler: H) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            handler,
            path: path.into(),
            buf: Vec::with_capacity(1024),
            depth: 0,
            seen_root: false,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 🧮 The handler, for peeking at its counters after (or during) the run.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// 📦 Pulls events until the handler completes something, the document ends, or the
    /// XML turns out to be broken.
    ///
    /// Returns `Ok(None)` exactly once at a clean end of document. Anything already
    /// returned before an `Err` stays returned. There is no undo.
    pub async fn next_metric(&mut self) -> Result<Option<H::Output>, ParseError> {
        while !self.finished {
            let pumped = match self.reader.read_event_into_async(&mut self.buf).await {
                Ok(event) => pump(event),
                Err(source) => Err(source),
            };
            self.buf.clear();

            let pumped = match pumped {
                Ok(pumped) => pumped,
                Err(source) => {
                    self.finished = true;
                    return Err(ParseError::Malformed {
                        path: self.path.clone(),
                        position: self.reader.buffer_position() as u64,
                        source,
                    });
                }
            };

            match pumped {
                Pumped::Parsed(event) => {
                    self.reject_outside_root(&event)?;
                    if let Some(output) = self.feed(event) {
                        return Ok(Some(output));
                    }
                }
                Pumped::SelfClosing { start, end } => {
                    self.reject_outside_root(&start)?;
                    // -- 🚪 starts never complete anything, only ends do
                    let _ = self.feed(start);
                    if let Some(output) = self.feed(end) {
                        return Ok(Some(output));
                    }
                }
                Pumped::Eof => {
                    self.finished = true;
                    if self.depth > 0 {
                        return Err(ParseError::Truncated {
                            path: self.path.clone(),
                            open_elements: self.depth,
                        });
                    }
                    if !self.seen_root {
                        return Err(ParseError::NoRootElement {
                            path: self.path.clone(),
                        });
                    }
                    trace!("🏁 reached the end of '{}'", self.path.display());
                    return Ok(None);
                }
                Pumped::Ignored => {}
            }
        }
        Ok(None)
    }

    /// 🚫 One document, one root. A second root, or text that isn't whitespace, sitting
    /// outside the root element makes the whole file malformed.
    fn reject_outside_root(&mut self, event: &ParserEvent) -> Result<(), ParseError> {
        if self.depth > 0 {
            return Ok(());
        }
        let outside = match event {
            ParserEvent::ElementStart { .. } => self.seen_root,
            ParserEvent::Characters(text) => !text.trim_start_matches('\u{feff}').trim().is_empty(),
            ParserEvent::ElementEnd { .. } => false,
        };
        if outside {
            self.finished = true;
            return Err(ParseError::ContentOutsideRoot {
                path: self.path.clone(),
                position: self.reader.buffer_position() as u64,
            });
        }
        Ok(())
    }

    fn feed(&mut self, event: ParserEvent) -> Option<H::Output> {
        match &event {
            ParserEvent::ElementStart { .. } => {
                self.depth += 1;
                self.seen_root = true;
            }
            ParserEvent::ElementEnd { .. } => self.depth = self.depth.saturating_sub(1),
            ParserEvent::Characters(_) => {}
        }
        self.handler.handle(event)
    }
}

/// 🔄 Copies one borrowed reader event into owned [`ParserEvent`]s.
fn pump(event: Event<'_>) -> Result<Pumped, quick_xml::Error> {
    let pumped = match event {
        Event::Start(start) => Pumped::Parsed(element_start(&start)?),
        Event::Empty(start) => Pumped::SelfClosing {
            start: element_start(&start)?,
            end: ParserEvent::ElementEnd {
                name: lossy(start.name().as_ref()),
            },
        },
        Event::End(end) => Pumped::Parsed(ParserEvent::ElementEnd {
            name: lossy(end.name().as_ref()),
        }),
        Event::Text(text) => Pumped::Parsed(ParserEvent::Characters(text.unescape()?.into_owned())),
        Event::CData(cdata) => Pumped::Parsed(ParserEvent::Characters(lossy(&cdata))),
        Event::Eof => Pumped::Eof,
        // -- 💤 declarations, comments, processing instructions, doctypes: not our department
        _ => Pumped::Ignored,
    };
    Ok(pumped)
}

fn element_start(start: &BytesStart<'_>) -> Result<ParserEvent, quick_xml::Error> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        attributes.push((
            lossy(attribute.key.as_ref()),
            attribute.unescape_value()?.into_owned(),
        ));
    }
    Ok(ParserEvent::ElementStart {
        name: lossy(start.name().as_ref()),
        attributes,
    })
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
