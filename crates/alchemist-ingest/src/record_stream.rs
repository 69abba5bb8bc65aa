//! Incremental reader for a top-level JSON array
//!
//! Snapshots are a single JSON array several gigabytes long. [`RecordStream`]
//! scans the file byte by byte, cuts out one array element at a time and
//! hands it to `serde_json`, so memory stays bounded by the largest element
//! rather than the file.
//!
//! The stream can be paused with [`RecordStream::pause`]. While paused,
//! [`RecordStream::next_event`] waits for [`RecordStream::resume`] before
//! reading another byte.

use crate::error::{IngestError, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const READ_BUFFER_BYTES: usize = 256 * 1024;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Record(Value),
    End,
}

/// Shared pause switch for a [`RecordStream`]
#[derive(Debug, Clone)]
pub struct PauseControl {
    paused: Arc<watch::Sender<bool>>,
}

impl PauseControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            paused: Arc::new(tx),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns immediately unless paused
    pub async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseControl {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Before the opening `[`
    Start,
    /// After `[`, expecting an element or `]`
    FirstElement,
    /// After `,`, expecting an element
    NextElement,
    /// After an element, expecting `,` or `]`
    AfterElement,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Container,
    String,
    Scalar,
}

/// Finds where one JSON element ends without interpreting it
#[derive(Debug)]
struct ElementScanner {
    kind: Option<ElementKind>,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl ElementScanner {
    fn new() -> Self {
        Self {
            kind: None,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Scan `bytes`, returning how many belong to the element and whether
    /// the element is complete.
    fn feed(&mut self, bytes: &[u8]) -> (usize, bool) {
        for (i, &b) in bytes.iter().enumerate() {
            let kind = match self.kind {
                Some(kind) => kind,
                None => {
                    self.kind = Some(match b {
                        b'{' | b'[' => {
                            self.depth = 1;
                            ElementKind::Container
                        },
                        b'"' => {
                            self.in_string = true;
                            ElementKind::String
                        },
                        _ => ElementKind::Scalar,
                    });
                    continue;
                },
            };

            match kind {
                ElementKind::Scalar => {
                    if is_delimiter(b) {
                        return (i, true);
                    }
                },
                ElementKind::String => {
                    if self.step_string(b) {
                        return (i + 1, true);
                    }
                },
                ElementKind::Container => {
                    if self.in_string {
                        self.step_string(b);
                        continue;
                    }
                    match b {
                        b'"' => self.in_string = true,
                        b'{' | b'[' => self.depth += 1,
                        b'}' | b']' => {
                            self.depth -= 1;
                            if self.depth == 0 {
                                return (i + 1, true);
                            }
                        },
                        _ => {},
                    }
                },
            }
        }
        (bytes.len(), false)
    }

    /// Advance inside a string; true when the closing quote was consumed
    fn step_string(&mut self, b: u8) -> bool {
        if self.escaped {
            self.escaped = false;
        } else if b == b'\\' {
            self.escaped = true;
        } else if b == b'"' {
            self.in_string = false;
            return true;
        }
        false
    }
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b',' | b']' | b'}')
}

/// Forward-only, single-pass sequence of array elements
pub struct RecordStream<R> {
    reader: R,
    offset: u64,
    position: Position,
    max_record_bytes: usize,
    element: Vec<u8>,
    pause: PauseControl,
}

impl RecordStream<BufReader<File>> {
    pub async fn open(path: &Path, max_record_bytes: usize) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_BYTES, file),
            max_record_bytes,
        ))
    }
}

impl<R: AsyncBufRead + Unpin> RecordStream<R> {
    pub fn new(reader: R, max_record_bytes: usize) -> Self {
        Self {
            reader,
            offset: 0,
            position: Position::Start,
            max_record_bytes,
            element: Vec::new(),
            pause: PauseControl::new(),
        }
    }

    /// Bytes consumed from the source so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Handle for pausing from another task
    pub fn pause_control(&self) -> PauseControl {
        self.pause.clone()
    }

    /// Next element, or `End` once the closing bracket has been read.
    ///
    /// After an error the stream is dead and every later call fails.
    pub async fn next_event(&mut self) -> Result<StreamEvent> {
        self.pause.wait_until_resumed().await;

        match self.advance().await {
            Ok(event) => Ok(event),
            Err(err) => {
                self.position = Position::Failed;
                Err(err)
            },
        }
    }

    async fn advance(&mut self) -> Result<StreamEvent> {
        loop {
            match self.position {
                Position::Start => {
                    self.skip_bom().await?;
                    match self.peek_significant().await? {
                        Some(b'[') => {
                            self.bump();
                            self.position = Position::FirstElement;
                        },
                        Some(_) => return Err(self.error("expected a top-level JSON array")),
                        None => return Err(self.error("empty snapshot file")),
                    }
                },
                Position::FirstElement => match self.peek_significant().await? {
                    Some(b']') => {
                        self.bump();
                        self.position = Position::Finished;
                    },
                    Some(_) => return self.read_element().await,
                    None => return Err(self.error("unexpected end of file inside array")),
                },
                Position::NextElement => match self.peek_significant().await? {
                    Some(b']') | Some(b',') => {
                        return Err(self.error("expected an array element after ','"))
                    },
                    Some(_) => return self.read_element().await,
                    None => return Err(self.error("unexpected end of file inside array")),
                },
                Position::AfterElement => match self.peek_significant().await? {
                    Some(b',') => {
                        self.bump();
                        self.position = Position::NextElement;
                    },
                    Some(b']') => {
                        self.bump();
                        self.position = Position::Finished;
                    },
                    Some(_) => return Err(self.error("expected ',' or ']' after array element")),
                    None => return Err(self.error("unexpected end of file inside array")),
                },
                Position::Finished => {
                    return match self.peek_significant().await? {
                        None => Ok(StreamEvent::End),
                        Some(_) => Err(self.error("unexpected data after the top-level array")),
                    };
                },
                Position::Failed => {
                    return Err(self.error("stream aborted by an earlier error"));
                },
            }
        }
    }

    async fn read_element(&mut self) -> Result<StreamEvent> {
        let start = self.offset;
        let mut scanner = ElementScanner::new();
        self.element.clear();

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if scanner.kind == Some(ElementKind::Scalar) {
                    break;
                }
                return Err(IngestError::Parse {
                    offset: self.offset,
                    message: "unexpected end of file inside a record".to_string(),
                });
            }

            let (used, complete) = scanner.feed(available);
            if self.element.len() + used > self.max_record_bytes {
                return Err(IngestError::Parse {
                    offset: start,
                    message: format!("record exceeds {} bytes", self.max_record_bytes),
                });
            }
            self.element.extend_from_slice(&available[..used]);
            self.reader.consume(used);
            self.offset += used as u64;

            if complete {
                break;
            }
        }

        let value = serde_json::from_slice(&self.element).map_err(|e| IngestError::Parse {
            offset: start,
            message: e.to_string(),
        })?;
        self.position = Position::AfterElement;
        Ok(StreamEvent::Record(value))
    }

    /// Skip whitespace and return the next byte without consuming it
    async fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }
            match available.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(i) => {
                    let next = available[i];
                    self.reader.consume(i);
                    self.offset += i as u64;
                    return Ok(Some(next));
                },
                None => {
                    let skipped = available.len();
                    self.reader.consume(skipped);
                    self.offset += skipped as u64;
                },
            }
        }
    }

    async fn skip_bom(&mut self) -> Result<()> {
        let available = self.reader.fill_buf().await?;
        if available.starts_with(UTF8_BOM) {
            self.reader.consume(UTF8_BOM.len());
            self.offset += UTF8_BOM.len() as u64;
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn error(&self, message: &str) -> IngestError {
        IngestError::Parse {
            offset: self.offset,
            message: message.to_string(),
        }
    }
}
