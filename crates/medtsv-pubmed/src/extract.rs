//! Streaming record extraction from PubMed XML
//!
//! Two layers. Framing scans the decompressed byte stream for
//! `<PubmedArticle` ... `</PubmedArticle>` and buffers one record at a time:
//!
//! ```text
//! Seeking --<PubmedArticle--> InRecord --</PubmedArticle--> Seeking
//!                                |
//!                                +--<PubmedArticle--> (drop) InRecord
//! ```
//!
//! Each framed record is then tokenized by quick-xml, and a small state
//! machine keeps only the handful of fields that end up in a row:
//!
//! ```text
//! SeekingField --<field>--> InField(kind) --</field>--> SeekingField
//! ```
//!
//! Records are yielded as soon as their closing tag is seen, so memory stays
//! bounded by the largest record (capped at 16 MiB) rather than the file.
//! Input may arrive in arbitrarily small pieces.
//!
//! Malformed records (a new record opening before the previous one closed,
//! input ending inside a record, a field closed by the wrong tag, tokenizer
//! errors such as an unclosed comment or quote) are dropped and counted. A
//! tokenizer error never reaches past its own record, so scanning always
//! resumes at the next `<PubmedArticle`.

use std::io::{self, BufRead, Read};
use std::iter::FusedIterator;

use quick_xml::Reader;
use quick_xml::events::{BytesText, Event};

use crate::target::FetchTarget;

/// Record boundary element
const RECORD_TAG: &[u8] = b"PubmedArticle";

/// Records larger than this are dropped as malformed
const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Longest tag name read while looking for record boundaries
const MAX_TAG_HEAD: usize = 64;

/// Identifier derived from where the record sits, not from its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub year_tag: u16,
    pub sequence: u32,
    /// 1-based position among records emitted from this file
    pub position: u64,
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}n{:04}_{:06}",
            self.year_tag, self.sequence, self.position
        )
    }
}

/// One extracted bibliographic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    /// Surnames in document order, duplicates kept
    pub authors: Vec<String>,
    pub year: Option<u16>,
    pub title: Option<String>,
    /// All abstract sections joined by a single space
    pub abstract_text: Option<String>,
}

/// Counters for one extraction pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub records: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Surname,
    Year,
    MedlineDate,
    Title,
    Abstract,
}

impl FieldKind {
    fn tag(self) -> &'static [u8] {
        match self {
            Self::Surname => b"LastName",
            Self::Year => b"Year",
            Self::MedlineDate => b"MedlineDate",
            Self::Title => b"ArticleTitle",
            Self::Abstract => b"AbstractText",
        }
    }
}

/// Text of the field being read; `depth` counts nested inline elements
#[derive(Debug)]
struct Capture {
    kind: FieldKind,
    depth: u32,
    text: String,
}

/// Fields collected so far for the open record
#[derive(Debug, Default)]
struct Draft {
    authors: Vec<String>,
    year: Option<u16>,
    title: Option<String>,
    abstract_parts: Vec<String>,
    in_author: bool,
    in_pub_date: bool,
    capture: Option<Capture>,
    broken: bool,
}

/// Completed draft, waiting for its identifier
struct Fields {
    authors: Vec<String>,
    year: Option<u16>,
    title: Option<String>,
    abstract_text: Option<String>,
}

impl Draft {
    fn open(&mut self, name: &[u8]) {
        if let Some(capture) = self.capture.as_mut() {
            capture.depth += 1;
            return;
        }
        match name {
            b"Author" => self.in_author = true,
            b"PubDate" => self.in_pub_date = true,
            b"LastName" if self.in_author => self.begin(FieldKind::Surname),
            b"Year" if self.in_pub_date => self.begin(FieldKind::Year),
            b"MedlineDate" if self.in_pub_date => self.begin(FieldKind::MedlineDate),
            b"ArticleTitle" => self.begin(FieldKind::Title),
            b"AbstractText" => self.begin(FieldKind::Abstract),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        if let Some(capture) = self.capture.as_mut() {
            if capture.depth > 0 {
                capture.depth -= 1;
                return;
            }
        }
        if let Some(capture) = self.capture.take() {
            if name == capture.kind.tag() {
                self.commit(capture);
            } else {
                self.broken = true;
            }
            return;
        }
        match name {
            b"Author" => self.in_author = false,
            b"PubDate" => self.in_pub_date = false,
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
    }

    fn begin(&mut self, kind: FieldKind) {
        self.capture = Some(Capture {
            kind,
            depth: 0,
            text: String::new(),
        });
    }

    fn commit(&mut self, capture: Capture) {
        let text = capture.text.trim();
        match capture.kind {
            FieldKind::Surname => {
                if !text.is_empty() {
                    self.authors.push(text.to_string());
                }
            }
            FieldKind::Year => {
                if self.year.is_none() {
                    self.year = text.parse().ok();
                }
            }
            FieldKind::MedlineDate => {
                if self.year.is_none() {
                    self.year = first_year(text);
                }
            }
            FieldKind::Title => {
                if self.title.is_none() {
                    self.title = Some(text.to_string());
                }
            }
            FieldKind::Abstract => {
                if !text.is_empty() {
                    self.abstract_parts.push(text.to_string());
                }
            }
        }
    }

    /// `None` if the record cannot be trusted
    fn finish(self) -> Option<Fields> {
        if self.broken || self.capture.is_some() {
            return None;
        }
        let abstract_text = if self.abstract_parts.is_empty() {
            None
        } else {
            Some(self.abstract_parts.join(" "))
        };
        Some(Fields {
            authors: self.authors,
            year: self.year,
            title: self.title,
            abstract_text,
        })
    }
}

/// First run of four digits, e.g. `1998 Dec-1999 Jan` -> 1998
fn first_year(text: &str) -> Option<u16> {
    let bytes = text.as_bytes();
    let start = bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))?;
    text[start..start + 4].parse().ok()
}

fn unescape_lossy(text: &BytesText<'_>) -> String {
    match text.unescape() {
        Ok(s) => s.into_owned(),
        // Unknown entity or bad escape: keep the raw text rather than lose the field
        Err(_) => String::from_utf8_lossy(text).into_owned(),
    }
}

/// Where a `<` starts, as far as record framing cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Open,
    Close,
    Other,
}

fn classify(head: &[u8]) -> Boundary {
    match head.strip_prefix(b"/") {
        Some(name) if name == RECORD_TAG => Boundary::Close,
        None if head == RECORD_TAG => Boundary::Open,
        _ => Boundary::Other,
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'.' | b'-')
}

/// Consume input up to and including the next `<`. `false` at end of input.
fn skip_past_lt<R: BufRead>(input: &mut R, offset: &mut u64) -> io::Result<bool> {
    loop {
        let available = match input.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(false);
        }
        let (used, found) = match available.iter().position(|&b| b == b'<') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        input.consume(used);
        *offset += used as u64;
        if found {
            return Ok(true);
        }
    }
}

/// Read the tag name following a `<` (with its leading `/`, if any) into
/// `head`, leaving the byte that ends it unread.
fn read_tag_head<R: BufRead>(input: &mut R, head: &mut Vec<u8>, offset: &mut u64) -> io::Result<()> {
    head.clear();
    loop {
        let available = match input.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(());
        }
        let mut used = 0;
        let mut ended = false;
        for &b in available {
            let accepted = is_name_byte(b) || (b == b'/' && head.is_empty());
            if !accepted || head.len() >= MAX_TAG_HEAD {
                ended = true;
                break;
            }
            head.push(b);
            used += 1;
        }
        input.consume(used);
        *offset += used as u64;
        if ended {
            return Ok(());
        }
    }
}

/// Tokenize one framed record. `Err` says why it was rejected.
fn parse_record(bytes: &[u8]) -> Result<Fields, String> {
    let mut reader = Reader::from_reader(bytes);
    let config = reader.config_mut();
    config.trim_text(false);
    // Mismatched field tags are judged by the draft, not the tokenizer
    config.check_end_names = false;

    let mut draft = Draft::default();
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                if e.name().as_ref() != RECORD_TAG {
                    draft.open(e.name().as_ref());
                }
            }
            Event::End(e) if e.name().as_ref() == RECORD_TAG => {
                return draft
                    .finish()
                    .ok_or_else(|| "unbalanced fields".to_string());
            }
            Event::End(e) => draft.close(e.name().as_ref()),
            Event::Text(e) => draft.text(&unescape_lossy(&e)),
            Event::CData(e) => draft.text(&String::from_utf8_lossy(&e)),
            Event::Eof => return Err("record ended early".to_string()),
            _ => {}
        }
    }
}

/// Lazy, single-pass iterator of records over a decompressed XML stream.
///
/// Yields `Err` once if the underlying stream fails (truncated or corrupt
/// archive) and ends afterwards.
pub struct RecordExtractor<R: BufRead> {
    input: R,
    /// Raw bytes of the record being framed
    record: Vec<u8>,
    head: Vec<u8>,
    /// Bytes consumed so far, for diagnostics
    offset: u64,
    target: FetchTarget,
    stats: ExtractStats,
    finished: bool,
}

impl<R: BufRead> RecordExtractor<R> {
    pub fn new(input: R, target: FetchTarget) -> Self {
        Self {
            input,
            record: Vec::with_capacity(16 * 1024),
            head: Vec::with_capacity(MAX_TAG_HEAD),
            offset: 0,
            target,
            stats: ExtractStats::default(),
            finished: false,
        }
    }

    /// Counters so far (final once the iterator is exhausted)
    pub fn stats(&self) -> ExtractStats {
        self.stats
    }

    fn begin_record(&mut self) {
        self.record.clear();
        self.record.push(b'<');
        self.record.extend_from_slice(RECORD_TAG);
    }

    fn drop_record(&mut self, reason: &str) {
        self.stats.malformed += 1;
        self.record.clear();
        log::debug!(
            "{}: dropping malformed record near byte {}: {reason}",
            self.target.label(),
            self.offset
        );
    }

    /// Fill `self.record` with the next complete `<PubmedArticle>` element.
    /// `false` once input is exhausted.
    fn next_frame(&mut self) -> io::Result<bool> {
        let mut in_record = false;
        loop {
            if !in_record {
                if !skip_past_lt(&mut self.input, &mut self.offset)? {
                    return Ok(false);
                }
                read_tag_head(&mut self.input, &mut self.head, &mut self.offset)?;
                if classify(&self.head) == Boundary::Open {
                    self.begin_record();
                    in_record = true;
                }
                continue;
            }

            let room = (MAX_RECORD_BYTES + 1).saturating_sub(self.record.len()) as u64;
            let n = (&mut self.input)
                .take(room)
                .read_until(b'<', &mut self.record)?;
            self.offset += n as u64;
            if n == 0 || self.record.last() != Some(&b'<') {
                if self.record.len() > MAX_RECORD_BYTES {
                    self.drop_record("record too large");
                    in_record = false;
                    continue;
                }
                self.drop_record("input ended inside record");
                return Ok(false);
            }

            read_tag_head(&mut self.input, &mut self.head, &mut self.offset)?;
            self.record.extend_from_slice(&self.head);
            match classify(&self.head) {
                // The rest of the end tag is skipped while seeking the next record
                Boundary::Close => {
                    self.record.push(b'>');
                    return Ok(true);
                }
                Boundary::Open => {
                    self.drop_record("record opened before previous one closed");
                    self.begin_record();
                }
                Boundary::Other => {}
            }
        }
    }

    fn next_record(&mut self) -> io::Result<Option<Record>> {
        while self.next_frame()? {
            match parse_record(&self.record) {
                Ok(fields) => {
                    self.stats.records += 1;
                    return Ok(Some(Record {
                        id: RecordId {
                            year_tag: self.target.year_tag,
                            sequence: self.target.sequence,
                            position: self.stats.records,
                        },
                        authors: fields.authors,
                        year: fields.year,
                        title: fields.title,
                        abstract_text: fields.abstract_text,
                    }));
                }
                Err(reason) => self.drop_record(&reason),
            }
        }
        Ok(None)
    }
}

impl<R: BufRead> Iterator for RecordExtractor<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for RecordExtractor<R> {}
