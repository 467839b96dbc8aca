use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use super::path::ExpandedName;
use super::FeedError;

/// Maximum element nesting accepted from a feed.
const MAX_DEPTH: usize = 256;

/// Default limit for bytes of one not-yet-complete markup construct.
const DEFAULT_MAX_PENDING: usize = 8 * 1024 * 1024; // 8MB

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Materialized subtree of one captured element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: ExpandedName,
    pub children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: ExpandedName) -> Self {
        Self {
            name,
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Text and CDATA content directly inside this element, concatenated.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn footprint(&self) -> usize {
        self.name.footprint()
            + self.text.len()
            + self.children.iter().map(Element::footprint).sum::<usize>()
    }
}

/// A captured element that has just been closed, with its ancestry.
#[derive(Debug)]
pub struct ClosedElement {
    /// Names from the document root down to the element itself.
    pub path: Vec<ExpandedName>,
    pub element: Element,
}

struct OpenElement {
    /// Qualified name as written, for matching the closing tag.
    raw: Vec<u8>,
    name: ExpandedName,
    /// Namespace bindings declared on this element.
    bindings: usize,
}

struct Binding {
    prefix: Option<String>,
    /// `None` for an undeclaration (`xmlns=""`).
    uri: Option<String>,
}

/// Incremental XML tokenizer state.
///
/// Bytes are pushed with [`feed`](Self::feed); [`poll_events`](Self::poll_events)
/// consumes every complete construct and hands back the captured elements that
/// closed. Only the element stack, namespace scopes, the trailing partial
/// markup and the subtree of the item currently being built are retained, so
/// memory is bounded by the largest item rather than by the document.
///
/// Namespaces and nesting are tracked here rather than by the tokenizer,
/// which is re-run over the pending buffer on every poll.
pub struct ParseCursor {
    capture: ExpandedName,
    buffer: Vec<u8>,
    /// Bytes already consumed and discarded, for error positions.
    offset: u64,
    stack: Vec<OpenElement>,
    scopes: Vec<Binding>,
    /// Partially built captured subtree, outermost first.
    building: Vec<Element>,
    max_pending: usize,
}

impl ParseCursor {
    pub fn new(capture: ExpandedName) -> Self {
        Self {
            capture,
            buffer: Vec::new(),
            offset: 0,
            stack: Vec::new(),
            scopes: Vec::new(),
            building: Vec::new(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drains every complete construct from the buffer.
    ///
    /// Incomplete markup at the end of the buffer is kept for the next call.
    pub fn poll_events(&mut self) -> Result<Vec<ClosedElement>, FeedError> {
        let closed = self.drain(false)?;
        if self.buffer.len() > self.max_pending {
            return Err(FeedError::PendingTooLarge(self.max_pending));
        }
        Ok(closed)
    }

    /// Signals end of input, returning any elements closed by the last bytes.
    ///
    /// Fails if an element or a markup construct is left unterminated.
    pub fn finish(&mut self) -> Result<Vec<ClosedElement>, FeedError> {
        let closed = self.drain(true)?;

        if let Some(open) = self.stack.last() {
            return Err(FeedError::Unterminated(open.name.to_string()));
        }
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(FeedError::TruncatedMarkup(self.buffer.len()));
        }
        self.buffer.clear();
        Ok(closed)
    }

    /// Approximate bytes currently retained by the cursor.
    pub fn footprint(&self) -> usize {
        self.buffer.len()
            + self
                .stack
                .iter()
                .map(|o| o.raw.len() + o.name.footprint())
                .sum::<usize>()
            + self
                .scopes
                .iter()
                .map(|b| {
                    b.prefix.as_ref().map_or(0, String::len) + b.uri.as_ref().map_or(0, String::len)
                })
                .sum::<usize>()
            + self.building.iter().map(Element::footprint).sum::<usize>()
    }

    /// Depth of the currently open element stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn drain(&mut self, at_eof: bool) -> Result<Vec<ClosedElement>, FeedError> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut closed = Vec::new();
        let result = self.tokenize(&buffer, at_eof, &mut closed);
        self.buffer = buffer;

        let consumed = result?;
        self.buffer.drain(..consumed);
        self.offset += consumed as u64;
        Ok(closed)
    }

    /// Runs the tokenizer over `input`, returning how many bytes were consumed.
    fn tokenize(
        &mut self,
        input: &[u8],
        at_eof: bool,
        out: &mut Vec<ClosedElement>,
    ) -> Result<usize, FeedError> {
        let mut reader = Reader::from_reader(input);
        // Elements opened in an earlier poll are unknown to this reader; the
        // cursor's own stack matches end tags in `close`.
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut consumed = 0;
        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                // Markup cut by a chunk boundary; resume once more bytes arrive.
                Err(quick_xml::Error::Syntax(_)) if !at_eof => break,
                Err(e) => {
                    return Err(FeedError::Xml {
                        position: self.offset + reader.error_position() as u64,
                        message: e.to_string(),
                    })
                }
            };
            let end = reader.buffer_position() as usize;
            let position = self.offset + consumed as u64;

            match event {
                Event::Eof => break,
                // Text running into the end of the buffer may continue in the next chunk.
                Event::Text(_) if end >= input.len() && !at_eof => break,
                Event::Start(start) => self.open(&start, position)?,
                Event::Empty(start) => {
                    self.open(&start, position)?;
                    self.close(start.name(), out)?;
                }
                Event::End(end_tag) => self.close(end_tag.name(), out)?,
                Event::Text(text) => {
                    if let Some(current) = self.building.last_mut() {
                        let text = text.unescape().map_err(|e| xml_error(position, e))?;
                        current.text.push_str(&text);
                    }
                }
                Event::CData(cdata) => {
                    if let Some(current) = self.building.last_mut() {
                        let text = utf8(&cdata, position)?;
                        current.text.push_str(text);
                    }
                }
                _ => {}
            }
            consumed = end;
        }
        Ok(consumed)
    }

    /// Pushes an element that starts at absolute byte `position`.
    fn open(&mut self, start: &BytesStart<'_>, position: u64) -> Result<(), FeedError> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(FeedError::MaxDepthExceeded(MAX_DEPTH));
        }

        let mut bindings = 0;
        for attr in start.attributes() {
            let attr = attr.map_err(|e| xml_error(position, e))?;
            let key = attr.key.as_ref();
            let prefix = if key == b"xmlns" {
                None
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                Some(utf8(prefix, position)?.to_string())
            } else {
                continue;
            };
            let value = attr.unescape_value().map_err(|e| xml_error(position, e))?;
            self.scopes.push(Binding {
                prefix,
                uri: (!value.is_empty()).then(|| value.into_owned()),
            });
            bindings += 1;
        }

        let name = self.expand(start.name(), position)?;
        if !self.building.is_empty() || name == self.capture {
            self.building.push(Element::new(name.clone()));
        }
        self.stack.push(OpenElement {
            raw: start.name().as_ref().to_vec(),
            name,
            bindings,
        });
        Ok(())
    }

    fn close(&mut self, raw: QName<'_>, out: &mut Vec<ClosedElement>) -> Result<(), FeedError> {
        let found = || String::from_utf8_lossy(raw.as_ref()).into_owned();
        let open = self
            .stack
            .pop()
            .ok_or_else(|| FeedError::UnexpectedEnd(found()))?;
        if open.raw != raw.as_ref() {
            return Err(FeedError::MismatchedEnd {
                expected: String::from_utf8_lossy(&open.raw).into_owned(),
                found: found(),
            });
        }
        self.scopes.truncate(self.scopes.len() - open.bindings);

        if let Some(element) = self.building.pop() {
            match self.building.last_mut() {
                Some(parent) => parent.children.push(element),
                None => {
                    let mut path: Vec<ExpandedName> =
                        self.stack.iter().map(|o| o.name.clone()).collect();
                    path.push(open.name);
                    out.push(ClosedElement { path, element });
                }
            }
        }
        Ok(())
    }

    fn expand(&self, name: QName<'_>, position: u64) -> Result<ExpandedName, FeedError> {
        let local = utf8(name.local_name().into_inner(), position)?;
        let prefix = name
            .prefix()
            .map(|p| utf8(p.into_inner(), position))
            .transpose()?;

        let binding = self
            .scopes
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == prefix);

        let namespace = match (prefix, binding) {
            (_, Some(binding)) => binding.uri.as_deref(),
            (None, None) => None,
            (Some("xml"), None) => Some(XML_NAMESPACE),
            (Some(prefix), None) => return Err(FeedError::UnboundPrefix(prefix.to_string())),
        };
        Ok(ExpandedName::new(namespace, local))
    }
}

fn xml_error(position: u64, e: impl std::fmt::Display) -> FeedError {
    FeedError::Xml {
        position,
        message: e.to_string(),
    }
}

fn utf8(bytes: &[u8], position: u64) -> Result<&str, FeedError> {
    std::str::from_utf8(bytes).map_err(|e| xml_error(position, e))
}
