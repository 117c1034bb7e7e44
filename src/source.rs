//! Excerpts of the expected document for error messages
//!
//! Errors only know the structural path of a failure. A [`SourceNode`] turns
//! that path back into the part of the document it came from.

use std::collections::HashMap;
use std::fmt;

use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, SourceSpan};
use thiserror::Error;
use tracing::debug;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::Marker;

use crate::query::{Query, Segment};

/// Renders the part of a source document a path points at.
pub trait SourceNode: fmt::Debug + Send + Sync {
    /// `None` when the path cannot be located in the document.
    fn excerpt(&self, path: &Query, colored: bool) -> Option<String>;
}

/// Lines of context printed around the offending line.
const CONTEXT_LINES: usize = 2;

/// A YAML document with the position of every node.
#[derive(Debug, Clone)]
pub struct YamlSource {
    text: String,
    documents: Vec<Node>,
    anchors: HashMap<usize, Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Scalar { offset: usize, value: String },
    Sequence { offset: usize, items: Vec<Node> },
    Mapping { offset: usize, entries: Vec<(Node, Node)> },
    Alias { offset: usize, id: usize },
}

impl Node {
    fn offset(&self) -> usize {
        match self {
            Node::Scalar { offset, .. }
            | Node::Sequence { offset, .. }
            | Node::Mapping { offset, .. }
            | Node::Alias { offset, .. } => *offset,
        }
    }
}

/// Collection being filled while parse events arrive.
struct Frame {
    node: Node,
    anchor: usize,
    key: Option<Node>,
}

/// Builds [`Node`] trees from parser events.
struct Builder<'a> {
    /// byte offset of every char, parser markers count chars
    chars: &'a [usize],
    len: usize,
    stack: Vec<Frame>,
    documents: Vec<Node>,
    anchors: HashMap<usize, Node>,
}

impl Builder<'_> {
    fn offset(&self, mark: Marker) -> usize {
        self.chars.get(mark.index()).copied().unwrap_or(self.len)
    }

    fn finish(&mut self, node: Node, anchor: usize) {
        if anchor > 0 {
            self.anchors.insert(anchor, node.clone());
        }
        let Some(top) = self.stack.last_mut() else {
            self.documents.push(node);
            return;
        };
        match &mut top.node {
            Node::Sequence { items, .. } => items.push(node),
            Node::Mapping { entries, .. } => match top.key.take() {
                Some(key) => entries.push((key, node)),
                None => top.key = Some(node),
            },
            _ => {}
        }
    }

    fn close(&mut self) {
        if let Some(frame) = self.stack.pop() {
            self.finish(frame.node, frame.anchor);
        }
    }
}

impl MarkedEventReceiver for Builder<'_> {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        let offset = self.offset(mark);
        match ev {
            Event::Scalar(value, _, anchor, ..) => {
                self.finish(Node::Scalar { offset, value }, anchor)
            }
            Event::Alias(id) => self.finish(Node::Alias { offset, id }, 0),
            Event::SequenceStart(anchor, ..) => self.stack.push(Frame {
                node: Node::Sequence {
                    offset,
                    items: Vec::new(),
                },
                anchor,
                key: None,
            }),
            Event::MappingStart(anchor, ..) => self.stack.push(Frame {
                node: Node::Mapping {
                    offset,
                    entries: Vec::new(),
                },
                anchor,
                key: None,
            }),
            Event::SequenceEnd | Event::MappingEnd => self.close(),
            _ => {}
        }
    }
}

/// Diagnostic carrying only the located span; the message follows it.
#[derive(Debug, Error, Diagnostic)]
#[error("{title}")]
struct Excerpt {
    title: String,
    #[source_code]
    src: String,
    #[label]
    span: SourceSpan,
}

impl YamlSource {
    /// Parse `text`; a document that fails to parse yields no excerpts.
    pub fn new(text: &str) -> Self {
        let chars: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let mut builder = Builder {
            chars: &chars,
            len: text.len(),
            stack: Vec::new(),
            documents: Vec::new(),
            anchors: HashMap::new(),
        };
        if let Err(e) = Parser::new_from_str(text).load(&mut builder, true) {
            debug!(error = %e, "source document is not valid YAML, excerpts disabled");
            builder.documents.clear();
        }
        Self {
            text: text.to_string(),
            documents: builder.documents,
            anchors: builder.anchors,
        }
    }

    fn resolve<'a>(&'a self, node: &'a Node) -> Option<&'a Node> {
        match node {
            Node::Alias { id, .. } => self.anchors.get(id),
            other => Some(other),
        }
    }

    fn find<'a>(&'a self, root: &'a Node, path: &Query) -> Option<usize> {
        let mut node = root;
        let mut offset = None;
        for seg in path.segments() {
            let (at, next) = match (seg, self.resolve(node)?) {
                (Segment::Key(key), Node::Mapping { entries, .. }) => entries
                    .iter()
                    .find(|(k, _)| matches!(k, Node::Scalar { value, .. } if value == key))
                    .map(|(k, v)| (k.offset(), v))?,
                (Segment::Index(i), Node::Sequence { items, .. }) => {
                    let item = items.get(*i)?;
                    (item.offset(), item)
                }
                _ => return None,
            };
            offset = Some(at);
            node = next;
        }
        offset
    }

    /// Span from the node a path points at to the end of its line.
    ///
    /// Map entries point at their key, sequence items at the item itself.
    /// The first document containing the path wins.
    pub fn locate(&self, path: &Query) -> Option<SourceSpan> {
        let offset = self.documents.iter().find_map(|doc| self.find(doc, path))?;
        let rest = &self.text[offset..];
        let len = rest.find('\n').unwrap_or(rest.len());
        Some(SourceSpan::from((offset, rest[..len].trim_end().len())))
    }
}

impl SourceNode for YamlSource {
    fn excerpt(&self, path: &Query, colored: bool) -> Option<String> {
        let span = self.locate(path)?;
        let theme = if colored {
            GraphicalTheme::unicode()
        } else {
            GraphicalTheme::unicode_nocolor()
        };
        let handler = GraphicalReportHandler::new_themed(theme)
            .with_context_lines(CONTEXT_LINES)
            .with_links(false)
            .with_width(120);
        let excerpt = Excerpt {
            title: path.to_string(),
            src: self.text.clone(),
            span,
        };
        let mut out = String::new();
        handler.render_report(&mut out, &excerpt).ok()?;
        Some(out)
    }
}
