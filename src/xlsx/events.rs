// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Push-style adaptor over the quick-xml pull reader.
//!
//! Part parsers implement [`XmlHandler`] and keep their position in the
//! document as a stack of [`State`] frames. A frame remembers the element
//! depth it was entered at and is popped when that element closes.

use std::io::BufRead;

use log::debug;
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use crate::utils::unescape_entity_to_buffer;
use crate::xlsx::XlsxError;

/// Deepest nesting of states any part needs
/// (`Default > SheetData > Row > Cell > CellText`).
pub(crate) const MAX_STATE_DEPTH: usize = 5;

/// Consecutive tokenizer events without an element boundary tolerated
/// before the part is abandoned.
pub(crate) const MAX_EVENTS_WITHOUT_ELEMENT: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Default,
    SharedStringEntry,
    SharedStringText,
    ColumnDefs,
    SheetData,
    Row,
    Cell,
    CellText,
}

impl State {
    /// Element that closes the state, used in truncation errors
    fn element(self) -> &'static str {
        match self {
            State::Default => "",
            State::SharedStringEntry => "si",
            State::SharedStringText => "t",
            State::ColumnDefs => "cols",
            State::SheetData => "sheetData",
            State::Row => "row",
            State::Cell => "c",
            State::CellText => "v",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    state: State,
    depth: usize,
}

/// Bounded stack of parser states
#[derive(Debug)]
pub(crate) struct StateStack {
    frames: Vec<Frame>,
    depth: usize,
}

impl StateStack {
    pub(crate) fn new() -> Self {
        let mut frames = Vec::with_capacity(MAX_STATE_DEPTH);
        frames.push(Frame {
            state: State::Default,
            depth: 0,
        });
        StateStack { frames, depth: 0 }
    }

    pub(crate) fn current(&self) -> State {
        self.frames
            .last()
            .map_or(State::Default, |frame| frame.state)
    }

    /// Enters `state` for the element being opened.
    pub(crate) fn push(&mut self, state: State, element: &[u8]) -> Result<(), XlsxError> {
        if self.frames.len() >= MAX_STATE_DEPTH {
            return Err(XlsxError::StateStackOverflow(
                String::from_utf8_lossy(element).into_owned(),
            ));
        }
        self.frames.push(Frame {
            state,
            depth: self.depth,
        });
        Ok(())
    }

    /// Innermost state still waiting for its closing element
    fn open_state(&self) -> Option<State> {
        self.frames[1..]
            .iter()
            .rev()
            .find(|frame| frame.state != State::Default)
            .map(|frame| frame.state)
    }

    fn open(&mut self) {
        self.depth += 1;
    }

    /// Closes one element, returns the state it ends if any.
    fn close(&mut self) -> Option<State> {
        self.depth = self.depth.saturating_sub(1);
        match self.frames.last() {
            Some(frame) if self.frames.len() > 1 && frame.depth == self.depth => {
                self.frames.pop().map(|frame| frame.state)
            }
            _ => None,
        }
    }
}

/// Callbacks of a part parser
pub(crate) trait XmlHandler {
    /// An element opens. The handler may push a new state on `stack`.
    fn start_element(
        &mut self,
        stack: &mut StateStack,
        e: &BytesStart<'_>,
        decoder: Decoder,
    ) -> Result<(), XlsxError>;

    /// The element that entered `state` closes.
    fn end_element(&mut self, state: State) -> Result<(), XlsxError>;

    /// Character data, entities already resolved.
    fn characters(&mut self, state: State, text: &str);
}

/// Streams a whole part through `handler`.
///
/// `expand_empty_elements` must be set on the reader so that every element
/// produces a start and an end event.
pub(crate) fn drive<B, H>(
    xml: &mut XmlReader<B>,
    handler: &mut H,
    part: &str,
) -> Result<(), XlsxError>
where
    B: BufRead,
    H: XmlHandler,
{
    let mut stack = StateStack::new();
    let mut buf = Vec::with_capacity(1024);
    let mut text = String::new();
    let mut without_element = 0;
    loop {
        buf.clear();
        let event = xml.read_event_into(&mut buf)?;
        match event {
            Event::Start(_) | Event::End(_) | Event::Eof => without_element = 0,
            _ => {
                without_element += 1;
                if without_element > MAX_EVENTS_WITHOUT_ELEMENT {
                    return Err(XlsxError::StallDetected {
                        part: part.to_string(),
                        events: without_element,
                    });
                }
            }
        }
        match event {
            Event::Start(ref e) => {
                handler.start_element(&mut stack, e, xml.decoder())?;
                stack.open();
            }
            Event::End(_) => {
                if let Some(state) = stack.close() {
                    handler.end_element(state)?;
                }
            }
            Event::Text(t) => {
                text.clear();
                text.push_str(&t.xml10_content()?);
                handler.characters(stack.current(), &text);
            }
            Event::CData(t) => {
                text.clear();
                text.push_str(&t.decode()?);
                handler.characters(stack.current(), &text);
            }
            Event::GeneralRef(e) => {
                text.clear();
                unescape_entity_to_buffer(&e, &mut text)?;
                handler.characters(stack.current(), &text);
            }
            Event::Eof => {
                if let Some(state) = stack.open_state() {
                    return Err(XlsxError::XmlEof(state.element()));
                }
                debug!("finished parsing '{part}'");
                return Ok(());
            }
            _ => (),
        }
    }
}
