use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::trace;

use crate::attributes::{Attribute, Attributes};
use crate::err::{Result, TapeError};
use crate::locator::Locator;
use crate::receiver::XmlReceiver;

// Event tags, one byte per recorded event.
const START_DOCUMENT: u8 = 0x00;
const END_DOCUMENT: u8 = 0x01;
const START_ELEMENT: u8 = 0x02;
const END_ELEMENT: u8 = 0x03;
const CHARACTERS: u8 = 0x04;
const IGNORABLE_WHITESPACE: u8 = 0x05;
const PROCESSING_INSTRUCTION: u8 = 0x06;
const COMMENT: u8 = 0x07;
const START_PREFIX_MAPPING: u8 = 0x08;
const END_PREFIX_MAPPING: u8 = 0x09;
const SKIPPED_ENTITY: u8 = 0x0A;
const START_ENTITY: u8 = 0x0B;
const END_ENTITY: u8 = 0x0C;
const START_CDATA: u8 = 0x0D;
const END_CDATA: u8 = 0x0E;

fn is_event_tag(value: u8) -> bool {
    value <= END_CDATA
}

// Prefix mappings are the only events recorded without location data.
fn event_has_location(tag: u8) -> bool {
    !matches!(tag, START_PREFIX_MAPPING | END_PREFIX_MAPPING)
}

/// An immutable cursor into a [`SaxTape`].
///
/// A mark captures every append position needed to resume decoding, so a
/// suffix of the tape can be replayed independently of the rest. Create one
/// with [`SaxTape::mark`] strictly *before* the start-element event it is
/// meant to cover; replaying such a mark delivers exactly that element and
/// its subtree. A mark whose first event is anything else replays to the
/// physical end of the tape.
///
/// Offsets are only meaningful against the tape that created the mark; they
/// survive a serialization round trip of that tape, but not [`SaxTape::clear`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    id: Option<String>,
    event_pos: usize,
    text_pos: usize,
    int_pos: usize,
    line_pos: usize,
    system_id_pos: usize,
    attribute_count_pos: usize,
    string_pos: usize,
}

impl Mark {
    const START: Mark = Mark {
        id: None,
        event_pos: 0,
        text_pos: 0,
        int_pos: 0,
        line_pos: 0,
        system_id_pos: 0,
        attribute_count_pos: 0,
        string_pos: 0,
    };

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// A compact, replayable recording of a SAX event stream.
///
/// Events are not materialized: each one is encoded across a set of parallel
/// buffers (a tag per event, plus text, small integers, source positions,
/// system ids, attribute counts and a shared string table). The buffers are
/// mutually synchronized by event order, so decoding mirrors encoding
/// exactly, per event kind.
///
/// A tape is itself an [`XmlReceiver`]: feed it events to record them. With a
/// downstream receiver attached it acts as a tee, recording and forwarding.
/// [`replay`](Self::replay) reproduces the original call sequence against any
/// receiver, any number of times.
pub struct SaxTape {
    events: Vec<u8>,
    text: String,
    ints: Vec<u32>,
    // (line, column) pairs; 0 encodes "unknown".
    lines: Vec<u32>,
    system_ids: Vec<Option<Rc<str>>>,
    attribute_counts: Vec<u32>,
    strings: Vec<String>,
    attribute_total: u64,
    has_locator: bool,
    public_id: Option<String>,
    // Used only while recording; dropped when the document ends.
    locator: Option<Rc<dyn Locator>>,
    marks: Vec<Mark>,
    downstream: Option<Box<dyn XmlReceiver>>,
}

impl Default for SaxTape {
    fn default() -> Self {
        SaxTape::new()
    }
}

impl SaxTape {
    pub fn new() -> Self {
        SaxTape {
            events: Vec::new(),
            text: String::new(),
            ints: Vec::new(),
            lines: Vec::new(),
            system_ids: Vec::new(),
            attribute_counts: Vec::new(),
            strings: Vec::new(),
            attribute_total: 0,
            has_locator: false,
            public_id: None,
            locator: None,
            marks: Vec::new(),
            downstream: None,
        }
    }

    /// A tape that also forwards every received event to `downstream`.
    pub fn with_downstream(downstream: Box<dyn XmlReceiver>) -> Self {
        let mut tape = SaxTape::new();
        tape.downstream = Some(downstream);
        tape
    }

    pub fn set_downstream(&mut self, downstream: Option<Box<dyn XmlReceiver>>) {
        self.downstream = downstream;
    }

    pub fn into_downstream(self) -> Option<Box<dyn XmlReceiver>> {
        self.downstream
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether a locator was attached while recording, meaning replay will
    /// deliver per-event source positions.
    pub fn has_location_info(&self) -> bool {
        self.has_locator
    }

    /// The first public id reported by the recording locator, if any.
    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    /// Total number of attributes recorded across all start-element events.
    pub fn recorded_attribute_count(&self) -> u64 {
        self.attribute_total
    }

    /// Every mark created on this tape, in creation order. Marks survive
    /// serialization; restored tapes answer the same list.
    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    /// Captures the current append position as a replayable [`Mark`].
    ///
    /// Must be called *before* the start-element event that is to become the
    /// mark's first replayed event.
    pub fn mark(&mut self, id: Option<&str>) -> Mark {
        let mark = Mark {
            id: id.map(str::to_string),
            event_pos: self.events.len(),
            text_pos: self.text.len(),
            int_pos: self.ints.len(),
            line_pos: self.lines.len(),
            system_id_pos: self.system_ids.len(),
            attribute_count_pos: self.attribute_counts.len(),
            string_pos: self.strings.len(),
        };
        trace!(
            "mark {:?} at event {}",
            mark.id,
            mark.event_pos
        );
        self.marks.push(mark.clone());
        mark
    }

    /// Resets the tape to the empty state, as if newly constructed. All
    /// previously issued marks become invalid. A downstream receiver, if
    /// any, is kept.
    pub fn clear(&mut self) {
        self.events.clear();
        self.text.clear();
        self.ints.clear();
        self.lines.clear();
        self.system_ids.clear();
        self.attribute_counts.clear();
        self.strings.clear();
        self.attribute_total = 0;
        self.has_locator = false;
        self.public_id = None;
        self.locator = None;
        self.marks.clear();
    }

    /// Best-effort estimate of the memory held by the tape, in bytes. Useful
    /// for cache accounting, not byte-exact.
    pub fn approximate_size(&self) -> u64 {
        let mut size = self.events.len() as u64;
        size += self.text.len() as u64;
        size += (self.ints.len() as u64) * 4;
        size += (self.lines.len() as u64) * 4;

        // Consecutive entries usually point at the same id; count runs once.
        let mut previous: Option<&Rc<str>> = None;
        for system_id in self.system_ids.iter().flatten() {
            if previous.is_none_or(|p| !Rc::ptr_eq(p, system_id)) {
                size += system_id.len() as u64;
            }
            previous = Some(system_id);
        }

        size += (self.attribute_counts.len() as u64) * 4;

        let mut previous: Option<&String> = None;
        for string in &self.strings {
            if previous != Some(string) {
                size += string.len() as u64;
            }
            previous = Some(string);
        }

        size
    }

    /// Replays the whole tape against `receiver`, reproducing the original
    /// call sequence. An empty tape is a no-op; no document events are
    /// synthesized.
    pub fn replay(&self, receiver: &mut dyn XmlReceiver) -> Result<()> {
        self.replay_events(receiver, &Mark::START, false)
    }

    /// Replays the tape starting at `mark`.
    ///
    /// When the event at the mark is a start-element, replay stops right
    /// after the matching end-element at the same depth: the mark delimits
    /// one element and its subtree, not everything to the end of the tape.
    /// For any other marked event, replay runs to the physical end. A mark
    /// positioned at the end of the tape replays nothing.
    pub fn replay_from(&self, mark: &Mark, receiver: &mut dyn XmlReceiver) -> Result<()> {
        let element_scoped = self.events.get(mark.event_pos).copied() == Some(START_ELEMENT);
        self.replay_events(receiver, mark, element_scoped)
    }

    fn replay_events(
        &self,
        receiver: &mut dyn XmlReceiver,
        mark: &Mark,
        element_scoped: bool,
    ) -> Result<()> {
        let mut event_pos = mark.event_pos;
        let mut text_pos = mark.text_pos;
        let mut int_pos = mark.int_pos;
        let mut line_pos = mark.line_pos;
        let mut system_id_pos = mark.system_id_pos;
        let mut string_pos = mark.string_pos;
        let mut attribute_count_pos = mark.attribute_count_pos;

        trace!(
            "replaying {} events starting at event {}",
            self.events.len() - event_pos.min(self.events.len()),
            event_pos
        );

        let cursor = if self.has_locator {
            let cursor = Rc::new(ReplayCursor {
                public_id: self.public_id.clone(),
                ..ReplayCursor::default()
            });
            receiver.set_document_locator(Rc::clone(&cursor) as Rc<dyn Locator>);
            Some(cursor)
        } else {
            None
        };

        let mut attributes = Attributes::new();
        let mut element_level: i64 = 0;

        while event_pos < self.events.len() {
            let tag = self.events[event_pos];
            let has_location = self.has_locator && event_has_location(tag);

            if let Some(cursor) = &cursor {
                let line = self.lines.get(line_pos).copied().filter(|&v| v != 0);
                let column = self.lines.get(line_pos + 1).copied().filter(|&v| v != 0);
                let system_id = self.system_ids.get(system_id_pos).and_then(|s| s.as_ref());
                cursor.load(line, column, system_id);
            }

            match tag {
                START_DOCUMENT => receiver.start_document()?,
                END_DOCUMENT => receiver.end_document()?,
                START_ELEMENT => {
                    let uri = self.decoded_string(&mut string_pos)?;
                    let local_name = self.decoded_string(&mut string_pos)?;
                    let qname = self.decoded_string(&mut string_pos)?;
                    attributes.clear();
                    let count = self.decoded_attribute_count(&mut attribute_count_pos)?;
                    for _ in 0..count {
                        attributes.push(Attribute {
                            uri: self.decoded_string(&mut string_pos)?.to_string(),
                            local_name: self.decoded_string(&mut string_pos)?.to_string(),
                            qname: self.decoded_string(&mut string_pos)?.to_string(),
                            kind: self.decoded_string(&mut string_pos)?.to_string(),
                            value: self.decoded_string(&mut string_pos)?.to_string(),
                        });
                    }
                    receiver.start_element(uri, local_name, qname, &attributes)?;
                    element_level += 1;
                }
                END_ELEMENT => {
                    element_level -= 1;
                    let uri = self.decoded_string(&mut string_pos)?;
                    let local_name = self.decoded_string(&mut string_pos)?;
                    let qname = self.decoded_string(&mut string_pos)?;
                    receiver.end_element(uri, local_name, qname)?;

                    if element_scoped && element_level == 0 {
                        // Back at the mark's depth: the subtree is complete.
                        break;
                    }
                }
                CHARACTERS => {
                    let length = self.decoded_int(&mut int_pos)? as usize;
                    receiver.characters(self.decoded_text(&mut text_pos, length)?)?;
                }
                IGNORABLE_WHITESPACE => {
                    let length = self.decoded_int(&mut int_pos)? as usize;
                    receiver.ignorable_whitespace(self.decoded_text(&mut text_pos, length)?)?;
                }
                PROCESSING_INSTRUCTION => {
                    let target = self.decoded_string(&mut string_pos)?;
                    let data = self.decoded_string(&mut string_pos)?;
                    receiver.processing_instruction(target, data)?;
                }
                COMMENT => {
                    let length = self.decoded_int(&mut int_pos)? as usize;
                    receiver.comment(self.decoded_text(&mut text_pos, length)?)?;
                }
                START_PREFIX_MAPPING => {
                    let prefix = self.decoded_string(&mut string_pos)?;
                    let uri = self.decoded_string(&mut string_pos)?;
                    receiver.start_prefix_mapping(prefix, uri)?;
                }
                END_PREFIX_MAPPING => {
                    receiver.end_prefix_mapping(self.decoded_string(&mut string_pos)?)?;
                }
                SKIPPED_ENTITY => {
                    receiver.skipped_entity(self.decoded_string(&mut string_pos)?)?;
                }
                START_ENTITY => {
                    receiver.start_entity(self.decoded_string(&mut string_pos)?)?;
                }
                END_ENTITY => {
                    receiver.end_entity(self.decoded_string(&mut string_pos)?)?;
                }
                START_CDATA => receiver.start_cdata()?,
                END_CDATA => receiver.end_cdata()?,
                value => {
                    return Err(TapeError::InvalidEventTag {
                        value,
                        index: event_pos,
                    }
                    .into());
                }
            }

            event_pos += 1;
            if has_location {
                line_pos += 2;
                system_id_pos += 1;
            }
        }

        // Leave the cursor on whatever the positions point at now: past the
        // end after a full replay (queries answer `None`), or the stopping
        // end-element after an element-scoped one.
        if let Some(cursor) = &cursor {
            let line = self.lines.get(line_pos).copied().filter(|&v| v != 0);
            let column = self.lines.get(line_pos + 1).copied().filter(|&v| v != 0);
            let system_id = self.system_ids.get(system_id_pos).and_then(|s| s.as_ref());
            cursor.load(line, column, system_id);
        }

        Ok(())
    }

    fn decoded_string(&self, pos: &mut usize) -> std::result::Result<&str, TapeError> {
        let string = self.strings.get(*pos).ok_or_else(|| {
            TapeError::corrupt(
                "strings",
                format!("index {} beyond {} entries", pos, self.strings.len()),
            )
        })?;
        *pos += 1;
        Ok(string)
    }

    fn decoded_int(&self, pos: &mut usize) -> std::result::Result<u32, TapeError> {
        let value = self.ints.get(*pos).copied().ok_or_else(|| {
            TapeError::corrupt(
                "ints",
                format!("index {} beyond {} entries", pos, self.ints.len()),
            )
        })?;
        *pos += 1;
        Ok(value)
    }

    fn decoded_attribute_count(&self, pos: &mut usize) -> std::result::Result<u32, TapeError> {
        let value = self.attribute_counts.get(*pos).copied().ok_or_else(|| {
            TapeError::corrupt(
                "attribute-counts",
                format!("index {} beyond {} entries", pos, self.attribute_counts.len()),
            )
        })?;
        *pos += 1;
        Ok(value)
    }

    fn decoded_text(
        &self,
        pos: &mut usize,
        length: usize,
    ) -> std::result::Result<&str, TapeError> {
        let end = pos.checked_add(length).ok_or_else(|| {
            TapeError::corrupt("text", format!("run of {length} bytes overflows"))
        })?;
        let slice = self.text.get(*pos..end).ok_or_else(|| {
            TapeError::corrupt(
                "text",
                format!(
                    "run {}..{} beyond {} buffered bytes",
                    pos,
                    end,
                    self.text.len()
                ),
            )
        })?;
        *pos = end;
        Ok(slice)
    }

    // -- recording ---------------------------------------------------------

    fn record_event(&mut self, tag: u8) -> std::result::Result<(), TapeError> {
        grow(&mut self.events, 1)?;
        self.events.push(tag);
        Ok(())
    }

    fn record_string(&mut self, value: &str) -> std::result::Result<(), TapeError> {
        grow(&mut self.strings, 1)?;
        self.strings.push(value.to_string());
        Ok(())
    }

    fn record_int(&mut self, value: u32) -> std::result::Result<(), TapeError> {
        grow(&mut self.ints, 1)?;
        self.ints.push(value);
        Ok(())
    }

    fn record_text(&mut self, text: &str) -> std::result::Result<(), TapeError> {
        self.text
            .try_reserve(text.len())
            .map_err(|_| TapeError::Allocation {
                additional: text.len(),
            })?;
        self.text.push_str(text);
        self.record_int(text.len() as u32)
    }

    fn record_location(&mut self) -> std::result::Result<(), TapeError> {
        if let Some(locator) = self.locator.clone() {
            grow(&mut self.lines, 2)?;
            self.lines.push(locator.line().unwrap_or(0));
            self.lines.push(locator.column().unwrap_or(0));
            self.record_system_id(locator.system_id())?;
        }
        Ok(())
    }

    fn record_system_id(
        &mut self,
        system_id: Option<String>,
    ) -> std::result::Result<(), TapeError> {
        let entry = system_id.map(|id| {
            // Reuse the previous allocation when the id has not changed,
            // which is the common case within one document.
            match self.system_ids.last().and_then(|s| s.as_ref()) {
                Some(previous) if **previous == *id => Rc::clone(previous),
                _ => Rc::from(id),
            }
        });
        grow(&mut self.system_ids, 1)?;
        self.system_ids.push(entry);
        Ok(())
    }

    fn record_attributes(&mut self, attributes: &Attributes) -> std::result::Result<(), TapeError> {
        grow(&mut self.attribute_counts, 1)?;
        self.attribute_counts.push(attributes.len() as u32);
        self.attribute_total += attributes.len() as u64;
        for attribute in attributes {
            self.record_string(&attribute.uri)?;
            self.record_string(&attribute.local_name)?;
            self.record_string(&attribute.qname)?;
            self.record_string(&attribute.kind)?;
            self.record_string(&attribute.value)?;
        }
        Ok(())
    }

    // -- serialization -----------------------------------------------------

    /// Writes the tape to its persisted byte form: every buffer, the
    /// location flag, the first seen public id, and all marks.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, "events", self.events.len())?;
        writer.write_all(&self.events)?;

        write_string(writer, "text", &self.text)?;

        write_u32_section(writer, "ints", &self.ints)?;
        write_u32_section(writer, "lines", &self.lines)?;

        write_len(writer, "system-ids", self.system_ids.len())?;
        for system_id in &self.system_ids {
            // Empty string stands for "no system id".
            write_string(writer, "system-ids", system_id.as_deref().unwrap_or(""))?;
        }

        write_u32_section(writer, "attribute-counts", &self.attribute_counts)?;

        write_len(writer, "strings", self.strings.len())?;
        for string in &self.strings {
            write_string(writer, "strings", string)?;
        }

        writer.write_u8(u8::from(self.has_locator))?;
        write_string(writer, "public-id", self.public_id.as_deref().unwrap_or(""))?;

        write_len(writer, "marks", self.marks.len())?;
        for mark in &self.marks {
            write_string(writer, "marks", mark.id.as_deref().unwrap_or(""))?;
            for offset in [
                mark.event_pos,
                mark.text_pos,
                mark.int_pos,
                mark.line_pos,
                mark.system_id_pos,
                mark.attribute_count_pos,
                mark.string_pos,
            ] {
                write_len(writer, "marks", offset)?;
            }
        }

        Ok(())
    }

    /// Reads a tape back from the byte form produced by
    /// [`write_to`](Self::write_to). Marks are restored along with the
    /// buffers, so previously created marks replay the same sub-sequences.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<SaxTape> {
        let event_count = read_len(reader, "events")?;
        let mut events = Vec::new();
        grow(&mut events, event_count)?;
        events.resize(event_count, 0);
        reader.read_exact(&mut events).map_err(TapeError::from)?;
        for (index, &value) in events.iter().enumerate() {
            if !is_event_tag(value) {
                return Err(TapeError::InvalidEventTag { value, index }.into());
            }
        }

        let text_len = read_len(reader, "text")?;
        let mut text_bytes = Vec::new();
        grow(&mut text_bytes, text_len)?;
        text_bytes.resize(text_len, 0);
        reader.read_exact(&mut text_bytes).map_err(TapeError::from)?;
        let text = String::from_utf8(text_bytes).map_err(TapeError::from)?;

        let ints = read_u32_section(reader, "ints")?;
        let lines = read_u32_section(reader, "lines")?;

        let system_id_count = read_len(reader, "system-ids")?;
        let mut system_ids: Vec<Option<Rc<str>>> = Vec::new();
        grow(&mut system_ids, system_id_count)?;
        for _ in 0..system_id_count {
            let id = read_string(reader, "system-ids")?;
            let entry = if id.is_empty() {
                None
            } else {
                match system_ids.last().and_then(|s| s.as_ref()) {
                    Some(previous) if **previous == *id => Some(Rc::clone(previous)),
                    _ => Some(Rc::from(id)),
                }
            };
            system_ids.push(entry);
        }

        let attribute_counts = read_u32_section(reader, "attribute-counts")?;
        let attribute_total = attribute_counts.iter().map(|&count| u64::from(count)).sum();

        let string_count = read_len(reader, "strings")?;
        let mut strings = Vec::new();
        grow(&mut strings, string_count)?;
        for _ in 0..string_count {
            strings.push(read_string(reader, "strings")?);
        }

        let has_locator = reader.read_u8().map_err(TapeError::from)? != 0;
        let public_id = non_empty(read_string(reader, "public-id")?);

        let mark_count = read_len(reader, "marks")?;
        let mut marks = Vec::new();
        grow(&mut marks, mark_count)?;
        for _ in 0..mark_count {
            let id = non_empty(read_string(reader, "marks")?);
            marks.push(Mark {
                id,
                event_pos: read_len(reader, "marks")?,
                text_pos: read_len(reader, "marks")?,
                int_pos: read_len(reader, "marks")?,
                line_pos: read_len(reader, "marks")?,
                system_id_pos: read_len(reader, "marks")?,
                attribute_count_pos: read_len(reader, "marks")?,
                string_pos: read_len(reader, "marks")?,
            });
        }

        Ok(SaxTape {
            events,
            text,
            ints,
            lines,
            system_ids,
            attribute_counts,
            strings,
            attribute_total,
            has_locator,
            public_id,
            locator: None,
            marks,
            downstream: None,
        })
    }
}

impl XmlReceiver for SaxTape {
    fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
        self.has_locator = true;
        self.locator = Some(Rc::clone(&locator));
        if let Some(downstream) = &mut self.downstream {
            downstream.set_document_locator(locator);
        }
    }

    fn start_document(&mut self) -> Result<()> {
        self.record_event(START_DOCUMENT)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.start_document()?;
        }
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.record_event(END_DOCUMENT)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.end_document()?;
        }
        // The tape must not keep a reference to whoever filled it.
        self.locator = None;
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.record_event(START_ELEMENT)?;
        if let Some(locator) = &self.locator {
            if self.public_id.is_none() {
                self.public_id = locator.public_id();
            }
        }
        self.record_location()?;
        self.record_string(uri)?;
        self.record_string(local_name)?;
        self.record_string(qname)?;
        self.record_attributes(attributes)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.start_element(uri, local_name, qname, attributes)?;
        }
        Ok(())
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        self.record_event(END_ELEMENT)?;
        self.record_location()?;
        self.record_string(uri)?;
        self.record_string(local_name)?;
        self.record_string(qname)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.end_element(uri, local_name, qname)?;
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.record_event(CHARACTERS)?;
        self.record_text(text)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.characters(text)?;
        }
        Ok(())
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.record_event(IGNORABLE_WHITESPACE)?;
        self.record_text(text)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.ignorable_whitespace(text)?;
        }
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.record_event(PROCESSING_INSTRUCTION)?;
        self.record_location()?;
        self.record_string(target)?;
        self.record_string(data)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.processing_instruction(target, data)?;
        }
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.record_event(COMMENT)?;
        self.record_text(text)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.comment(text)?;
        }
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.record_event(START_PREFIX_MAPPING)?;
        // No location data for prefix mappings; it is very unlikely to be used.
        self.record_string(prefix)?;
        self.record_string(uri)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.start_prefix_mapping(prefix, uri)?;
        }
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.record_event(END_PREFIX_MAPPING)?;
        self.record_string(prefix)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.end_prefix_mapping(prefix)?;
        }
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.record_event(SKIPPED_ENTITY)?;
        self.record_location()?;
        self.record_string(name)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.skipped_entity(name)?;
        }
        Ok(())
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.record_event(START_ENTITY)?;
        self.record_location()?;
        self.record_string(name)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.start_entity(name)?;
        }
        Ok(())
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.record_event(END_ENTITY)?;
        self.record_location()?;
        self.record_string(name)?;
        if let Some(downstream) = &mut self.downstream {
            downstream.end_entity(name)?;
        }
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.record_event(START_CDATA)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.start_cdata()?;
        }
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.record_event(END_CDATA)?;
        self.record_location()?;
        if let Some(downstream) = &mut self.downstream {
            downstream.end_cdata()?;
        }
        Ok(())
    }
}

impl fmt::Debug for SaxTape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaxTape")
            .field("events", &self.events.len())
            .field("text_bytes", &self.text.len())
            .field("strings", &self.strings.len())
            .field("marks", &self.marks.len())
            .field("has_locator", &self.has_locator)
            .field("tee", &self.downstream.is_some())
            .finish()
    }
}

/// Locator handed to receivers during replay; tracks the position of the
/// event currently being delivered through shared cells updated by the
/// replay loop.
#[derive(Default)]
struct ReplayCursor {
    public_id: Option<String>,
    line: Cell<Option<u32>>,
    column: Cell<Option<u32>>,
    system_id: RefCell<Option<Rc<str>>>,
}

impl ReplayCursor {
    fn load(&self, line: Option<u32>, column: Option<u32>, system_id: Option<&Rc<str>>) {
        self.line.set(line);
        self.column.set(column);
        *self.system_id.borrow_mut() = system_id.map(Rc::clone);
    }
}

impl Locator for ReplayCursor {
    fn public_id(&self) -> Option<String> {
        self.public_id.clone()
    }

    fn system_id(&self) -> Option<String> {
        self.system_id.borrow().as_ref().map(|id| id.to_string())
    }

    fn line(&self) -> Option<u32> {
        self.line.get()
    }

    fn column(&self) -> Option<u32> {
        self.column.get()
    }
}

fn grow<T>(buffer: &mut Vec<T>, additional: usize) -> std::result::Result<(), TapeError> {
    buffer
        .try_reserve(additional)
        .map_err(|_| TapeError::Allocation { additional })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn write_len<W: Write>(
    writer: &mut W,
    section: &'static str,
    len: usize,
) -> std::result::Result<(), TapeError> {
    let value = u32::try_from(len).map_err(|_| TapeError::SectionTooLarge { section, len })?;
    writer.write_u32::<LittleEndian>(value)?;
    Ok(())
}

fn write_string<W: Write>(
    writer: &mut W,
    section: &'static str,
    value: &str,
) -> std::result::Result<(), TapeError> {
    write_len(writer, section, value.len())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_u32_section<W: Write>(
    writer: &mut W,
    section: &'static str,
    values: &[u32],
) -> std::result::Result<(), TapeError> {
    write_len(writer, section, values.len())?;
    for &value in values {
        writer.write_u32::<LittleEndian>(value)?;
    }
    Ok(())
}

fn read_len<R: Read>(reader: &mut R, _section: &'static str) -> std::result::Result<usize, TapeError> {
    Ok(reader.read_u32::<LittleEndian>()? as usize)
}

fn read_string<R: Read>(
    reader: &mut R,
    section: &'static str,
) -> std::result::Result<String, TapeError> {
    let len = read_len(reader, section)?;
    let mut bytes = Vec::new();
    grow(&mut bytes, len)?;
    bytes.resize(len, 0);
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn read_u32_section<R: Read>(
    reader: &mut R,
    section: &'static str,
) -> std::result::Result<Vec<u32>, TapeError> {
    let count = read_len(reader, section)?;
    let mut values = Vec::new();
    grow(&mut values, count)?;
    for _ in 0..count {
        values.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::{RecordingReceiver, SaxEvent};

    fn simple_attributes() -> Attributes {
        let mut attributes = Attributes::new();
        attributes.push(Attribute::new("id", "a1"));
        attributes
    }

    #[test]
    fn empty_tape_replays_nothing() {
        let tape = SaxTape::new();
        let mut sink = RecordingReceiver::new();
        tape.replay(&mut sink).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn zero_length_character_runs_round_trip() {
        let mut tape = SaxTape::new();
        tape.start_document().unwrap();
        tape.characters("").unwrap();
        tape.end_document().unwrap();

        let mut sink = RecordingReceiver::new();
        tape.replay(&mut sink).unwrap();
        assert_eq!(
            sink.events(),
            &[
                SaxEvent::StartDocument,
                SaxEvent::Characters {
                    text: String::new()
                },
                SaxEvent::EndDocument,
            ]
        );
    }

    #[test]
    fn clear_resets_to_the_empty_state() {
        let mut tape = SaxTape::new();
        tape.start_document().unwrap();
        tape.start_element("", "a", "a", &simple_attributes()).unwrap();
        tape.mark(Some("m"));
        tape.end_element("", "a", "a").unwrap();
        tape.end_document().unwrap();
        assert!(tape.len() > 0);
        assert_eq!(tape.marks().len(), 1);

        tape.clear();
        assert_eq!(tape.len(), 0);
        assert!(tape.marks().is_empty());
        assert_eq!(tape.approximate_size(), 0);
        assert_eq!(tape.recorded_attribute_count(), 0);
    }

    #[test]
    fn approximate_size_tracks_content() {
        let mut tape = SaxTape::new();
        let empty = tape.approximate_size();
        tape.start_element("", "a", "a", &Attributes::new()).unwrap();
        tape.characters("hello").unwrap();
        assert!(tape.approximate_size() > empty);
    }

    #[test]
    fn mark_at_end_of_tape_replays_nothing() {
        let mut tape = SaxTape::new();
        tape.start_element("", "a", "a", &Attributes::new()).unwrap();
        tape.end_element("", "a", "a").unwrap();
        let mark = tape.mark(None);

        let mut sink = RecordingReceiver::new();
        tape.replay_from(&mark, &mut sink).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn read_from_rejects_unknown_event_tags() {
        let mut bytes = Vec::new();
        SaxTape::new().write_to(&mut bytes).unwrap();
        // Corrupt the (empty) tape: one event with an out-of-range tag.
        bytes[0] = 1;
        bytes.insert(4, 0x7F);

        let error = SaxTape::read_from(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(
            error,
            crate::err::SaxError::Tape(TapeError::InvalidEventTag { value: 0x7F, index: 0 })
        ));
    }

    #[test]
    fn tee_records_and_forwards() {
        let downstream = std::rc::Rc::new(std::cell::RefCell::new(RecordingReceiver::new()));
        let mut tape = SaxTape::with_downstream(Box::new(Rc::clone(&downstream)));
        tape.start_document().unwrap();
        tape.characters("x").unwrap();
        tape.end_document().unwrap();

        assert_eq!(downstream.borrow().events().len(), 3);

        let mut replayed = RecordingReceiver::new();
        tape.replay(&mut replayed).unwrap();
        assert_eq!(replayed.events(), downstream.borrow().events());
    }
}
