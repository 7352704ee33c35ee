use std::cell::RefCell;
use std::rc::Rc;

use crate::attributes::Attributes;
use crate::err::Result;
use crate::locator::Locator;

/// The push contract shared by everything in this crate: one method per SAX
/// event. Both the tape and the dispatcher implement it (to record and to
/// route) and consume it (to replay and to forward).
///
/// Every method has a default no-op body so that partial receivers only
/// implement the events they care about. Text is handed over as a borrowed
/// slice; a receiver that retains it must copy it out before returning.
pub trait XmlReceiver {
    /// Delivered before the first event, and possibly again at the start of
    /// a reentrant replay that carries embedded location information.
    fn set_document_locator(&mut self, _locator: Rc<dyn Locator>) {}

    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_element(
        &mut self,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
        _attributes: &Attributes,
    ) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _uri: &str, _local_name: &str, _qname: &str) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn ignorable_whitespace(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn processing_instruction(&mut self, _target: &str, _data: &str) -> Result<()> {
        Ok(())
    }

    fn comment(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> Result<()> {
        Ok(())
    }

    fn end_prefix_mapping(&mut self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn skipped_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn start_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn end_entity(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receivers are frequently shared between a producer and the caller that
/// wants to look at the result afterwards.
impl<R: XmlReceiver> XmlReceiver for Rc<RefCell<R>> {
    fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
        self.borrow_mut().set_document_locator(locator);
    }

    fn start_document(&mut self) -> Result<()> {
        self.borrow_mut().start_document()
    }

    fn end_document(&mut self) -> Result<()> {
        self.borrow_mut().end_document()
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.borrow_mut()
            .start_element(uri, local_name, qname, attributes)
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        self.borrow_mut().end_element(uri, local_name, qname)
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.borrow_mut().characters(text)
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.borrow_mut().ignorable_whitespace(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.borrow_mut().processing_instruction(target, data)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.borrow_mut().comment(text)
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.borrow_mut().start_prefix_mapping(prefix, uri)
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.borrow_mut().end_prefix_mapping(prefix)
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.borrow_mut().skipped_entity(name)
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.borrow_mut().start_entity(name)
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.borrow_mut().end_entity(name)
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.borrow_mut().start_cdata()
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.borrow_mut().end_cdata()
    }
}

/// One materialized event, as collected by [`RecordingReceiver`].
///
/// This is an inspection surface. The tape never materializes events; it
/// keeps the packed buffer encoding described in [`crate::tape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaxEvent {
    StartDocument,
    EndDocument,
    StartElement {
        uri: String,
        local_name: String,
        qname: String,
        attributes: Attributes,
    },
    EndElement {
        uri: String,
        local_name: String,
        qname: String,
    },
    Characters {
        text: String,
    },
    IgnorableWhitespace {
        text: String,
    },
    ProcessingInstruction {
        target: String,
        data: String,
    },
    Comment {
        text: String,
    },
    StartPrefixMapping {
        prefix: String,
        uri: String,
    },
    EndPrefixMapping {
        prefix: String,
    },
    SkippedEntity {
        name: String,
    },
    StartEntity {
        name: String,
    },
    EndEntity {
        name: String,
    },
    StartCdata,
    EndCdata,
}

/// Collects every received event as a [`SaxEvent`] value.
#[derive(Default)]
pub struct RecordingReceiver {
    events: Vec<SaxEvent>,
    locator: Option<Rc<dyn Locator>>,
}

impl RecordingReceiver {
    pub fn new() -> Self {
        RecordingReceiver::default()
    }

    pub fn events(&self) -> &[SaxEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<SaxEvent> {
        std::mem::take(&mut self.events)
    }

    /// The most recently delivered locator, if any.
    pub fn locator(&self) -> Option<&Rc<dyn Locator>> {
        self.locator.as_ref()
    }
}

impl XmlReceiver for RecordingReceiver {
    fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
        self.locator = Some(locator);
    }

    fn start_document(&mut self) -> Result<()> {
        self.events.push(SaxEvent::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.events.push(SaxEvent::EndDocument);
        Ok(())
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.events.push(SaxEvent::StartElement {
            uri: uri.to_string(),
            local_name: local_name.to_string(),
            qname: qname.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        self.events.push(SaxEvent::EndElement {
            uri: uri.to_string(),
            local_name: local_name.to_string(),
            qname: qname.to_string(),
        });
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.events.push(SaxEvent::Characters {
            text: text.to_string(),
        });
        Ok(())
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.events.push(SaxEvent::IgnorableWhitespace {
            text: text.to_string(),
        });
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.events.push(SaxEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.events.push(SaxEvent::Comment {
            text: text.to_string(),
        });
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.events.push(SaxEvent::StartPrefixMapping {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.events.push(SaxEvent::EndPrefixMapping {
            prefix: prefix.to_string(),
        });
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.events.push(SaxEvent::SkippedEntity {
            name: name.to_string(),
        });
        Ok(())
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.events.push(SaxEvent::StartEntity {
            name: name.to_string(),
        });
        Ok(())
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.events.push(SaxEvent::EndEntity {
            name: name.to_string(),
        });
        Ok(())
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.events.push(SaxEvent::StartCdata);
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.events.push(SaxEvent::EndCdata);
        Ok(())
    }
}

/// Discards everything it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReceiver;

impl XmlReceiver for NullReceiver {}
