use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event as XmlEvent};

use crate::attributes::Attributes;
use crate::err::Result;
use crate::receiver::XmlReceiver;

/// Serializes received events back to markup text.
///
/// Counterpart of [`read_document`](crate::reader::read_document): prefix
/// mappings come back out as `xmlns` attributes on the next start tag, and
/// characters received between `start_cdata`/`end_cdata` are emitted as a
/// CDATA section. Document events produce no markup, so replaying a
/// mark-scoped fragment works as well as replaying a whole document.
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
    pending_namespaces: Vec<(String, String)>,
    in_cdata: bool,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        XmlWriter {
            writer: Writer::new(inner),
            pending_namespaces: Vec::new(),
            in_cdata: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write> XmlReceiver for XmlWriter<W> {
    fn start_element(
        &mut self,
        _uri: &str,
        _local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        let mut element = BytesStart::new(qname);
        for (prefix, uri) in self.pending_namespaces.drain(..) {
            let name = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{prefix}")
            };
            element.push_attribute((name.as_str(), uri.as_str()));
        }
        for attribute in attributes {
            element.push_attribute((attribute.qname.as_str(), attribute.value.as_str()));
        }
        self.writer
            .write_event(XmlEvent::Start(element))
            .map_err(Into::into)
    }

    fn end_element(&mut self, _uri: &str, _local_name: &str, qname: &str) -> Result<()> {
        self.writer
            .write_event(XmlEvent::End(BytesEnd::new(qname)))
            .map_err(Into::into)
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        let event = if self.in_cdata {
            XmlEvent::CData(BytesCData::new(text))
        } else {
            XmlEvent::Text(BytesText::new(text))
        };
        self.writer.write_event(event).map_err(Into::into)
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_event(XmlEvent::Text(BytesText::from_escaped(text)))
            .map_err(Into::into)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{target} {data}")
        };
        self.writer
            .write_event(XmlEvent::PI(BytesPI::new(content.as_str())))
            .map_err(Into::into)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_event(XmlEvent::Comment(BytesText::from_escaped(text)))
            .map_err(Into::into)
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.pending_namespaces
            .push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        // An unexpanded entity has exactly one textual form.
        self.writer
            .write_event(XmlEvent::Text(BytesText::from_escaped(format!(
                "&{name};"
            ))))
            .map_err(Into::into)
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.in_cdata = true;
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.in_cdata = false;
        Ok(())
    }
}
