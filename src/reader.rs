use std::cell::Cell;
use std::rc::Rc;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event as XmlEvent};

use crate::attributes::{Attribute, Attributes};
use crate::err::{Result, SaxError};
use crate::locator::Locator;
use crate::namespace::NamespaceContext;
use crate::receiver::XmlReceiver;

/// Parses an XML document and pushes it into `receiver` as SAX events.
///
/// This is a convenience front-end: any source satisfying the push contract
/// can drive a tape or a dispatcher; this one drives them from markup text.
/// `xmlns` declarations are delivered as prefix-mapping events and element
/// and attribute names are resolved against them; CDATA sections arrive
/// bracketed between `start_cdata`/`end_cdata`.
pub fn read_document(source: &str, receiver: &mut dyn XmlReceiver) -> Result<()> {
    read_document_from(source, None, receiver)
}

/// Like [`read_document`], additionally attaching a locator that reports
/// `system_id` plus line/column positions computed from the parse offset.
pub fn read_document_from(
    source: &str,
    system_id: Option<&str>,
    receiver: &mut dyn XmlReceiver,
) -> Result<()> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let position = Rc::new(TextPosition {
        source: Rc::from(source),
        system_id: system_id.map(str::to_string),
        offset: Cell::new(0),
    });
    receiver.set_document_locator(Rc::clone(&position) as Rc<dyn Locator>);
    receiver.start_document()?;

    let mut namespaces = NamespaceContext::new();
    // Per open element: (uri, local_name, qname, prefixes declared on it).
    let mut open: Vec<(String, String, String, Vec<String>)> = Vec::new();
    let mut buf = Vec::new();

    loop {
        position.offset.set(reader.buffer_position() as usize);
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(element) => {
                start_element(&element, &mut namespaces, &mut open, receiver)?;
            }
            XmlEvent::Empty(element) => {
                start_element(&element, &mut namespaces, &mut open, receiver)?;
                end_element(&mut namespaces, &mut open, receiver)?;
            }
            XmlEvent::End(_) => {
                end_element(&mut namespaces, &mut open, receiver)?;
            }
            XmlEvent::Text(text) => {
                let raw = std::str::from_utf8(text.as_ref())?;
                let unescaped = unescape(raw)?;
                // Whitespace between top-level constructs is not content.
                if !open.is_empty() || !unescaped.trim().is_empty() {
                    receiver.characters(&unescaped)?;
                }
            }
            XmlEvent::CData(section) => {
                receiver.start_cdata()?;
                receiver.characters(std::str::from_utf8(section.as_ref())?)?;
                receiver.end_cdata()?;
            }
            XmlEvent::Comment(comment) => {
                receiver.comment(std::str::from_utf8(comment.as_ref())?)?;
            }
            XmlEvent::PI(pi) => {
                let content = std::str::from_utf8(pi.as_ref())?;
                let (target, data) = match content.split_once(char::is_whitespace) {
                    Some((target, data)) => (target, data.trim_start()),
                    None => (content, ""),
                };
                receiver.processing_instruction(target, data)?;
            }
            XmlEvent::Decl(_) | XmlEvent::DocType(_) => {}
            XmlEvent::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    receiver.end_document()
}

fn start_element(
    element: &BytesStart<'_>,
    namespaces: &mut NamespaceContext,
    open: &mut Vec<(String, String, String, Vec<String>)>,
    receiver: &mut dyn XmlReceiver,
) -> Result<()> {
    let qname = std::str::from_utf8(element.name().as_ref())?.to_string();

    // First pass: peel off namespace declarations, which SAX reports as
    // prefix-mapping events rather than attributes.
    let mut declared = Vec::new();
    let mut plain = Vec::new();
    for attribute in element.attributes() {
        let attribute = attribute?;
        let key = std::str::from_utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value()?.into_owned();
        if key == "xmlns" {
            namespaces.start_prefix_mapping("", &value);
            receiver.start_prefix_mapping("", &value)?;
            declared.push(String::new());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.start_prefix_mapping(prefix, &value);
            receiver.start_prefix_mapping(prefix, &value)?;
            declared.push(prefix.to_string());
        } else {
            plain.push((key, value));
        }
    }
    namespaces.start_element();

    let (prefix, local_name) = split_qname(&qname);
    let uri = namespaces.uri(prefix).unwrap_or("").to_string();

    let mut attributes = Attributes::new();
    for (key, value) in plain {
        let (attribute_prefix, attribute_local) = split_qname(&key);
        // Unprefixed attributes are in no namespace.
        let attribute_uri = if attribute_prefix.is_empty() {
            ""
        } else {
            namespaces.uri(attribute_prefix).unwrap_or("")
        };
        attributes.push(Attribute::with_namespace(
            attribute_uri,
            attribute_local,
            key.as_str(),
            value,
        ));
    }

    receiver.start_element(&uri, &local_name, &qname, &attributes)?;
    open.push((uri, local_name.to_string(), qname, declared));
    Ok(())
}

fn end_element(
    namespaces: &mut NamespaceContext,
    open: &mut Vec<(String, String, String, Vec<String>)>,
    receiver: &mut dyn XmlReceiver,
) -> Result<()> {
    let Some((uri, local_name, qname, declared)) = open.pop() else {
        return Err(SaxError::MalformedStream {
            message: "end tag without a matching start tag".to_string(),
        });
    };
    receiver.end_element(&uri, &local_name, &qname)?;
    for prefix in declared.iter().rev() {
        receiver.end_prefix_mapping(prefix)?;
    }
    namespaces.end_element();
    Ok(())
}

fn split_qname(qname: &str) -> (&str, &str) {
    match qname.split_once(':') {
        Some((prefix, local_name)) => (prefix, local_name),
        None => ("", qname),
    }
}

fn unescape(text: &str) -> Result<String> {
    quick_xml::escape::unescape(text)
        .map(|unescaped| unescaped.into_owned())
        .map_err(|error| SaxError::Unescape {
            message: error.to_string(),
        })
}

/// Locator over the byte offset the parser has reached; line and column are
/// computed from the source text only when queried.
struct TextPosition {
    source: Rc<str>,
    system_id: Option<String>,
    offset: Cell<usize>,
}

impl Locator for TextPosition {
    fn system_id(&self) -> Option<String> {
        self.system_id.clone()
    }

    fn line(&self) -> Option<u32> {
        let offset = self.offset.get().min(self.source.len());
        let line = self.source[..offset].bytes().filter(|&b| b == b'\n').count() + 1;
        Some(line as u32)
    }

    fn column(&self) -> Option<u32> {
        let offset = self.offset.get().min(self.source.len());
        let start_of_line = self.source[..offset]
            .rfind('\n')
            .map(|position| position + 1)
            .unwrap_or(0);
        Some((self.source[start_of_line..offset].chars().count() + 1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::{RecordingReceiver, SaxEvent};

    #[test]
    fn elements_text_and_attributes() {
        let mut sink = RecordingReceiver::new();
        read_document(r#"<root a="1"><child>hi</child></root>"#, &mut sink).unwrap();

        assert_eq!(
            sink.events(),
            &[
                SaxEvent::StartDocument,
                SaxEvent::StartElement {
                    uri: String::new(),
                    local_name: "root".to_string(),
                    qname: "root".to_string(),
                    attributes: [Attribute::new("a", "1")].into_iter().collect(),
                },
                SaxEvent::StartElement {
                    uri: String::new(),
                    local_name: "child".to_string(),
                    qname: "child".to_string(),
                    attributes: Attributes::new(),
                },
                SaxEvent::Characters {
                    text: "hi".to_string()
                },
                SaxEvent::EndElement {
                    uri: String::new(),
                    local_name: "child".to_string(),
                    qname: "child".to_string(),
                },
                SaxEvent::EndElement {
                    uri: String::new(),
                    local_name: "root".to_string(),
                    qname: "root".to_string(),
                },
                SaxEvent::EndDocument,
            ]
        );
    }

    #[test]
    fn namespace_declarations_become_prefix_mappings() {
        let mut sink = RecordingReceiver::new();
        read_document(r#"<p:root xmlns:p="urn:x"><p:inner/></p:root>"#, &mut sink).unwrap();

        let events = sink.events();
        assert_eq!(
            events[1],
            SaxEvent::StartPrefixMapping {
                prefix: "p".to_string(),
                uri: "urn:x".to_string(),
            }
        );
        assert_eq!(
            events[2],
            SaxEvent::StartElement {
                uri: "urn:x".to_string(),
                local_name: "root".to_string(),
                qname: "p:root".to_string(),
                attributes: Attributes::new(),
            }
        );
        assert_eq!(
            events[events.len() - 2],
            SaxEvent::EndPrefixMapping {
                prefix: "p".to_string()
            }
        );
    }

    #[test]
    fn cdata_is_bracketed() {
        let mut sink = RecordingReceiver::new();
        read_document("<r><![CDATA[1 < 2]]></r>", &mut sink).unwrap();

        let events = sink.events();
        assert_eq!(events[2], SaxEvent::StartCdata);
        assert_eq!(
            events[3],
            SaxEvent::Characters {
                text: "1 < 2".to_string()
            }
        );
        assert_eq!(events[4], SaxEvent::EndCdata);
    }

    #[test]
    fn locator_reports_line_numbers() {
        struct LineProbe {
            lines: Vec<(String, u32)>,
            locator: Option<Rc<dyn Locator>>,
        }

        impl XmlReceiver for LineProbe {
            fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
                self.locator = Some(locator);
            }

            fn start_element(
                &mut self,
                _uri: &str,
                _local_name: &str,
                qname: &str,
                _attributes: &Attributes,
            ) -> Result<()> {
                if let Some(locator) = &self.locator {
                    if let Some(line) = locator.line() {
                        self.lines.push((qname.to_string(), line));
                    }
                }
                Ok(())
            }
        }

        let mut probe = LineProbe {
            lines: Vec::new(),
            locator: None,
        };
        read_document_from("<a>\n  <b/>\n</a>", Some("probe.xml"), &mut probe).unwrap();

        assert_eq!(probe.lines.len(), 2);
        assert_eq!(probe.lines[0].0, "a");
        assert_eq!(probe.lines[1], ("b".to_string(), 2));
    }
}
