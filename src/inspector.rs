use std::rc::Rc;

use crate::attributes::Attributes;
use crate::err::{Result, SaxError};
use crate::locator::{LocationData, Locator};
use crate::namespace::NamespaceContext;
use crate::receiver::XmlReceiver;

/// Forwards events to an inner receiver while checking the validity of the
/// stream: document boundaries, element nesting, name and namespace
/// consistency.
///
/// The recording and dispatch layers assume well-formed input and never
/// re-validate it; compose this wrapper in front of them when the source is
/// not trusted. Violations raise
/// [`MalformedStream`](crate::err::SaxError::MalformedStream) wrapped with
/// the current source location.
pub struct InspectingReceiver<R: XmlReceiver> {
    inner: R,
    locator: Option<Rc<dyn Locator>>,
    element_stack: Vec<(String, String, String)>,
    document_started: bool,
    document_ended: bool,
    namespaces: NamespaceContext,
}

impl<R: XmlReceiver> InspectingReceiver<R> {
    pub fn new(inner: R) -> Self {
        InspectingReceiver {
            inner,
            locator: None,
            element_stack: Vec::new(),
            document_started: false,
            document_ended: false,
            namespaces: NamespaceContext::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn violation(&self, message: impl Into<String>) -> SaxError {
        let location = match &self.locator {
            Some(locator) => LocationData::from_locator(locator.as_ref()),
            None => LocationData::default(),
        };
        SaxError::MalformedStream {
            message: message.into(),
        }
        .at(location)
    }

    fn check_in_document(&self) -> Option<&'static str> {
        if !self.document_started {
            Some("event received before document start")
        } else if self.document_ended {
            Some("event received after document end")
        } else {
            None
        }
    }

    fn check_in_element(&self) -> Option<&'static str> {
        self.check_in_document().or_else(|| {
            if self.element_stack.is_empty() {
                Some("event received after close of root element")
            } else {
                None
            }
        })
    }

    fn check_name(&self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        if local_name.is_empty() {
            return Err(self.violation(format!("empty local name in event, qname `{qname}`")));
        }
        if qname.is_empty() {
            return Err(self.violation(format!(
                "empty qualified name in event, local name `{local_name}`"
            )));
        }
        let colon = qname.find(':');
        if uri.is_empty() {
            if local_name != qname {
                return Err(self.violation(format!(
                    "local name `{local_name}` and qname `{qname}` must be equal outside any namespace"
                )));
            }
            if colon.is_some() {
                return Err(self.violation(format!(
                    "qname `{qname}` has a prefix but no namespace"
                )));
            }
            return Ok(());
        }
        match colon {
            None => {
                // Unprefixed name in a namespace: must match the default.
                if self.namespaces.uri("") != Some(uri) {
                    return Err(self.violation(format!(
                        "namespace `{uri}` does not match the default namespace for qname `{qname}`"
                    )));
                }
            }
            Some(position) if position == 0 || position == qname.len() - 1 => {
                return Err(self.violation(format!("invalid colon position in qname `{qname}`")));
            }
            Some(position) => {
                if local_name != &qname[position + 1..] {
                    return Err(self.violation(format!(
                        "local part of qname `{qname}` does not match local name `{local_name}`"
                    )));
                }
                let prefix = &qname[..position];
                match self.namespaces.uri(prefix) {
                    None => {
                        return Err(
                            self.violation(format!("qname prefix is not in scope: `{qname}`"))
                        );
                    }
                    Some(bound) if bound != uri => {
                        return Err(self.violation(format!(
                            "prefix `{prefix}` maps to `{bound}` but namespace provided is `{uri}`"
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn check_attribute_name(&self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        if !uri.is_empty() && !qname.contains(':') {
            return Err(self.violation(format!(
                "non-prefixed attribute cannot be in a namespace: `{qname}` in `{uri}`"
            )));
        }
        if uri.is_empty() {
            // Unprefixed attributes are in no namespace; only basic shape
            // checks apply.
            if local_name.is_empty() || qname.is_empty() {
                return Err(self.violation(format!("empty attribute name, qname `{qname}`")));
            }
            return Ok(());
        }
        self.check_name(uri, local_name, qname)
    }
}

impl<R: XmlReceiver> XmlReceiver for InspectingReceiver<R> {
    fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
        self.locator = Some(Rc::clone(&locator));
        self.inner.set_document_locator(locator);
    }

    fn start_document(&mut self) -> Result<()> {
        if self.document_started {
            return Err(self.violation("start_document called twice"));
        }
        self.document_started = true;
        self.inner.start_document()
    }

    fn end_document(&mut self) -> Result<()> {
        if !self.element_stack.is_empty() {
            return Err(self.violation("document ended before all elements were closed"));
        }
        if self.document_ended {
            return Err(self.violation("end_document called twice"));
        }
        self.document_ended = true;
        self.inner.end_document()
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.namespaces.start_element();
        if let Some(error) = self.check_in_document() {
            return Err(self.violation(format!("{error}: element `{qname}`")));
        }

        self.element_stack
            .push((uri.to_string(), local_name.to_string(), qname.to_string()));

        self.check_name(uri, local_name, qname)?;
        for attribute in attributes {
            self.check_attribute_name(&attribute.uri, &attribute.local_name, &attribute.qname)?;
        }

        self.inner.start_element(uri, local_name, qname, attributes)
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        if let Some(error) = self.check_in_element() {
            return Err(self.violation(format!("{error}: element `{qname}`")));
        }

        let Some((open_uri, open_local, open_qname)) = self.element_stack.pop() else {
            return Err(self.violation(format!("no element open for end_element `{qname}`")));
        };
        if open_uri != uri || open_local != local_name || open_qname != qname {
            return Err(self.violation(format!(
                "end_element `{qname}` does not match start_element `{open_qname}`"
            )));
        }

        self.check_name(uri, local_name, qname)?;
        self.namespaces.end_element();

        self.inner.end_element(uri, local_name, qname)
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        if let Some(error) = self.check_in_element() {
            return Err(self.violation(format!("{error}: characters `{text}`")));
        }
        self.inner.characters(text)
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        self.inner.ignorable_whitespace(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        if let Some(error) = self.check_in_document() {
            return Err(self.violation(format!("{error}: processing instruction `{target}`")));
        }
        self.inner.processing_instruction(target, data)
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.inner.comment(text)
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.namespaces.start_prefix_mapping(prefix, uri);
        self.inner.start_prefix_mapping(prefix, uri)
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        self.inner.end_prefix_mapping(prefix)
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        self.inner.skipped_entity(name)
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        self.inner.start_entity(name)
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        self.inner.end_entity(name)
    }

    fn start_cdata(&mut self) -> Result<()> {
        self.inner.start_cdata()
    }

    fn end_cdata(&mut self) -> Result<()> {
        self.inner.end_cdata()
    }
}
