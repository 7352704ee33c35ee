use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::attributes::Attributes;
use crate::err::{Result, SaxError};
use crate::handler::ElementHandler;
use crate::locator::{LocationData, Locator, LocatorStack};
use crate::namespace::NamespaceContext;
use crate::receiver::XmlReceiver;
use crate::registry::HandlerRegistry;
use crate::tape::SaxTape;

/// One active handler invocation.
struct HandlerFrame {
    /// Element depth at which the handler was entered; its own end tag is
    /// the one that brings the dispatcher back to this depth.
    level: u32,
    handler: Rc<RefCell<Box<dyn ElementHandler>>>,
    forwarding: bool,
    /// Defensive copy of the start tag's attributes; kept only until the
    /// deferred lifecycle runs, so only for repeating handlers.
    attributes: Option<Attributes>,
    /// Predicate result pending delivery to `init`; kept only for repeating
    /// handlers, whose lifecycle is deferred until capture completes.
    matched: Option<Box<dyn Any>>,
    /// Completed body capture, replayed by `repeat_body`.
    body: Option<Rc<SaxTape>>,
}

enum Frame {
    Active(HandlerFrame),
    /// Pushed by `start_body`: content synthesized by a handler is
    /// dispatched as if no handler were active, so it is not subject to any
    /// forwarding suppression.
    DynamicBody,
}

/// Routes a live SAX stream through registered element handlers.
///
/// The dispatcher is itself an [`XmlReceiver`]. For every start tag it
/// consults the [`HandlerRegistry`]; an element nobody claims is forwarded
/// to the output untouched. A claimed element either runs its handler
/// synchronously (non-repeating) or has its entire body captured into a
/// private [`SaxTape`] first (repeating), after which the handler may replay
/// that body zero or more times via [`repeat_body`](Self::repeat_body).
/// Each replay re-enters the dispatcher, so nested handlers match again,
/// freshly, on every pass.
///
/// Reentrant, not concurrent: body replays feed back into the same
/// dispatcher on the same call stack.
pub struct ElementDispatcher {
    registry: Rc<HandlerRegistry>,
    output: Box<dyn XmlReceiver>,
    context: Option<Rc<dyn Any>>,
    namespaces: NamespaceContext,
    frames: Vec<Frame>,
    /// Tape capturing the innermost repeating handler's body, while the
    /// live stream is inside that body.
    capture: Option<SaxTape>,
    level: u32,
    locator: Option<Rc<LocatorStack>>,
}

impl ElementDispatcher {
    pub fn new(registry: Rc<HandlerRegistry>, output: Box<dyn XmlReceiver>) -> Self {
        ElementDispatcher {
            registry,
            output,
            context: None,
            namespaces: NamespaceContext::new(),
            frames: Vec::new(),
            capture: None,
            level: 0,
            locator: None,
        }
    }

    /// Attaches the opaque ambient object handed to matchers and readable
    /// by handlers during dispatch.
    pub fn with_context(mut self, context: Rc<dyn Any>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn context(&self) -> Option<&Rc<dyn Any>> {
        self.context.as_ref()
    }

    /// The output sink. Handlers write their own deliberate output here.
    pub fn output(&mut self) -> &mut dyn XmlReceiver {
        &mut *self.output
    }

    pub fn set_output(&mut self, output: Box<dyn XmlReceiver>) {
        self.output = output;
    }

    pub fn into_output(self) -> Box<dyn XmlReceiver> {
        self.output
    }

    /// Prefix bindings currently in scope on the live stream.
    pub fn namespace_context(&self) -> &NamespaceContext {
        &self.namespaces
    }

    /// Best-available position of the event currently being processed.
    pub fn location(&self) -> LocationData {
        match &self.locator {
            Some(locator) => LocationData::from_locator(locator.as_ref()),
            None => LocationData::default(),
        }
    }

    fn located(&self, error: SaxError) -> SaxError {
        error.at(self.location())
    }

    /// Replays the captured body of the innermost repeating handler through
    /// this dispatcher. Callable any number of times (including zero) while
    /// that handler's `start`/`end` window is open; nested content is
    /// re-dispatched on every call.
    pub fn repeat_body(&mut self) -> Result<()> {
        let body = match self.frames.last() {
            Some(Frame::Active(frame)) => frame.body.clone(),
            _ => None,
        };
        let Some(body) = body else {
            return Err(self.located(SaxError::NoActiveBody {
                operation: "repeat_body",
            }));
        };

        debug!("replaying captured body ({} events)", body.len());

        // The replay may deliver its own locator, which lands on our stack;
        // restore the stack once the body is done.
        let depth_before = self.locator_depth();
        body.replay(self)?;
        if self.locator_depth() != depth_before {
            debug_assert_eq!(
                self.locator_depth(),
                depth_before + 1,
                "locator stack unbalanced after body replay"
            );
            if let Some(locator) = &self.locator {
                locator.pop();
            }
        }
        Ok(())
    }

    /// Switches the dispatcher into accepting freshly generated events, fed
    /// by the calling handler through the receiver methods, as if they were
    /// the element's body. Nested dispatch stays active; no forwarding
    /// suppression applies until [`end_body`](Self::end_body).
    pub fn start_body(&mut self) {
        self.frames.push(Frame::DynamicBody);
    }

    pub fn end_body(&mut self) {
        let popped = self.frames.pop();
        debug_assert!(
            matches!(popped, Some(Frame::DynamicBody)),
            "end_body popped a handler frame"
        );
    }

    fn locator_depth(&self) -> usize {
        self.locator.as_ref().map(|stack| stack.len()).unwrap_or(0)
    }

    /// Whether the innermost frame suppresses un-intercepted content.
    fn suppressing(&self) -> bool {
        matches!(self.frames.last(), Some(Frame::Active(frame)) if !frame.forwarding)
    }

    fn dispatch_start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        if let Some(tape) = self.capture.as_mut() {
            return tape.start_element(uri, local_name, qname, attributes);
        }
        if self.suppressing() {
            return Ok(());
        }

        let resolved = self
            .registry
            .resolve(uri, local_name, attributes, self.context.as_ref())?;

        let Some(resolved) = resolved else {
            return self.output.start_element(uri, local_name, qname, attributes);
        };

        let repeating = resolved.handler.is_repeating();
        let forwarding = resolved.handler.is_forwarding();
        debug!(
            "handler `{}` claims <{qname}> at level {} (repeating: {repeating})",
            resolved.handler_id, self.level
        );

        let handler = Rc::new(RefCell::new(resolved.handler));
        if repeating {
            // The body is captured first; the lifecycle runs when the
            // matching end tag arrives.
            let mut tape = SaxTape::new();
            if let Some(locator) = &self.locator {
                tape.set_document_locator(Rc::clone(locator) as Rc<dyn Locator>);
            }
            self.frames.push(Frame::Active(HandlerFrame {
                level: self.level,
                handler,
                forwarding,
                attributes: Some(attributes.clone()),
                matched: resolved.matched,
                body: None,
            }));
            self.capture = Some(tape);
        } else {
            self.frames.push(Frame::Active(HandlerFrame {
                level: self.level,
                handler: Rc::clone(&handler),
                forwarding,
                attributes: None,
                matched: None,
                body: None,
            }));
            handler
                .borrow_mut()
                .init(uri, local_name, qname, attributes, resolved.matched)?;
            handler
                .borrow_mut()
                .start(self, uri, local_name, qname, attributes)?;
        }
        Ok(())
    }

    fn dispatch_end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        // Does this end tag close the innermost handler's own element?
        let closing = match self.frames.last_mut() {
            Some(Frame::Active(frame)) if frame.level == self.level => Some((
                Rc::clone(&frame.handler),
                frame.matched.take(),
                frame.attributes.take(),
            )),
            _ => None,
        };

        if let Some((handler, matched, attributes)) = closing {
            if let Some(tape) = self.capture.take() {
                // Capture is complete; run the deferred lifecycle with the
                // start tag's attributes. `start`/`end` may replay the body.
                debug!("body of <{qname}> captured ({} events)", tape.len());
                let body = Rc::new(tape);
                if let Some(Frame::Active(frame)) = self.frames.last_mut() {
                    frame.body = Some(body);
                }
                let attributes = attributes.unwrap_or_default();
                handler
                    .borrow_mut()
                    .init(uri, local_name, qname, &attributes, matched)?;
                handler
                    .borrow_mut()
                    .start(self, uri, local_name, qname, &attributes)?;
                handler.borrow_mut().end(self, uri, local_name, qname)?;
            } else {
                handler.borrow_mut().end(self, uri, local_name, qname)?;
            }
            self.frames.pop();
            Ok(())
        } else if let Some(tape) = self.capture.as_mut() {
            tape.end_element(uri, local_name, qname)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.end_element(uri, local_name, qname)
        }
    }
}

impl XmlReceiver for ElementDispatcher {
    fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
        // First delivery is the source's; later ones come from reentrant
        // body replays and shadow it until the replay finishes. Never
        // forwarded: receivers see this dispatcher's own stacked view.
        match &self.locator {
            None => {
                let stack = LocatorStack::new();
                stack.push(locator);
                self.locator = Some(Rc::new(stack));
            }
            Some(stack) => stack.push(locator),
        }
    }

    fn start_document(&mut self) -> Result<()> {
        self.output
            .start_document()
            .map_err(|error| self.located(error))
    }

    fn end_document(&mut self) -> Result<()> {
        self.output
            .end_document()
            .map_err(|error| self.located(error))
    }

    fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        qname: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        // Increment first so handlers entered from here observe the level
        // of their own element.
        self.level += 1;
        self.namespaces.start_element();

        self.dispatch_start_element(uri, local_name, qname, attributes)
            .map_err(|error| self.located(error))
    }

    fn end_element(&mut self, uri: &str, local_name: &str, qname: &str) -> Result<()> {
        let result = self.dispatch_end_element(uri, local_name, qname);
        if result.is_ok() {
            self.namespaces.end_element();
            self.level = self.level.saturating_sub(1);
        }
        result.map_err(|error| self.located(error))
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.characters(text)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.characters(text)
        };
        result.map_err(|error| self.located(error))
    }

    fn ignorable_whitespace(&mut self, text: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.ignorable_whitespace(text)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.ignorable_whitespace(text)
        };
        result.map_err(|error| self.located(error))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.processing_instruction(target, data)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.processing_instruction(target, data)
        };
        result.map_err(|error| self.located(error))
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.comment(text)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.comment(text)
        };
        result.map_err(|error| self.located(error))
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.start_prefix_mapping(prefix, uri)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.namespaces.start_prefix_mapping(prefix, uri);
            self.output.start_prefix_mapping(prefix, uri)
        };
        result.map_err(|error| self.located(error))
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.end_prefix_mapping(prefix)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.end_prefix_mapping(prefix)
        };
        result.map_err(|error| self.located(error))
    }

    fn skipped_entity(&mut self, name: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.skipped_entity(name)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.skipped_entity(name)
        };
        result.map_err(|error| self.located(error))
    }

    fn start_entity(&mut self, name: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.start_entity(name)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.start_entity(name)
        };
        result.map_err(|error| self.located(error))
    }

    fn end_entity(&mut self, name: &str) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.end_entity(name)
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.end_entity(name)
        };
        result.map_err(|error| self.located(error))
    }

    fn start_cdata(&mut self) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.start_cdata()
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.start_cdata()
        };
        result.map_err(|error| self.located(error))
    }

    fn end_cdata(&mut self) -> Result<()> {
        let result = if let Some(tape) = self.capture.as_mut() {
            tape.end_cdata()
        } else if self.suppressing() {
            Ok(())
        } else {
            self.output.end_cdata()
        };
        result.map_err(|error| self.located(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::NullReceiver;

    #[test]
    fn repeat_body_outside_any_handler_fails() {
        let registry = Rc::new(HandlerRegistry::new());
        let mut dispatcher = ElementDispatcher::new(registry, Box::new(NullReceiver));

        let error = dispatcher.repeat_body().unwrap_err();
        assert!(matches!(
            error,
            SaxError::NoActiveBody {
                operation: "repeat_body"
            }
        ));
    }

    #[test]
    fn dynamic_body_forwards_synthesized_content() {
        use crate::receiver::{RecordingReceiver, SaxEvent};

        let registry = Rc::new(HandlerRegistry::new());
        let output = Rc::new(RefCell::new(RecordingReceiver::new()));
        let mut dispatcher =
            ElementDispatcher::new(registry, Box::new(Rc::clone(&output)));

        dispatcher.start_body();
        dispatcher.characters("generated").unwrap();
        dispatcher.end_body();

        assert_eq!(
            output.borrow().events(),
            &[SaxEvent::Characters {
                text: "generated".to_string()
            }]
        );
    }
}
