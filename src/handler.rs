use std::any::Any;

use crate::attributes::Attributes;
use crate::dispatcher::ElementDispatcher;
use crate::err::Result;

/// Per-element behavior attached through the [`HandlerRegistry`].
///
/// One instance is created per matched element occurrence; instances are
/// never reused. The two capability flags decide how the dispatcher treats
/// the element:
///
/// - [`is_repeating`](Self::is_repeating): the element's whole body is
///   captured into a private tape first; `init`/`start`/`end` then run
///   back-to-back once capture completes, and the handler may call
///   [`ElementDispatcher::repeat_body`] any number of times to replay the
///   captured body through the dispatcher; nested handlers inside the body
///   are matched freshly on every replay. A non-repeating handler instead
///   sees `start` as the live start tag passes and `end` when the matching
///   end tag arrives.
/// - [`is_forwarding`](Self::is_forwarding): whether content inside this
///   handler's span that no nested handler claims is passed through to the
///   output. A non-forwarding handler produces all of its output itself,
///   typically via `repeat_body` or
///   [`ElementDispatcher::start_body`]/[`end_body`](ElementDispatcher::end_body).
///
/// [`HandlerRegistry`]: crate::registry::HandlerRegistry
pub trait ElementHandler {
    fn is_repeating(&self) -> bool {
        false
    }

    fn is_forwarding(&self) -> bool {
        true
    }

    /// Receives the element's identity once, before `start`. `matched` is
    /// whatever the winning registry predicate returned, or `None` for a
    /// namespace-fallback match.
    fn init(
        &mut self,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
        _attributes: &Attributes,
        _matched: Option<Box<dyn Any>>,
    ) -> Result<()> {
        Ok(())
    }

    fn start(
        &mut self,
        _dispatcher: &mut ElementDispatcher,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
        _attributes: &Attributes,
    ) -> Result<()> {
        Ok(())
    }

    fn end(
        &mut self,
        _dispatcher: &mut ElementDispatcher,
        _uri: &str,
        _local_name: &str,
        _qname: &str,
    ) -> Result<()> {
        Ok(())
    }
}
