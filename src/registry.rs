use std::any::Any;
use std::rc::Rc;

use ahash::RandomState;
use hashbrown::HashMap;
use log::debug;

use crate::attributes::Attributes;
use crate::err::{Result, SaxError};
use crate::handler::ElementHandler;

/// Builds the `{uri}local-name` form used as the element lookup key.
pub fn exploded_qname(uri: &str, local_name: &str) -> String {
    if uri.is_empty() {
        local_name.to_string()
    } else {
        format!("{{{uri}}}{local_name}")
    }
}

/// Attribute predicate run against a candidate element.
///
/// A predicate answers `Some(value)` when the element matches; the value is
/// handler-specific metadata (a parsed configuration, a flag) threaded
/// through to the handler as `matched`. Predicates must be side-effect free:
/// the registry probes them speculatively, in registration order, and stops
/// at the first match.
pub trait Matcher {
    fn matches(&self, attributes: &Attributes, context: Option<&Rc<dyn Any>>)
    -> Option<Box<dyn Any>>;
}

impl<F> Matcher for F
where
    F: Fn(&Attributes, Option<&Rc<dyn Any>>) -> Option<Box<dyn Any>>,
{
    fn matches(
        &self,
        attributes: &Attributes,
        context: Option<&Rc<dyn Any>>,
    ) -> Option<Box<dyn Any>> {
        self(attributes, context)
    }
}

/// Matches unconditionally, yielding `true`. Used for registrations that
/// don't discriminate on attributes.
pub struct AllMatcher;

impl Matcher for AllMatcher {
    fn matches(
        &self,
        _attributes: &Attributes,
        _context: Option<&Rc<dyn Any>>,
    ) -> Option<Box<dyn Any>> {
        Some(Box::new(true))
    }
}

pub type HandlerFactory = Box<dyn Fn() -> Box<dyn ElementHandler>>;

struct HandlerMatcher {
    handler_id: String,
    matcher: Box<dyn Matcher>,
}

/// A handler resolved for one element occurrence: a fresh handler instance
/// plus whatever the winning predicate returned.
pub struct ResolvedHandler {
    pub handler_id: String,
    pub handler: Box<dyn ElementHandler>,
    pub matched: Option<Box<dyn Any>>,
}

impl std::fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("handler_id", &self.handler_id)
            .field("matched", &self.matched.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}

/// Associates elements with handlers across three precedence tiers: custom
/// global matchers, per-element-name matchers, then a per-namespace
/// fallback.
///
/// Handlers themselves are produced by factories registered under string
/// ids, resolved once at setup time; nothing is looked up by name in the
/// dispatch hot path. Populate the registry during setup, then share it
/// read-only (e.g. behind `Rc`) across dispatchers.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory, RandomState>,
    custom: Vec<HandlerMatcher>,
    by_name: HashMap<String, Vec<HandlerMatcher>, RandomState>,
    by_uri: HashMap<String, String, RandomState>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Registers the factory that produces handler instances for
    /// `handler_id`. One instance is created per matched element occurrence.
    pub fn register_factory<F>(&mut self, handler_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ElementHandler> + 'static,
    {
        self.factories.insert(handler_id.into(), Box::new(factory));
    }

    /// Registers a handler for elements named `(uri, local_name)`,
    /// optionally refined by an attribute predicate. Multiple handlers may
    /// share a name; the first whose predicate matches wins, in registration
    /// order. Without a predicate the registration matches unconditionally.
    pub fn register_element(
        &mut self,
        handler_id: impl Into<String>,
        uri: &str,
        local_name: &str,
        matcher: Option<Box<dyn Matcher>>,
    ) {
        let key = exploded_qname(uri, local_name);
        self.by_name.entry(key).or_default().push(HandlerMatcher {
            handler_id: handler_id.into(),
            matcher: matcher.unwrap_or_else(|| Box::new(AllMatcher)),
        });
    }

    /// Registers a namespace-wide fallback handler, consulted only when no
    /// custom or name-specific matcher claimed the element. The last
    /// registration for a namespace wins.
    pub fn register_uri(&mut self, handler_id: impl Into<String>, uri: &str) {
        self.by_uri.insert(uri.to_string(), handler_id.into());
    }

    /// Registers a custom matcher tested before all name-specific matchers,
    /// in registration order.
    pub fn register_custom(&mut self, handler_id: impl Into<String>, matcher: Box<dyn Matcher>) {
        self.custom.push(HandlerMatcher {
            handler_id: handler_id.into(),
            matcher,
        });
    }

    /// Resolves the handler for an element, or `None` when the element is
    /// not intercepted. Fails when a matched handler id has no registered
    /// factory.
    pub fn resolve(
        &self,
        uri: &str,
        local_name: &str,
        attributes: &Attributes,
        context: Option<&Rc<dyn Any>>,
    ) -> Result<Option<ResolvedHandler>> {
        // 1: custom matchers
        if let Some(resolved) = self.run_matchers(&self.custom, attributes, context)? {
            return Ok(Some(resolved));
        }

        // 2: matchers for this element name
        if let Some(matchers) = self.by_name.get(&exploded_qname(uri, local_name)) {
            if let Some(resolved) = self.run_matchers(matchers, attributes, context)? {
                return Ok(Some(resolved));
            }
        }

        // 3: namespace fallback
        if let Some(handler_id) = self.by_uri.get(uri) {
            debug!("namespace fallback `{handler_id}` claims {{{uri}}}{local_name}");
            let handler = self.instantiate(handler_id)?;
            return Ok(Some(ResolvedHandler {
                handler_id: handler_id.clone(),
                handler,
                matched: None,
            }));
        }

        Ok(None)
    }

    fn run_matchers(
        &self,
        matchers: &[HandlerMatcher],
        attributes: &Attributes,
        context: Option<&Rc<dyn Any>>,
    ) -> Result<Option<ResolvedHandler>> {
        for entry in matchers {
            if let Some(matched) = entry.matcher.matches(attributes, context) {
                debug!("handler `{}` matched", entry.handler_id);
                let handler = self.instantiate(&entry.handler_id)?;
                return Ok(Some(ResolvedHandler {
                    handler_id: entry.handler_id.clone(),
                    handler,
                    matched: Some(matched),
                }));
            }
        }
        Ok(None)
    }

    fn instantiate(&self, handler_id: &str) -> Result<Box<dyn ElementHandler>> {
        let factory = self
            .factories
            .get(handler_id)
            .ok_or_else(|| SaxError::UnknownHandler {
                id: handler_id.to_string(),
            })?;
        Ok(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl ElementHandler for Inert {}

    fn registry_with(ids: &[&str]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for id in ids {
            registry.register_factory(*id, || Box::new(Inert));
        }
        registry
    }

    #[test]
    fn custom_matchers_win_over_name_and_uri() {
        let mut registry = registry_with(&["custom", "named", "fallback"]);
        registry.register_custom("custom", Box::new(AllMatcher));
        registry.register_element("named", "urn:x", "foo", None);
        registry.register_uri("fallback", "urn:x");

        let resolved = registry
            .resolve("urn:x", "foo", &Attributes::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "custom");
    }

    #[test]
    fn name_matchers_win_over_uri_fallback() {
        let mut registry = registry_with(&["named", "fallback"]);
        registry.register_element("named", "urn:x", "foo", None);
        registry.register_uri("fallback", "urn:x");

        let resolved = registry
            .resolve("urn:x", "foo", &Attributes::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "named");

        let resolved = registry
            .resolve("urn:x", "bar", &Attributes::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "fallback");
    }

    #[test]
    fn first_matching_predicate_wins_in_registration_order() {
        let mut registry = registry_with(&["first", "second"]);
        registry.register_element(
            "first",
            "",
            "item",
            Some(Box::new(
                |attributes: &Attributes, _context: Option<&Rc<dyn Any>>| {
                    attributes
                        .value("", "pick")
                        .filter(|&v| v == "first")
                        .map(|_| Box::new(()) as Box<dyn Any>)
                },
            )),
        );
        registry.register_element("second", "", "item", None);

        let mut attributes = Attributes::new();
        attributes.push(crate::attributes::Attribute::new("pick", "first"));
        let resolved = registry
            .resolve("", "item", &attributes, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "first");

        let resolved = registry
            .resolve("", "item", &Attributes::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "second");
    }

    #[test]
    fn uri_reregistration_overwrites() {
        let mut registry = registry_with(&["old", "new"]);
        registry.register_uri("old", "urn:x");
        registry.register_uri("new", "urn:x");

        let resolved = registry
            .resolve("urn:x", "anything", &Attributes::new(), None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.handler_id, "new");
    }

    #[test]
    fn unknown_handler_id_is_a_fatal_error() {
        let mut registry = HandlerRegistry::new();
        registry.register_element("missing", "", "x", None);

        let error = registry
            .resolve("", "x", &Attributes::new(), None)
            .unwrap_err();
        assert!(matches!(error, SaxError::UnknownHandler { id } if id == "missing"));
    }

    #[test]
    fn unmatched_elements_resolve_to_none() {
        let registry = HandlerRegistry::new();
        assert!(
            registry
                .resolve("urn:x", "foo", &Attributes::new(), None)
                .unwrap()
                .is_none()
        );
    }
}
