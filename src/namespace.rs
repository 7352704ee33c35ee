use std::mem;

const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Tracks raw prefix/URI bindings as they are declared around elements.
///
/// Mappings staged with [`start_prefix_mapping`](Self::start_prefix_mapping)
/// become visible when the next element starts and go out of scope when that
/// element ends. This performs no resolution beyond looking up what was
/// pushed; in particular it never inspects qualified names.
#[derive(Debug, Default)]
pub struct NamespaceContext {
    pending: Vec<(String, String)>,
    scopes: Vec<Vec<(String, String)>>,
}

impl NamespaceContext {
    pub fn new() -> Self {
        NamespaceContext::default()
    }

    /// Stages a mapping for the element about to start. The empty prefix
    /// declares the default namespace.
    pub fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) {
        self.pending.push((prefix.to_string(), uri.to_string()));
    }

    pub fn start_element(&mut self) {
        let scope = mem::take(&mut self.pending);
        self.scopes.push(scope);
    }

    pub fn end_element(&mut self) {
        self.scopes.pop();
    }

    /// The in-scope URI bound to `prefix`, innermost binding first. The
    /// built-in `xml` prefix is always bound.
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_URI);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(bound, _)| bound == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Current element nesting depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}
