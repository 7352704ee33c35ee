use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A provider of source positions, queried by sinks while events are being
/// delivered. All getters answer `None` when the information is unknown.
///
/// A locator is handed to a sink through
/// [`XmlReceiver::set_document_locator`](crate::receiver::XmlReceiver::set_document_locator)
/// before the first event. Replaying a tape that was recorded with location
/// information delivers a fresh locator that tracks the replay position.
pub trait Locator {
    fn public_id(&self) -> Option<String> {
        None
    }
    fn system_id(&self) -> Option<String> {
        None
    }
    fn line(&self) -> Option<u32> {
        None
    }
    fn column(&self) -> Option<u32> {
        None
    }
}

/// Owned snapshot of a locator, taken when an error is wrapped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationData {
    pub system_id: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl LocationData {
    pub fn from_locator(locator: &dyn Locator) -> Self {
        LocationData {
            system_id: locator.system_id(),
            line: locator.line(),
            column: locator.column(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.system_id.is_some() || self.line.is_some()
    }
}

impl fmt::Display for LocationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.system_id, self.line, self.column) {
            (Some(system_id), Some(line), Some(column)) => {
                write!(f, "{system_id}:{line}:{column}")
            }
            (Some(system_id), Some(line), None) => write!(f, "{system_id}:{line}"),
            (Some(system_id), None, _) => write!(f, "{system_id}"),
            (None, Some(line), Some(column)) => write!(f, "line {line}, column {column}"),
            (None, Some(line), None) => write!(f, "line {line}"),
            (None, None, _) => write!(f, "unknown location"),
        }
    }
}

/// A stack of locator providers that answers queries from its top entry.
///
/// A reentrant body replay carries its own embedded location stream: the
/// replay pushes a locator on entry and the dispatcher pops it once the body
/// has been fully replayed, so position reporting always reflects the
/// innermost active stream and is restored when the replay returns. Kept as
/// an explicit stack so that independent dispatchers never share state.
#[derive(Default)]
pub struct LocatorStack {
    stack: RefCell<Vec<Rc<dyn Locator>>>,
}

impl LocatorStack {
    pub fn new() -> Self {
        LocatorStack::default()
    }

    pub fn push(&self, locator: Rc<dyn Locator>) {
        self.stack.borrow_mut().push(locator);
    }

    pub fn pop(&self) -> Option<Rc<dyn Locator>> {
        self.stack.borrow_mut().pop()
    }

    pub fn len(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.borrow().is_empty()
    }

    fn top(&self) -> Option<Rc<dyn Locator>> {
        self.stack.borrow().last().cloned()
    }
}

impl Locator for LocatorStack {
    fn public_id(&self) -> Option<String> {
        self.top().and_then(|locator| locator.public_id())
    }

    fn system_id(&self) -> Option<String> {
        self.top().and_then(|locator| locator.system_id())
    }

    fn line(&self) -> Option<u32> {
        self.top().and_then(|locator| locator.line())
    }

    fn column(&self) -> Option<u32> {
        self.top().and_then(|locator| locator.column())
    }
}

impl fmt::Debug for LocatorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocatorStack")
            .field("depth", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLocator {
        line: u32,
    }

    impl Locator for FixedLocator {
        fn line(&self) -> Option<u32> {
            Some(self.line)
        }

        fn system_id(&self) -> Option<String> {
            Some("fixed.xml".to_string())
        }
    }

    #[test]
    fn stack_answers_from_top_entry() {
        let stack = LocatorStack::new();
        assert_eq!(stack.line(), None);

        stack.push(Rc::new(FixedLocator { line: 3 }));
        stack.push(Rc::new(FixedLocator { line: 7 }));
        assert_eq!(stack.line(), Some(7));

        stack.pop();
        assert_eq!(stack.line(), Some(3));
    }

    #[test]
    fn location_data_display() {
        let location = LocationData {
            system_id: Some("a.xml".to_string()),
            line: Some(4),
            column: Some(11),
        };
        assert_eq!(location.to_string(), "a.xml:4:11");
        assert_eq!(LocationData::default().to_string(), "unknown location");
    }
}
