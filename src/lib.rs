//! Record, replay and dispatch SAX event streams without building a tree.
//!
//! A push-based XML event stream can be consumed exactly once, in order.
//! Some consumers need more than that: a loop construct wants to process the
//! same sub-stream several times, a templating component wants to defer a
//! subtree or swap it for generated content. [`SaxTape`] makes that possible
//! by recording events into a compact multi-buffer encoding that can be
//! replayed against any receiver, any number of times; a [`Mark`] replays
//! just one element's subtree from the middle of a tape.
//!
//! On top of the tape sits [`ElementDispatcher`]: a stack-based state
//! machine that routes a live stream through [`ElementHandler`]s resolved
//! from a [`HandlerRegistry`]. A repeating handler gets its element's body
//! captured into a private tape and may replay it zero or more times, with
//! nested handlers matched freshly on every pass.
//!
//! ```
//! use saxtape::{Attributes, SaxTape, XmlReceiver, XmlWriter};
//!
//! # fn main() -> saxtape::Result<()> {
//! let mut tape = SaxTape::new();
//! tape.start_element("", "greeting", "greeting", &Attributes::new())?;
//! tape.characters("hello")?;
//! tape.end_element("", "greeting", "greeting")?;
//!
//! let mut writer = XmlWriter::new(Vec::new());
//! tape.replay(&mut writer)?;
//! assert_eq!(
//!     String::from_utf8(writer.into_inner()).unwrap(),
//!     "<greeting>hello</greeting>"
//! );
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod dispatcher;
pub mod err;
pub mod handler;
pub mod inspector;
pub mod locator;
pub mod namespace;
pub mod reader;
pub mod receiver;
pub mod registry;
pub mod tape;
pub mod writer;

pub use attributes::{Attribute, Attributes};
pub use dispatcher::ElementDispatcher;
pub use err::{Result, SaxError, TapeError};
pub use handler::ElementHandler;
pub use inspector::InspectingReceiver;
pub use locator::{LocationData, Locator, LocatorStack};
pub use namespace::NamespaceContext;
pub use reader::{read_document, read_document_from};
pub use receiver::{NullReceiver, RecordingReceiver, SaxEvent, XmlReceiver};
pub use registry::{AllMatcher, HandlerRegistry, Matcher, ResolvedHandler};
pub use tape::{Mark, SaxTape};
pub use writer::XmlWriter;
