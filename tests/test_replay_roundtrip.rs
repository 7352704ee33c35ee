use fixtures::*;

use std::rc::Rc;

use pretty_assertions::assert_eq;
use saxtape::{
    Attributes, Locator, RecordingReceiver, Result, SaxEvent, SaxTape, XmlReceiver,
};

/// Feeds one event of every kind, including the edge shapes: zero-length
/// character runs and empty attribute lists.
fn feed_all_kinds(receiver: &mut dyn XmlReceiver) -> Result<()> {
    receiver.start_document()?;
    receiver.start_prefix_mapping("p", "urn:x")?;
    receiver.start_element("", "root", "root", &attrs(&[("id", "r1"), ("class", "top")]))?;
    receiver.characters("some text")?;
    receiver.characters("")?;
    receiver.ignorable_whitespace("  ")?;
    receiver.start_element("urn:x", "empty", "p:empty", &Attributes::new())?;
    receiver.end_element("urn:x", "empty", "p:empty")?;
    receiver.comment(" a comment ")?;
    receiver.processing_instruction("target", "data")?;
    receiver.skipped_entity("nbsp")?;
    receiver.start_entity("amp")?;
    receiver.end_entity("amp")?;
    receiver.start_cdata()?;
    receiver.characters("<raw>")?;
    receiver.end_cdata()?;
    receiver.end_element("", "root", "root")?;
    receiver.end_prefix_mapping("p")?;
    receiver.end_document()?;
    Ok(())
}

#[test]
fn replay_reproduces_the_original_call_sequence() {
    ensure_env_logger_initialized();

    let mut expected = RecordingReceiver::new();
    feed_all_kinds(&mut expected).unwrap();

    let mut tape = SaxTape::new();
    feed_all_kinds(&mut tape).unwrap();

    let mut replayed = RecordingReceiver::new();
    tape.replay(&mut replayed).unwrap();

    assert_eq!(replayed.events(), expected.events());
}

#[test]
fn a_tape_replays_identically_any_number_of_times() {
    ensure_env_logger_initialized();

    let mut tape = SaxTape::new();
    feed_all_kinds(&mut tape).unwrap();

    let mut first = RecordingReceiver::new();
    tape.replay(&mut first).unwrap();
    let mut second = RecordingReceiver::new();
    tape.replay(&mut second).unwrap();

    assert_eq!(first.events(), second.events());
    assert!(!first.events().is_empty());
}

#[test]
fn replay_without_location_info_delivers_no_locator() {
    let mut tape = SaxTape::new();
    tape.characters("x").unwrap();

    let mut sink = RecordingReceiver::new();
    tape.replay(&mut sink).unwrap();
    assert!(sink.locator().is_none());
}

/// Collects the locator position observed during each start-element.
struct LineProbe {
    locator: Option<Rc<dyn Locator>>,
    seen: Vec<(String, Option<u32>, Option<String>)>,
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
        let (line, system_id) = match &self.locator {
            Some(locator) => (locator.line(), locator.system_id()),
            None => (None, None),
        };
        self.seen.push((qname.to_string(), line, system_id));
        Ok(())
    }
}

#[test]
fn replay_restores_recorded_source_positions() {
    ensure_env_logger_initialized();

    let locator = Rc::new(ManualLocator::new("doc.xml"));
    let mut tape = SaxTape::new();
    tape.set_document_locator(Rc::clone(&locator) as Rc<dyn Locator>);

    tape.start_document().unwrap();
    locator.line.set(2);
    tape.start_element("", "a", "a", &Attributes::new()).unwrap();
    locator.line.set(5);
    tape.start_element("", "b", "b", &Attributes::new()).unwrap();
    tape.end_element("", "b", "b").unwrap();
    tape.end_element("", "a", "a").unwrap();
    tape.end_document().unwrap();

    let mut probe = LineProbe {
        locator: None,
        seen: Vec::new(),
    };
    tape.replay(&mut probe).unwrap();

    assert_eq!(
        probe.seen,
        vec![
            ("a".to_string(), Some(2), Some("doc.xml".to_string())),
            ("b".to_string(), Some(5), Some("doc.xml".to_string())),
        ]
    );
}

#[test]
fn locator_queries_past_the_end_answer_none() {
    // A sink may hold on to the replay locator after replay finished.
    struct KeepLocator {
        locator: Option<Rc<dyn Locator>>,
    }
    impl XmlReceiver for KeepLocator {
        fn set_document_locator(&mut self, locator: Rc<dyn Locator>) {
            self.locator = Some(locator);
        }
    }

    let locator = Rc::new(ManualLocator::new("doc.xml"));
    let mut tape = SaxTape::new();
    tape.set_document_locator(locator as Rc<dyn Locator>);
    tape.characters("x").unwrap();

    let mut sink = KeepLocator { locator: None };
    tape.replay(&mut sink).unwrap();

    let held = sink.locator.expect("replay must deliver a locator");
    // After replay the cursor sits past the last recorded position.
    assert_eq!(held.line(), None);
    assert_eq!(held.system_id(), None);
}

#[test]
fn downstream_tee_sees_events_while_recording() {
    use std::cell::RefCell;

    let downstream = Rc::new(RefCell::new(RecordingReceiver::new()));
    let mut tape = SaxTape::with_downstream(Box::new(Rc::clone(&downstream)));
    feed_all_kinds(&mut tape).unwrap();

    let mut replayed = RecordingReceiver::new();
    tape.replay(&mut replayed).unwrap();

    assert_eq!(replayed.events(), downstream.borrow().events());
    assert!(
        downstream
            .borrow()
            .events()
            .iter()
            .any(|event| matches!(event, SaxEvent::Characters { text } if text.is_empty()))
    );
}
