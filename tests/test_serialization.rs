use fixtures::*;

use std::rc::Rc;

use pretty_assertions::assert_eq;
use saxtape::{Attributes, Locator, RecordingReceiver, SaxTape, XmlReceiver};

fn round_trip(tape: &SaxTape) -> SaxTape {
    let mut bytes = Vec::new();
    tape.write_to(&mut bytes).unwrap();
    SaxTape::read_from(&mut bytes.as_slice()).unwrap()
}

fn replayed(tape: &SaxTape) -> Vec<saxtape::SaxEvent> {
    let mut sink = RecordingReceiver::new();
    tape.replay(&mut sink).unwrap();
    sink.take_events()
}

fn sample_tape() -> SaxTape {
    let mut tape = SaxTape::new();
    tape.start_document().unwrap();
    tape.start_prefix_mapping("p", "urn:x").unwrap();
    tape.start_element("", "root", "root", &attrs(&[("id", "r")]))
        .unwrap();
    tape.characters("text").unwrap();
    tape.characters("").unwrap();
    tape.comment(" note ").unwrap();
    tape.processing_instruction("pi", "data").unwrap();
    tape.start_element("urn:x", "leaf", "p:leaf", &Attributes::new())
        .unwrap();
    tape.end_element("urn:x", "leaf", "p:leaf").unwrap();
    tape.end_element("", "root", "root").unwrap();
    tape.end_prefix_mapping("p").unwrap();
    tape.end_document().unwrap();
    tape
}

#[test]
fn deserialized_tape_replays_identically() {
    ensure_env_logger_initialized();

    let tape = sample_tape();
    let restored = round_trip(&tape);

    assert_eq!(replayed(&restored), replayed(&tape));
    assert_eq!(restored.len(), tape.len());
    assert_eq!(restored.recorded_attribute_count(), tape.recorded_attribute_count());
}

#[test]
fn empty_tape_round_trips() {
    let restored = round_trip(&SaxTape::new());
    assert!(restored.is_empty());
    assert!(replayed(&restored).is_empty());
    assert!(!restored.has_location_info());
}

#[test]
fn marks_survive_serialization() {
    let mut tape = SaxTape::new();
    tape.start_element("", "root", "root", &Attributes::new())
        .unwrap();
    let mark = tape.mark(Some("target"));
    tape.start_element("", "target", "target", &attrs(&[("id", "t")]))
        .unwrap();
    tape.characters("body").unwrap();
    tape.end_element("", "target", "target").unwrap();
    tape.end_element("", "root", "root").unwrap();

    let restored = round_trip(&tape);

    // The restored tape carries the mark list...
    assert_eq!(restored.marks().len(), 1);
    assert_eq!(restored.marks()[0].id(), Some("target"));
    assert_eq!(&restored.marks()[0], &mark);

    // ...and both the restored mark and the one issued before serialization
    // replay the same sub-sequence as against the original tape.
    let mut against_original = RecordingReceiver::new();
    tape.replay_from(&mark, &mut against_original).unwrap();

    let mut against_restored = RecordingReceiver::new();
    restored
        .replay_from(&mark, &mut against_restored)
        .unwrap();

    let restored_mark = restored.marks()[0].clone();
    let mut against_restored_mark = RecordingReceiver::new();
    restored
        .replay_from(&restored_mark, &mut against_restored_mark)
        .unwrap();

    assert_eq!(against_restored.events(), against_original.events());
    assert_eq!(against_restored_mark.events(), against_original.events());
    assert!(!against_original.events().is_empty());
}

#[test]
fn location_info_and_public_id_survive_serialization() {
    ensure_env_logger_initialized();

    let locator = Rc::new(ManualLocator {
        public_id: Some("-//EXAMPLE//DTD Sample//EN".to_string()),
        ..ManualLocator::new("doc.xml")
    });

    let mut tape = SaxTape::new();
    tape.set_document_locator(Rc::clone(&locator) as Rc<dyn Locator>);
    tape.start_document().unwrap();
    locator.line.set(3);
    tape.start_element("", "a", "a", &Attributes::new()).unwrap();
    tape.end_element("", "a", "a").unwrap();
    tape.end_document().unwrap();

    let restored = round_trip(&tape);
    assert!(restored.has_location_info());
    assert_eq!(restored.public_id(), Some("-//EXAMPLE//DTD Sample//EN"));
    assert_eq!(replayed(&restored), replayed(&tape));
}

#[test]
fn truncated_input_is_a_corruption_error() {
    let mut bytes = Vec::new();
    sample_tape().write_to(&mut bytes).unwrap();
    bytes.truncate(bytes.len() / 2);

    assert!(SaxTape::read_from(&mut bytes.as_slice()).is_err());
}
