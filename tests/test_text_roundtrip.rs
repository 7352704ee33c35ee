use fixtures::*;

use pretty_assertions::assert_eq;
use saxtape::{SaxTape, XmlWriter, read_document};

fn through_tape(source: &str) -> String {
    let mut tape = SaxTape::new();
    read_document(source, &mut tape).unwrap();

    let mut writer = XmlWriter::new(Vec::new());
    tape.replay(&mut writer).unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

fn through_serialized_tape(source: &str) -> String {
    let mut tape = SaxTape::new();
    read_document(source, &mut tape).unwrap();

    let mut bytes = Vec::new();
    tape.write_to(&mut bytes).unwrap();
    let restored = SaxTape::read_from(&mut bytes.as_slice()).unwrap();

    let mut writer = XmlWriter::new(Vec::new());
    restored.replay(&mut writer).unwrap();
    String::from_utf8(writer.into_inner()).unwrap()
}

#[test]
fn markup_survives_recording_and_replay() {
    ensure_env_logger_initialized();

    let source = r#"<catalog><book id="1">Dune</book><book id="2">Solaris</book></catalog>"#;
    assert_eq!(through_tape(source), source);
}

#[test]
fn markup_survives_a_serialized_round_trip() {
    ensure_env_logger_initialized();

    let source = r#"<catalog><book id="1">Dune</book></catalog>"#;
    assert_eq!(through_serialized_tape(source), source);
}

#[test]
fn namespaces_comments_and_pis_come_back_out() {
    let source = concat!(
        r#"<?xml-stylesheet href="a.css"?>"#,
        r#"<p:doc xmlns:p="urn:x"><!-- note --><p:item kind="a">text</p:item></p:doc>"#,
    );
    insta::assert_snapshot!(
        through_tape(source),
        @r#"<?xml-stylesheet href="a.css"?><p:doc xmlns:p="urn:x"><!-- note --><p:item kind="a">text</p:item></p:doc>"#
    );
}

#[test]
fn cdata_sections_are_preserved_through_the_tape() {
    let source = "<r><![CDATA[if (a < b) { run(); }]]></r>";
    assert_eq!(through_tape(source), source);
}
