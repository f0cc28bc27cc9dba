//! Integration tests for realistic editing sequences.
//!
//! Deterministic sequences first, then property tests driving random
//! insert/delete streams against a naive `String` model. The tree's own
//! structural checker runs inside every mutation in debug builds, so these
//! tests also exercise the red-black and aggregate invariants.

use piece_tree::split_lines;
use text_buffer::{EolConfig, TextBuffer, TextBufferBuilder};

fn buffer_from_chunks(chunks: &[&str]) -> TextBuffer {
    let mut builder = TextBufferBuilder::new();
    for chunk in chunks {
        builder.accept_chunk(chunk).unwrap();
    }
    builder.build().unwrap();
    builder.create(EolConfig::default()).unwrap()
}

#[test]
fn type_a_paragraph_then_rewrite_it() {
    let mut buf = TextBuffer::from("");

    buf.insert(0, "The quick fox\n").unwrap();
    let end = buf.get_length();
    buf.insert(end, "jumps over the dog\n").unwrap();

    // correction passes
    buf.insert(10, "brown ").unwrap();
    let offset = buf.get_text().find("the dog").unwrap();
    buf.insert(offset + 4, "lazy ").unwrap();

    assert_eq!(
        buf.get_lines_content(),
        vec!["The quick brown fox", "jumps over the lazy dog", ""]
    );

    // delete the second line including its terminator
    let start = buf.get_offset_at(1, 0);
    let raw = buf.get_line_raw_length(1).unwrap();
    buf.delete(start, raw).unwrap();
    assert_eq!(buf.get_lines_content(), vec!["The quick brown fox", ""]);
}

#[test]
fn split_and_rejoin_lines() {
    let mut buf = TextBuffer::from("helloworld");

    buf.insert(5, "\n").unwrap();
    assert_eq!(buf.get_line_count(), 2);
    assert_eq!(buf.get_lines_content(), vec!["hello", "world"]);

    buf.delete(5, 1).unwrap();
    assert_eq!(buf.get_line_count(), 1);
    assert_eq!(buf.get_text(), "helloworld");
}

#[test]
fn interleaved_edits_keep_line_reads_consistent() {
    let mut buf = buffer_from_chunks(&["alpha\r", "\nbeta\n", "gamma"]);
    let mut model = String::from("alpha\r\nbeta\ngamma");
    assert_eq!(buf.get_text(), model);

    let script: &[(usize, &str, usize)] = &[
        // (offset, insert text, delete count) applied insert-then-delete
        (5, " one", 0),
        (0, "", 3),
        (8, "two\r\n", 0),
        (4, "", 6),
        (0, "\r\n", 0),
    ];
    for &(offset, text, del) in script {
        if !text.is_empty() {
            buf.insert(offset, text).unwrap();
            model.insert_str(offset, text);
        }
        if del > 0 {
            buf.delete(offset, del).unwrap();
            model.replace_range(offset..offset + del, "");
        }
        assert_eq!(buf.get_text(), model);
        assert_eq!(buf.get_line_count(), split_lines(&model).len());
        for line in 0..buf.get_line_count() {
            assert_eq!(
                buf.get_line_content(line).unwrap(),
                split_lines(&model)[line],
                "line {line} diverged"
            );
        }
    }
}

#[test]
fn offset_position_round_trip_over_every_offset() {
    let buf = buffer_from_chunks(&["ab\r\nc", "d\re\nf"]);
    for offset in 0..=buf.get_length() {
        let pos = buf.get_position_at(offset);
        let back = buf.get_offset_at(pos.line, pos.column);
        assert_eq!(back, offset, "round trip failed at offset {offset}");
    }
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    // Text biased towards terminator-heavy content, CRLF splits included.
    fn edit_text() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                4 => (b'a'..=b'z').prop_map(|c| c as char),
                1 => Just('\n'),
                1 => Just('\r'),
                1 => Just('é'),
            ],
            0..12,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    #[derive(Debug, Clone)]
    enum Operation {
        Insert { at: usize, text: String },
        Delete { at: usize, count: usize },
    }

    fn operations() -> impl Strategy<Value = Vec<Operation>> {
        prop::collection::vec(
            prop_oneof![
                3 => (any::<prop::sample::Index>(), edit_text())
                    .prop_map(|(at, text)| Operation::Insert {
                        at: at.index(usize::MAX),
                        text,
                    }),
                2 => (any::<prop::sample::Index>(), 1usize..16)
                    .prop_map(|(at, count)| Operation::Delete {
                        at: at.index(usize::MAX),
                        count,
                    }),
            ],
            0..40,
        )
    }

    /// Clamp a byte offset onto a char boundary of `model` within `0..=len`.
    fn snap(model: &str, at: usize) -> usize {
        let mut offset = at % (model.len() + 1);
        while !model.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    proptest! {
        #[test]
        fn random_edits_match_string_model(ops in operations()) {
            let mut buf = TextBuffer::from("");
            let mut model = String::new();

            for op in ops {
                match op {
                    Operation::Insert { at, text } => {
                        let offset = snap(&model, at);
                        buf.insert(offset, &text).unwrap();
                        model.insert_str(offset, &text);
                    }
                    Operation::Delete { at, count } => {
                        let offset = snap(&model, at);
                        let mut end = (offset + count).min(model.len());
                        while !model.is_char_boundary(end) {
                            end -= 1;
                        }
                        buf.delete(offset, end - offset).unwrap();
                        model.replace_range(offset..end, "");
                    }
                }

                prop_assert_eq!(buf.get_text(), model.clone());
                let expected_lines = split_lines(&model);
                prop_assert_eq!(buf.get_line_count(), expected_lines.len());
                prop_assert_eq!(buf.get_lines_content(), expected_lines);
            }
        }

        #[test]
        fn per_line_reads_match_string_model(ops in operations()) {
            let mut buf = TextBuffer::from("seed\r\ncontent\n");
            let mut model = String::from("seed\r\ncontent\n");

            for op in ops {
                match op {
                    Operation::Insert { at, text } => {
                        let offset = snap(&model, at);
                        buf.insert(offset, &text).unwrap();
                        model.insert_str(offset, &text);
                    }
                    Operation::Delete { at, count } => {
                        let offset = snap(&model, at);
                        let mut end = (offset + count).min(model.len());
                        while !model.is_char_boundary(end) {
                            end -= 1;
                        }
                        buf.delete(offset, end - offset).unwrap();
                        model.replace_range(offset..end, "");
                    }
                }
            }

            let expected_lines = split_lines(&model);
            prop_assert_eq!(buf.get_line_count(), expected_lines.len());
            for (line, expected) in expected_lines.iter().enumerate() {
                prop_assert_eq!(&buf.get_line_content(line).unwrap(), expected);
                prop_assert_eq!(
                    buf.get_line_length(line).unwrap(),
                    expected.len(),
                    "length of line {}",
                    line
                );
            }

            let mut rebuilt = String::new();
            for line in 0..buf.get_line_count() {
                rebuilt.push_str(&buf.get_line_raw_content(line).unwrap());
            }
            prop_assert_eq!(rebuilt, model);
        }

        #[test]
        fn insert_then_delete_is_identity(at in any::<prop::sample::Index>(), text in edit_text()) {
            let mut buf = TextBuffer::from("fixed\r\npoint\rcontent\n");
            let before = buf.get_text();
            let offset = snap(&before, at.index(usize::MAX));
            buf.insert(offset, &text).unwrap();
            buf.delete(offset, text.len()).unwrap();
            prop_assert_eq!(buf.get_text(), before);
        }

        #[test]
        fn offset_position_round_trip(ops in operations()) {
            let mut buf = TextBuffer::from("a\r\nb\rc\nd");
            let mut model = String::from("a\r\nb\rc\nd");
            for op in ops {
                match op {
                    Operation::Insert { at, text } => {
                        let offset = snap(&model, at);
                        buf.insert(offset, &text).unwrap();
                        model.insert_str(offset, &text);
                    }
                    Operation::Delete { at, count } => {
                        let offset = snap(&model, at);
                        let mut end = (offset + count).min(model.len());
                        while !model.is_char_boundary(end) {
                            end -= 1;
                        }
                        buf.delete(offset, end - offset).unwrap();
                        model.replace_range(offset..end, "");
                    }
                }
            }

            for offset in 0..=buf.get_length() {
                let pos = buf.get_position_at(offset);
                prop_assert_eq!(
                    buf.get_offset_at(pos.line, pos.column),
                    offset,
                    "round trip at offset {}",
                    offset
                );
            }
        }
    }
}
