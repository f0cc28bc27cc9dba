use piece_tree::{create_line_starts, normalize_eol, EndOfLine, PieceTree, StringBuffer, CR};
use thiserror::Error;

use crate::buffer::TextBuffer;

/// A builder phase method was called out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("chunks cannot be accepted once the builder is built")]
    ReceiveAfterBuild,

    #[error("build may only be called once")]
    BuildTwice,

    #[error("create requires build to have run")]
    CreateBeforeBuild,
}

/// End-of-line handling for [`TextBufferBuilder::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EolConfig {
    /// Rewrite every terminator to the chosen EOL.
    pub normalize: bool,
    /// EOL used when the input has no terminators, or unconditionally with
    /// `force`.
    pub default: EndOfLine,
    /// Skip the majority vote and use `default`.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receiving,
    Built,
}

/// Assembles a [`TextBuffer`] from an ordered sequence of string chunks.
///
/// Phases are one-way: chunks are accepted while RECEIVING, `build` seals the
/// chunk list, `create` consumes the builder. A chunk ending in `\r` has that
/// byte withheld until the next chunk arrives, so a CRLF split across two
/// chunks is reunited before it can be indexed as two terminators.
#[derive(Debug, Default)]
pub struct TextBufferBuilder {
    chunks: Vec<StringBuffer>,
    pending_cr: bool,
    cr: usize,
    lf: usize,
    crlf: usize,
    built: bool,
}

impl TextBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase(&self) -> Phase {
        if self.built {
            Phase::Built
        } else {
            Phase::Receiving
        }
    }

    /// Accept the next chunk of input text.
    pub fn accept_chunk(&mut self, chunk: &str) -> Result<(), PhaseError> {
        if self.phase() != Phase::Receiving {
            return Err(PhaseError::ReceiveAfterBuild);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        let mut text = String::with_capacity(chunk.len() + 1);
        if self.pending_cr {
            text.push('\r');
            self.pending_cr = false;
        }
        text.push_str(chunk);
        if text.as_bytes().last() == Some(&CR) {
            text.pop();
            self.pending_cr = true;
        }
        if text.is_empty() {
            return Ok(());
        }

        let scanned = create_line_starts(&text);
        self.cr += scanned.cr;
        self.lf += scanned.lf;
        self.crlf += scanned.crlf;
        self.chunks.push(StringBuffer::from_parts(text, scanned.line_starts));
        Ok(())
    }

    /// Seal the chunk list, flushing any withheld `\r`.
    pub fn build(&mut self) -> Result<(), PhaseError> {
        if self.phase() != Phase::Receiving {
            return Err(PhaseError::BuildTwice);
        }
        self.built = true;

        if self.pending_cr {
            self.pending_cr = false;
            self.cr += 1;
            match self.chunks.last_mut() {
                Some(last) => {
                    // a \r after any byte starts a new terminator, it never
                    // extends the previous one
                    last.buffer.push('\r');
                    last.line_starts.push(last.buffer.len());
                }
                None => self.chunks.push(StringBuffer::new("\r".to_string())),
            }
        }
        if self.chunks.is_empty() {
            self.chunks.push(StringBuffer::new(String::new()));
        }
        Ok(())
    }

    /// Choose the document EOL, optionally normalize every chunk to it, and
    /// construct the text buffer. Consuming the builder makes a second
    /// `create` unrepresentable.
    pub fn create(mut self, config: EolConfig) -> Result<TextBuffer, PhaseError> {
        if self.phase() != Phase::Built {
            return Err(PhaseError::CreateBeforeBuild);
        }

        let total = self.cr + self.lf + self.crlf;
        let eol = if total == 0 || config.force {
            config.default
        } else {
            let total_cr = self.cr + self.crlf;
            if total_cr * 2 > total {
                EndOfLine::CrLf
            } else {
                EndOfLine::Lf
            }
        };

        let eol_normalized = if config.normalize {
            for chunk in &mut self.chunks {
                let normalized = normalize_eol(&chunk.buffer, eol);
                *chunk = StringBuffer::new(normalized);
            }
            true
        } else {
            false
        };

        Ok(TextBuffer::from_tree(PieceTree::new(
            self.chunks,
            eol,
            eol_normalized,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(chunks: &[&str], config: EolConfig) -> TextBuffer {
        let mut builder = TextBufferBuilder::new();
        for chunk in chunks {
            builder.accept_chunk(chunk).unwrap();
        }
        builder.build().unwrap();
        builder.create(config).unwrap()
    }

    #[test]
    fn empty_build_yields_empty_document() {
        let buffer = build(&[], EolConfig::default());
        assert_eq!(buffer.get_text(), "");
        assert_eq!(buffer.get_line_count(), 1);
    }

    #[test]
    fn crlf_split_across_chunks_counts_once() {
        let buffer = build(&["line1\r", "\nline2\n"], EolConfig::default());
        assert_eq!(buffer.get_line_count(), 3);
        assert_eq!(
            buffer.get_lines_content(),
            vec!["line1", "line2", ""]
        );
        assert_eq!(buffer.get_line_raw_content(0).unwrap(), "line1\r\n");
    }

    #[test]
    fn withheld_cr_flushes_on_build() {
        let buffer = build(&["tail\r"], EolConfig::default());
        assert_eq!(buffer.get_text(), "tail\r");
        assert_eq!(buffer.get_line_count(), 2);
    }

    #[test]
    fn lone_cr_chunks_survive() {
        let buffer = build(&["\r", "\r"], EolConfig::default());
        assert_eq!(buffer.get_text(), "\r\r");
        assert_eq!(buffer.get_line_count(), 3);
    }

    #[test]
    fn receive_after_build_is_rejected() {
        let mut builder = TextBufferBuilder::new();
        builder.accept_chunk("a").unwrap();
        builder.build().unwrap();
        assert_eq!(
            builder.accept_chunk("b"),
            Err(PhaseError::ReceiveAfterBuild)
        );
    }

    #[test]
    fn build_twice_is_rejected() {
        let mut builder = TextBufferBuilder::new();
        builder.build().unwrap();
        assert_eq!(builder.build(), Err(PhaseError::BuildTwice));
    }

    #[test]
    fn create_before_build_is_rejected() {
        let builder = TextBufferBuilder::new();
        assert_eq!(
            builder.create(EolConfig::default()).unwrap_err(),
            PhaseError::CreateBeforeBuild
        );
    }

    #[test]
    fn eol_majority_vote_prefers_crlf() {
        // totalCR = 2 of 3 terminators
        let buffer = build(
            &["a\r\nb\r\nc\n"],
            EolConfig {
                normalize: true,
                default: EndOfLine::Lf,
                force: false,
            },
        );
        assert_eq!(buffer.get_text(), "a\r\nb\r\nc\r\n");
        assert_eq!(buffer.eol(), EndOfLine::CrLf);
    }

    #[test]
    fn forced_eol_overrides_the_vote() {
        let buffer = build(
            &["a\r\nb\r\nc\n"],
            EolConfig {
                normalize: true,
                default: EndOfLine::Lf,
                force: true,
            },
        );
        assert_eq!(buffer.get_text(), "a\nb\nc\n");
        assert_eq!(buffer.eol(), EndOfLine::Lf);
    }

    #[test]
    fn lf_wins_on_ties() {
        // 1 CRLF vs 1 LF: totalCR * 2 == total, not a majority
        let buffer = build(
            &["a\r\nb\nc"],
            EolConfig {
                normalize: true,
                default: EndOfLine::Lf,
                force: false,
            },
        );
        assert_eq!(buffer.get_text(), "a\nb\nc");
    }

    #[test]
    fn normalization_is_idempotent() {
        let config = EolConfig {
            normalize: true,
            default: EndOfLine::CrLf,
            force: true,
        };
        let once = build(&["x\ry\r\nz\n"], config);
        let twice = build(&[&once.get_text()], config);
        assert_eq!(once.get_text(), twice.get_text());
    }

    #[test]
    fn no_terminators_uses_default() {
        let buffer = build(
            &["plain"],
            EolConfig {
                normalize: false,
                default: EndOfLine::CrLf,
                force: false,
            },
        );
        assert_eq!(buffer.eol(), EndOfLine::CrLf);
        assert_eq!(buffer.get_text(), "plain");
    }

    #[test]
    fn multibyte_chunks_assemble_unchanged() {
        let buffer = build(&["A", "😀B"], EolConfig::default());
        assert_eq!(buffer.get_text(), "A😀B");
        assert_eq!(buffer.get_length(), 1 + 4 + 1);
    }
}
