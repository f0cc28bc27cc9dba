use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use thiserror::Error;

use crate::buffer::TextBuffer;
use crate::buffer_builder::{EolConfig, PhaseError, TextBufferBuilder};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// Load a file into a [`TextBuffer`] through the chunked builder.
///
/// Reads 64 KiB at a time. A read boundary may split a multi-byte UTF-8
/// sequence, so the longest invalid suffix of each read is carried into the
/// next one; only complete sequences ever reach the builder.
pub fn load_from_path<P: AsRef<Path>>(path: P, config: EolConfig) -> Result<TextBuffer, LoadError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut builder = TextBufferBuilder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let mut combined = Vec::with_capacity(carry.len() + n);
        combined.extend_from_slice(&carry);
        combined.extend_from_slice(&buf[..n]);

        let valid_len = match std::str::from_utf8(&combined) {
            Ok(_) => combined.len(),
            Err(e) => e.valid_up_to(),
        };

        if valid_len > 0 {
            let chunk = std::str::from_utf8(&combined[..valid_len]).expect("valid UTF-8 prefix");
            builder.accept_chunk(chunk)?;
        }

        carry.clear();
        carry.extend_from_slice(&combined[valid_len..]);
    }

    if !carry.is_empty() {
        // a trailing broken sequence cannot be completed by further reads
        let chunk = String::from_utf8_lossy(&carry);
        builder.accept_chunk(&chunk)?;
    }

    builder.build()?;
    Ok(builder.create(config)?)
}
