use heapless::Vec;

use crate::{error::Error, MAX_DL};

/// Payload store of a session with an explicit cursor.
///
/// While sending, the cursor marks how much of the stored message has been
/// handed to frames. While receiving, stored bytes are appended and the
/// cursor follows the end of the data.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8, MAX_DL>,
    cursor: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Replaces the contents with a message to be sent.
    pub fn load(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.clear();
        self.data
            .extend_from_slice(payload)
            .map_err(|()| Error::Full)
    }

    /// Appends received bytes and moves the cursor past them.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.data
            .extend_from_slice(bytes)
            .map_err(|()| Error::Full)?;
        self.cursor = self.data.len();
        Ok(())
    }

    /// Hands out up to `max` unsent bytes and advances the cursor past them.
    pub fn take(&mut self, max: usize) -> &[u8] {
        let start = self.cursor;
        let end = (start + max).min(self.data.len());
        self.cursor = end;
        &self.data[start..end]
    }

    /// Moves the cursor back to the start without touching the contents.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Bytes not yet handed out by [`Buffer::take`].
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
