use std::collections::VecDeque;
use std::io::{self, Read};

/// One change to the source bytes, anchored at a source offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit {
    Insert(Vec<u8>),
    Delete(u64),
}

/// Applies an offset-sorted edit table to a byte stream while it is read.
///
/// At each source offset, insertions are emitted first, then a deletion
/// starting there is skipped, then source bytes pass through. Only the
/// edit table is held in memory.
pub struct PatchedStream<R> {
    inner: R,
    edits: VecDeque<(u64, Edit)>,
    position: u64,
    pending: Vec<u8>,
    pending_pos: usize,
    skip_remaining: u64,
}

impl<R: Read> PatchedStream<R> {
    pub fn new(inner: R, mut edits: Vec<(u64, Edit)>) -> Self {
        // Stable sort keeps the caller's order for equal offsets; inserts
        // go before deletes.
        edits.sort_by_key(|(offset, edit)| (*offset, matches!(edit, Edit::Delete(_))));
        Self {
            inner,
            edits: edits.into(),
            position: 0,
            pending: Vec::new(),
            pending_pos: 0,
            skip_remaining: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn discard(&mut self) -> io::Result<bool> {
        let mut scratch = [0u8; 4096];
        let want = scratch.len().min(self.skip_remaining as usize);
        let n = self.inner.read(&mut scratch[..want])?;
        if n == 0 {
            self.skip_remaining = 0;
            return Ok(false);
        }
        self.position += n as u64;
        self.skip_remaining -= n as u64;
        Ok(true)
    }
}

impl<R: Read> Read for PatchedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pending_pos < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.pending_pos);
                buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                return Ok(n);
            }
            if self.skip_remaining > 0 {
                self.discard()?;
                continue;
            }
            if matches!(self.edits.front(), Some((offset, _)) if *offset <= self.position) {
                match self.edits.pop_front() {
                    Some((_, Edit::Insert(bytes))) => {
                        self.pending = bytes;
                        self.pending_pos = 0;
                    }
                    Some((_, Edit::Delete(len))) => self.skip_remaining = len,
                    None => {}
                }
                continue;
            }

            let limit = match self.edits.front() {
                Some((offset, _)) => buf.len().min((offset - self.position) as usize),
                None => buf.len(),
            };
            let n = self.inner.read(&mut buf[..limit])?;
            if n == 0 {
                // Insertions anchored past the end are dropped with the rest.
                self.edits.clear();
            }
            self.position += n as u64;
            return Ok(n);
        }
    }
}
