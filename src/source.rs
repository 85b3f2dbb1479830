/// Sequential chunk reader for the sending side.
///
/// Splits a byte stream of known length into payload-sized chunks and flags
/// the chunk that exhausts it. An empty stream still yields one (empty)
/// final chunk so the receiver learns the stream ended; a stream that is an
/// exact multiple of the chunk size marks its last full chunk final rather
/// than appending an empty one.
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// One payload pulled from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub payload: Vec<u8>,
    pub is_final: bool,
}

#[derive(Debug)]
pub struct ChunkSource<R> {
    inner: R,
    remaining: u64,
    finished: bool,
}

impl ChunkSource<File> {
    /// Open a file and size the source from its metadata.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(ChunkSource::new(file, len))
    }
}

impl<R: Read> ChunkSource<R> {
    pub fn new(inner: R, len: u64) -> Self {
        ChunkSource {
            inner,
            remaining: len,
            finished: false,
        }
    }

    /// Bytes not yet pulled.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// `true` once the final chunk has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.finished
    }

    /// Pull the next chunk of at most `max` bytes. `None` once the final
    /// chunk has been handed out. A short read (the stream ending before its
    /// declared length) surfaces as an error.
    pub fn next_chunk(&mut self, max: usize) -> io::Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        let take = self.remaining.min(max as u64) as usize;
        let mut payload = vec![0u8; take];
        self.inner.read_exact(&mut payload)?;
        self.remaining -= take as u64;
        let is_final = self.remaining == 0;
        self.finished = is_final;
        Ok(Some(Chunk { payload, is_final }))
    }
}
