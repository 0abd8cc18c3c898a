//! Streaming decompression of the response body.
//!
//! The decoder never owns more than a fixed output buffer: every call to
//! [`StreamDecoder::feed`] returns a [`DecodedChunks`] cursor that must be
//! drained before the next input chunk is accepted.

use thiserror::Error;
use xz2::stream::{Action, Status, Stream};

/// Size of the decoder output buffer.
pub const DECODE_BUFFER_SIZE: usize = 16 * 1024;

const XZ_SIGNATURE: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Errors from the compressed stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to initialize XZ decoder: {0}")]
    Init(#[source] xz2::stream::Error),

    #[error("corrupt XZ stream: {0}")]
    Corrupt(#[source] xz2::stream::Error),

    #[error("data after end of XZ stream")]
    TrailingData,

    #[error("XZ stream ended prematurely")]
    UnexpectedEnd,
}

/// Compression formats recognized by their magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Xz,
}

impl Compression {
    /// Number of bytes needed to make a classification decision.
    pub const SNIFF_LEN: usize = XZ_SIGNATURE.len();

    /// Match the start of a stream against the known signatures.
    pub fn sniff(head: &[u8]) -> Option<Compression> {
        head.starts_with(XZ_SIGNATURE).then_some(Compression::Xz)
    }
}

/// Either forwards bytes untouched or decompresses them.
pub enum StreamDecoder {
    Passthrough,
    Xz(Box<XzState>),
}

/// liblzma state plus the bounded output buffer.
pub struct XzState {
    stream: Stream,
    buffer: Box<[u8]>,
    finished: bool,
}

impl StreamDecoder {
    /// Pick the decoder for a stream from its first bytes. The decision is
    /// permanent.
    pub fn classify(head: &[u8]) -> Result<Self, DecodeError> {
        match Compression::sniff(head) {
            Some(Compression::Xz) => {
                let stream = Stream::new_stream_decoder(u64::MAX, 0).map_err(DecodeError::Init)?;
                Ok(StreamDecoder::Xz(Box::new(XzState {
                    stream,
                    buffer: vec![0u8; DECODE_BUFFER_SIZE].into_boxed_slice(),
                    finished: false,
                })))
            }
            None => Ok(StreamDecoder::Passthrough),
        }
    }

    pub fn compression(&self) -> Option<Compression> {
        match self {
            StreamDecoder::Passthrough => None,
            StreamDecoder::Xz(_) => Some(Compression::Xz),
        }
    }

    /// Accept one input chunk. The returned cursor yields decoded chunks
    /// until the input is consumed and the decoder has no pending output.
    pub fn feed<'a>(&'a mut self, input: &'a [u8]) -> DecodedChunks<'a> {
        DecodedChunks {
            decoder: self,
            input,
            pending: false,
        }
    }

    /// Check that a compressed stream reached its end marker.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        match self {
            StreamDecoder::Passthrough => Ok(()),
            StreamDecoder::Xz(state) if state.finished => Ok(()),
            StreamDecoder::Xz(state) => {
                match state.stream.process(&[], &mut state.buffer, Action::Finish) {
                    Ok(Status::StreamEnd) => {
                        state.finished = true;
                        Ok(())
                    }
                    Ok(_) => Err(DecodeError::UnexpectedEnd),
                    Err(e) => Err(DecodeError::Corrupt(e)),
                }
            }
        }
    }
}

/// Lending cursor over the output produced by one input chunk.
pub struct DecodedChunks<'a> {
    decoder: &'a mut StreamDecoder,
    input: &'a [u8],
    /// The last call filled the output buffer; liblzma may hold more.
    pending: bool,
}

impl DecodedChunks<'_> {
    /// Next decoded chunk, or `None` once the input is consumed.
    pub fn next_chunk(&mut self) -> Option<Result<&[u8], DecodeError>> {
        if self.input.is_empty() && !self.pending {
            return None;
        }

        match &mut *self.decoder {
            StreamDecoder::Passthrough => {
                let chunk = std::mem::take(&mut self.input);
                Some(Ok(chunk))
            }
            StreamDecoder::Xz(state) => {
                if state.finished {
                    self.pending = false;
                    if self.input.is_empty() {
                        return None;
                    }
                    self.input = &[];
                    return Some(Err(DecodeError::TrailingData));
                }

                let in_before = state.stream.total_in();
                let out_before = state.stream.total_out();
                let status = state
                    .stream
                    .process(self.input, &mut state.buffer, Action::Run);

                let consumed = (state.stream.total_in() - in_before) as usize;
                let produced = (state.stream.total_out() - out_before) as usize;
                self.input = &self.input[consumed..];
                self.pending = produced == state.buffer.len();

                match status {
                    Ok(Status::StreamEnd) => {
                        state.finished = true;
                    }
                    Ok(_) if consumed == 0 && produced == 0 => {
                        if self.input.is_empty() {
                            return None;
                        }
                        // No forward progress with input available.
                        self.input = &[];
                        return Some(Err(DecodeError::UnexpectedEnd));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.input = &[];
                        self.pending = false;
                        return Some(Err(DecodeError::Corrupt(e)));
                    }
                }

                Some(Ok(&state.buffer[..produced]))
            }
        }
    }
}
