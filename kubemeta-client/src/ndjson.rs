//! Decoding of chunked watch bodies.
//!
//! The server writes one JSON `{type, object}` frame per line. Chunk
//! boundaries carry no meaning: a frame may span several chunks and one
//! chunk may hold several frames.

use std::fmt;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use kubemeta_core::{ApiError, RawWatchEvent, WatchEvent, WatchStream};
use serde::de::DeserializeOwned;

struct FrameReader<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> FrameReader<S> {
    /// Pop the next complete, non-blank line from the buffer.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if !is_blank(&line) {
                return Some(line);
            }
        }
        None
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Decode one frame into a typed event.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<WatchEvent<T>, ApiError> {
    let raw: RawWatchEvent = serde_json::from_slice(frame)
        .map_err(|e| ApiError::invalid_payload(format!("undecodable watch frame: {}", e)))?;
    WatchEvent::try_from(raw)
}

/// Turn a chunked body into a stream of watch events.
///
/// A transport error is yielded once and ends the stream. A trailing frame
/// without a newline is still decoded when the body ends.
pub fn decode_watch_body<T, S, B, E>(body: S) -> WatchStream<T>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    let reader = FrameReader {
        body: Box::pin(body),
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.next_line() {
                return Some((decode_frame::<T>(&line), reader));
            }
            if reader.finished {
                let rest = std::mem::take(&mut reader.buffer);
                if is_blank(&rest) {
                    return None;
                }
                return Some((decode_frame::<T>(&rest), reader));
            }
            match reader.body.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.finished = true;
                    reader.buffer.clear();
                    return Some((
                        Err(ApiError::transient(format!("watch stream broke: {}", e))),
                        reader,
                    ));
                }
                None => reader.finished = true,
            }
        }
    })
    .boxed()
}
