//! Single byte-range parsing and bounded-memory delivery.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Requested range as written in a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSpec {
    /// `bytes=s-e`
    Closed { start: u64, end: u64 },
    /// `bytes=s-`
    From { start: u64 },
    /// `bytes=-n`, served as the leading bytes `0..=n`
    Leading { end: u64 },
}

impl ByteRangeSpec {
    /// Parse a `Range` header value.
    ///
    /// Anything other than a single well-formed `bytes` range yields `None`, and the
    /// caller serves the whole resource.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes=")?;
        if rest.contains(',') {
            return None;
        }
        let (start, end) = rest.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        match (start.is_empty(), end.is_empty()) {
            (true, true) => None,
            (true, false) => Some(Self::Leading {
                end: parse_position(end)?,
            }),
            (false, true) => Some(Self::From {
                start: parse_position(start)?,
            }),
            (false, false) => {
                let start = parse_position(start)?;
                let end = parse_position(end)?;
                if start > end {
                    return None;
                }
                Some(Self::Closed { start, end })
            }
        }
    }

    /// Clamp this request against a resource of `total` bytes.
    pub fn resolve(self, total: u64) -> RangeResolution {
        let unsatisfiable = RangeResolution::Unsatisfiable(UnsatisfiableRange {
            requested: self,
            total,
        });
        if total == 0 {
            return unsatisfiable;
        }
        let last = total - 1;
        match self {
            Self::Closed { start, end } if start <= last => {
                RangeResolution::Satisfiable(ByteRange::new(start, end.min(last)))
            }
            Self::From { start } if start <= last => {
                RangeResolution::Satisfiable(ByteRange::new(start, last))
            }
            Self::Leading { end } => RangeResolution::Satisfiable(ByteRange::new(0, end.min(last))),
            Self::Closed { .. } | Self::From { .. } => unsatisfiable,
        }
    }
}

fn parse_position(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Inclusive byte range already clamped to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Never true; a resolved range holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    Satisfiable(ByteRange),
    Unsatisfiable(UnsatisfiableRange),
}

/// A range that selects no bytes of a resource of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsatisfiableRange {
    pub requested: ByteRangeSpec,
    pub total: u64,
}

impl UnsatisfiableRange {
    /// `Content-Range` value for a 416 response.
    ///
    /// A closed request is echoed verbatim, anything else uses the `*` form.
    pub fn content_range(&self) -> String {
        match self.requested {
            ByteRangeSpec::Closed { start, end } => {
                format!("bytes {}-{}/{}", start, end, self.total)
            }
            _ => format!("bytes */{}", self.total),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("maximum buffer size must be positive")]
    ZeroBufferSize,
}

/// Streaming body of a range response.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Serves byte ranges from sequential readers without buffering more than
/// `max_buffer_size` bytes at a time.
///
/// Clones share the same limit; changing it affects requests that start afterwards.
#[derive(Debug, Clone)]
pub struct RangeServer {
    max_buffer_size: Arc<AtomicUsize>,
}

impl RangeServer {
    pub fn new(max_buffer_size: usize) -> Result<Self, RangeError> {
        if max_buffer_size == 0 {
            return Err(RangeError::ZeroBufferSize);
        }
        Ok(Self {
            max_buffer_size: Arc::new(AtomicUsize::new(max_buffer_size)),
        })
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_max_buffer_size(&self, size: usize) -> Result<(), RangeError> {
        if size == 0 {
            return Err(RangeError::ZeroBufferSize);
        }
        self.max_buffer_size.store(size, Ordering::Relaxed);
        Ok(())
    }

    /// Read and discard `count` bytes.
    ///
    /// Works on sources that cannot seek. Fails with `UnexpectedEof` if the source
    /// ends first.
    pub async fn skip<R>(&self, reader: &mut R, count: u64) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if count == 0 {
            return Ok(());
        }
        let chunk = (self.max_buffer_size() as u64).min(count) as usize;
        let mut scratch = vec![0u8; chunk];
        let mut remaining = count;
        while remaining > 0 {
            let want = (chunk as u64).min(remaining) as usize;
            let n = reader.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {} bytes short of range start", remaining),
                ));
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Stream at most `length` bytes from `reader`, one chunk of at most
    /// `max_buffer_size` bytes at a time.
    pub fn stream<R>(&self, reader: R, length: u64) -> ByteStream
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let chunk = self.max_buffer_size();
        stream::unfold((reader, length), move |(mut reader, remaining)| async move {
            if remaining == 0 {
                return None;
            }
            let want = (chunk as u64).min(remaining) as usize;
            let mut buf = BytesMut::zeroed(want);
            match reader.read(&mut buf).await {
                Ok(0) => Some((
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "source ended before the range was complete",
                    )),
                    (reader, 0),
                )),
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf.freeze()), (reader, remaining - n as u64)))
                }
                Err(e) => Some((Err(e), (reader, 0))),
            }
        })
        .boxed()
    }

    /// Skip to `range.start` and stream the range.
    ///
    /// The skip completes before this returns, so a failure can still become an
    /// error response instead of a truncated body.
    pub async fn open<R>(&self, mut reader: R, range: ByteRange) -> io::Result<ByteStream>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.skip(&mut reader, range.start).await?;
        Ok(self.stream(reader, range.len()))
    }
}
