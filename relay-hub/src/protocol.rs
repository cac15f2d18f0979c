use std::{fmt, io};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::registry::ClientId;

/// Lines the relay sends to its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// Unicast to a client right after it joins.
    Welcome { id: ClientId },
    Arrived { id: ClientId },
    Chat { origin: ClientId, text: String },
    Left { id: ClientId },
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Welcome { id } => write!(f, "you are: {id}"),
            ServerLine::Arrived { id } => write!(f, "{id} has arrived"),
            ServerLine::Chat { origin, text } => write!(f, "{origin}: {text}"),
            ServerLine::Left { id } => write!(f, "{id} has left"),
        }
    }
}

/// Newline-delimited reader over an [`AsyncRead`].
///
/// Partial lines stay buffered inside the reader, so [`LineReader::next_line`]
/// can sit in a `select!` next to other branches without losing bytes when
/// one of them wins.
pub struct LineReader<R> {
    frames: FramedRead<R, LinesCodec>,
    max_bytes: usize,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Lines whose content (terminator excluded) is longer than `max_bytes`
    /// are rejected.
    pub fn new(reader: R, max_bytes: usize) -> Self {
        // The codec counts a trailing '\r' against its limit.
        let codec = LinesCodec::new_with_max_length(max_bytes.saturating_add(1));
        Self {
            frames: FramedRead::new(reader, codec),
            max_bytes,
        }
    }

    /// Reads one line without its `\n` or `\r\n` terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Oversized lines
    /// and lines that are not valid UTF-8 fail with
    /// [`io::ErrorKind::InvalidData`].
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let line = match self.frames.next().await {
            None => return Ok(None),
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::Io(err))) => return Err(err),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                return Err(self.too_long());
            }
        };

        if line.len() > self.max_bytes {
            return Err(self.too_long());
        }
        Ok(Some(line))
    }

    fn too_long(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", self.max_bytes),
        )
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Single write of line + delimiter, flushed so peers see it right away.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
