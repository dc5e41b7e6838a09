use bollard::container::LogOutput;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// TTY output, which the engine sends unframed.
    Console,
}

impl StreamKind {
    fn from_header(byte: u8) -> Self {
        match byte {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            _ => StreamKind::Console,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: StreamKind,
    pub text: String,
}

impl From<LogOutput> for LogChunk {
    fn from(out: LogOutput) -> Self {
        let (stream, message) = match out {
            LogOutput::StdIn { message } => (StreamKind::Stdin, message),
            LogOutput::StdOut { message } => (StreamKind::Stdout, message),
            LogOutput::StdErr { message } => (StreamKind::Stderr, message),
            LogOutput::Console { message } => (StreamKind::Console, message),
        };
        LogChunk {
            stream,
            text: String::from_utf8_lossy(&message).into_owned(),
        }
    }
}

/// Decode the engine's multiplexed log stream until the reader fails or ends.
///
/// Each frame is an 8-byte header (stream type, three reserved bytes, then a
/// big-endian `u32` payload length) followed by the payload. A truncated
/// trailing frame is dropped; everything decoded before it is returned in order.
pub async fn read_frames<R>(mut reader: R) -> Vec<LogChunk>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = Vec::new();
    let mut header = [0u8; HEADER_LEN];

    loop {
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as u64;
        // grow with the bytes actually received, not the declared length
        let mut payload = Vec::new();
        match (&mut reader).take(len).read_to_end(&mut payload).await {
            Ok(n) if n as u64 == len => {}
            _ => break,
        }
        chunks.push(LogChunk {
            stream: StreamKind::from_header(header[0]),
            text: String::from_utf8_lossy(&payload).into_owned(),
        });
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, text: &str) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(text.len() as u32).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out
    }

    #[tokio::test]
    async fn decodes_consecutive_frames_until_eof() {
        let mut raw = frame(1, "Starting gunicorn\n");
        raw.extend(frame(2, "warning: debug mode\n"));
        raw.extend(frame(1, "Application startup complete.\n"));

        let chunks = read_frames(raw.as_slice()).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Starting gunicorn\n");
        assert_eq!(chunks[1].stream, StreamKind::Stderr);
        assert_eq!(chunks[2].text, "Application startup complete.\n");
    }

    #[tokio::test]
    async fn truncated_frame_is_dropped() {
        let mut raw = frame(1, "complete line\n");
        let mut partial = frame(1, "cut short");
        partial.truncate(HEADER_LEN + 3);
        raw.extend(partial);

        let chunks = read_frames(raw.as_slice()).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "complete line\n");
    }

    #[tokio::test]
    async fn oversized_length_is_treated_as_truncation() {
        let mut raw = frame(2, "before\n");
        raw.extend_from_slice(&[1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        raw.extend_from_slice(b"tail");

        let chunks = read_frames(raw.as_slice()).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "before\n");
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        assert!(read_frames(&b""[..]).await.is_empty());
        assert!(read_frames(&b"\x01\x00\x00"[..]).await.is_empty());
    }

    #[test]
    fn converts_daemon_output() {
        let chunk = LogChunk::from(LogOutput::StdErr {
            message: "FATAL: password authentication failed".into(),
        });
        assert_eq!(chunk.stream, StreamKind::Stderr);
        assert!(chunk.text.starts_with("FATAL"));
    }
}
