//! RFID reader adapter.
//!
//! Readers emit one tag id per line on a serial line. The port is opened as a
//! file; line settings such as the baud rate are expected to be applied to
//! the tty beforehand. Any `AsyncRead` can stand in for the port through
//! [`RfidAdapter::from_reader`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::adapter::{AdapterError, AdapterResult, DeviceAdapter, Sample};
use crate::config::RfidConnection;

type LineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

enum Port {
    Path(String),
    /// Pre-opened stream, consumed by the first `open`.
    Stream(Option<Box<dyn AsyncRead + Send + Unpin>>),
}

pub struct RfidAdapter {
    device_id: String,
    port: Port,
    baud_rate: u32,
    reader: Option<LineReader>,
    // Bytes of a line whose read timed out before the newline arrived.
    pending: Vec<u8>,
}

impl RfidAdapter {
    pub fn new(device_id: impl Into<String>, connection: &RfidConnection) -> Self {
        Self {
            device_id: device_id.into(),
            port: Port::Path(connection.port.clone()),
            baud_rate: connection.baud_rate,
            reader: None,
            pending: Vec::new(),
        }
    }

    pub fn from_reader(device_id: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            device_id: device_id.into(),
            port: Port::Stream(Some(Box::new(reader))),
            baud_rate: 0,
            reader: None,
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let line = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&line)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

/// Strip whitespace and framing control characters around a tag id.
pub fn normalize_tag(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}

#[async_trait]
impl DeviceAdapter for RfidAdapter {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> AdapterResult<()> {
        let stream: Box<dyn AsyncRead + Send + Unpin> = match &mut self.port {
            Port::Path(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .read(true)
                    .open(&*path)
                    .await
                    .map_err(|e| AdapterError::Connection(format!("{}: {}", path, e)))?;
                tracing::info!(
                    device_id = %self.device_id,
                    port = %path,
                    baud_rate = self.baud_rate,
                    "RFID reader opened"
                );
                Box::new(file)
            }
            Port::Stream(stream) => stream.take().ok_or_else(|| {
                AdapterError::Connection("reader stream already consumed".to_string())
            })?,
        };

        self.reader = Some(BufReader::new(stream));
        self.pending.clear();
        Ok(())
    }

    async fn read_next(&mut self, timeout: Duration) -> AdapterResult<Option<Sample>> {
        let reader = self.reader.as_mut().ok_or(AdapterError::NotOpen)?;

        // `read_until` appends to `pending` as bytes arrive, so a partial line
        // survives the timeout dropping the read.
        match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(AdapterError::Device(e.to_string())),
            Ok(Ok(0)) if self.pending.is_empty() => {
                Err(AdapterError::Device("reader stream closed".to_string()))
            }
            Ok(Ok(_)) => {
                let raw = self.take_line();
                let tag_id = normalize_tag(&raw);
                if tag_id.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Sample::tag(self.device_id.clone(), tag_id, raw.clone())))
            }
        }
    }

    async fn close(&mut self) {
        self.reader = None;
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SamplePayload;
    use std::io::Cursor;

    fn tag_of(sample: Sample) -> (String, String) {
        match sample.payload {
            SamplePayload::Tag { tag_id, raw } => (tag_id, raw),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_trimmed_tags() {
        let input = Cursor::new(b"  TAG001 \r\n\nTAG002\n".to_vec());
        let mut adapter = RfidAdapter::from_reader("reader_1", input);
        adapter.open().await.unwrap();

        let timeout = Duration::from_millis(50);
        let first = adapter.read_next(timeout).await.unwrap().unwrap();
        assert_eq!(tag_of(first), ("TAG001".to_string(), "  TAG001 ".to_string()));

        // Blank line is a miss.
        assert!(adapter.read_next(timeout).await.unwrap().is_none());

        let second = adapter.read_next(timeout).await.unwrap().unwrap();
        assert_eq!(tag_of(second).0, "TAG002");

        assert!(matches!(
            adapter.read_next(timeout).await,
            Err(AdapterError::Device(_))
        ));
    }

    #[tokio::test]
    async fn test_line_split_across_timeout_is_kept() {
        use tokio::io::AsyncWriteExt;

        let (mut port, reader) = tokio::io::duplex(64);
        let mut adapter = RfidAdapter::from_reader("reader_1", reader);
        adapter.open().await.unwrap();

        let timeout = Duration::from_millis(50);
        port.write_all(b"TAG").await.unwrap();
        assert!(adapter.read_next(timeout).await.unwrap().is_none());

        port.write_all(b"001\n").await.unwrap();
        let sample = adapter.read_next(timeout).await.unwrap().unwrap();
        assert_eq!(tag_of(sample).0, "TAG001");
    }

    #[tokio::test]
    async fn test_stream_can_only_be_opened_once() {
        let mut adapter = RfidAdapter::from_reader("reader_1", Cursor::new(Vec::new()));
        adapter.open().await.unwrap();
        adapter.close().await;
        assert!(!adapter.is_open());
        assert!(adapter.open().await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_missing_port_fails_open() {
        let connection = RfidConnection {
            port: "/nonexistent/ttyRFID".to_string(),
            baud_rate: 9600,
            location: String::new(),
        };
        let mut adapter = RfidAdapter::new("reader_1", &connection);
        assert!(adapter.open().await.unwrap_err().is_connection());
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("\u{2}ABC123\u{3}\r"), "ABC123");
        assert_eq!(normalize_tag("   "), "");
    }
}
