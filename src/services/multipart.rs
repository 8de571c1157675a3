//! Streaming `multipart/form-data` decoder.
//!
//! The decoder pulls request body chunks on demand and hands out one
//! [`FilePart`] at a time. A part's body is delivered through a bounded
//! channel, so a slow consumer stalls the decoder, which in turn stops
//! reading the request body. Only a header block or a boundary-sized tail is
//! ever held in the parse buffer.

use crate::services::error::UploadError;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const MAX_BOUNDARY_LEN: usize = 70;

/// Extracts the boundary from a `multipart/*` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, UploadError> {
    let mime: mime::Mime = content_type
        .parse()
        .map_err(|_| UploadError::malformed(format!("invalid content type {content_type:?}")))?;

    if mime.type_() != mime::MULTIPART {
        return Err(UploadError::malformed(format!(
            "expected a multipart content type, got {}",
            mime.essence_str()
        )));
    }

    let boundary = mime
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_string())
        .unwrap_or_default();

    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(UploadError::malformed(format!(
            "boundary must be 1 to {MAX_BOUNDARY_LEN} characters"
        )));
    }
    Ok(boundary)
}

#[derive(Debug, Clone, Copy)]
pub struct DecoderLimits {
    pub max_header_bytes: usize,
    pub part_channel_capacity: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            part_channel_capacity: 4,
        }
    }
}

enum BodyFrame {
    Data(Bytes),
    End,
    Failed(UploadError),
}

/// Body bytes of one part, in order. Ends when the part's closing boundary
/// has been seen; yields `SourceInterrupted` if the decoder goes away first.
pub struct PartBody {
    rx: mpsc::Receiver<BodyFrame>,
    done: bool,
}

impl Stream for PartBody {
    type Item = Result<Bytes, UploadError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let item = match ready!(self.rx.poll_recv(cx)) {
            Some(BodyFrame::Data(chunk)) => return Poll::Ready(Some(Ok(chunk))),
            Some(BodyFrame::End) => None,
            Some(BodyFrame::Failed(e)) => Some(Err(e)),
            None => Some(Err(UploadError::SourceInterrupted(
                "part body closed before its boundary".to_string(),
            ))),
        };
        self.done = true;
        Poll::Ready(item)
    }
}

/// A file field discovered in the body. The body can be consumed exactly once.
pub struct FilePart {
    pub field_name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub body: PartBody,
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("field_name", &self.field_name)
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Preamble,
    Headers,
    Body,
    AfterDelimiter,
    Finished,
    Failed,
}

pub struct MultipartDecoder<S> {
    source: S,
    source_done: bool,
    buffer: BytesMut,
    /// `--boundary`
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    state: DecodeState,
    current: Option<mpsc::Sender<BodyFrame>>,
    failure: Option<UploadError>,
    limits: DecoderLimits,
}

impl<S> MultipartDecoder<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(source: S, boundary: &str, limits: DecoderLimits) -> Self {
        let dash_boundary = [b"--".as_slice(), boundary.as_bytes()].concat();
        let delimiter = [CRLF, dash_boundary.as_slice()].concat();
        Self {
            source,
            source_done: false,
            buffer: BytesMut::new(),
            dash_boundary,
            delimiter,
            state: DecodeState::Preamble,
            current: None,
            failure: None,
            limits,
        }
    }

    /// Advances to the next file part.
    ///
    /// Finishes delivering the body of the previous part first, so this only
    /// resolves once that part's consumer has accepted all of its bytes (or
    /// dropped its body). `Ok(None)` means the closing boundary was reached.
    pub async fn next_part(&mut self) -> Result<Option<FilePart>, UploadError> {
        match self.advance().await {
            Ok(part) => Ok(part),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn advance(&mut self) -> Result<Option<FilePart>, UploadError> {
        loop {
            match self.state {
                DecodeState::Preamble => self.skip_preamble().await?,
                DecodeState::Headers => {
                    if let Some(part) = self.read_headers().await? {
                        return Ok(Some(part));
                    }
                }
                DecodeState::Body => self.stream_body().await?,
                DecodeState::AfterDelimiter => self.read_delimiter_suffix().await?,
                DecodeState::Finished => return Ok(None),
                DecodeState::Failed => {
                    return Err(self
                        .failure
                        .clone()
                        .unwrap_or_else(|| UploadError::malformed("decoder already failed")));
                }
            }
        }
    }

    async fn fail(&mut self, error: UploadError) -> UploadError {
        if let Some(tx) = self.current.take() {
            let _ = tx.send(BodyFrame::Failed(error.clone())).await;
        }
        self.state = DecodeState::Failed;
        self.failure = Some(error.clone());
        error
    }

    /// Pulls one more chunk into the buffer. Returns `false` at end of input.
    async fn fill(&mut self) -> Result<bool, UploadError> {
        if self.source_done {
            return Ok(false);
        }
        loop {
            match self.source.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    return Ok(true);
                }
                Some(Err(e)) => return Err(UploadError::SourceInterrupted(e.to_string())),
                None => {
                    self.source_done = true;
                    return Ok(false);
                }
            }
        }
    }

    async fn fill_or(&mut self, what: &str) -> Result<(), UploadError> {
        if self.fill().await? {
            Ok(())
        } else {
            Err(UploadError::malformed(format!(
                "body ended while reading {what}"
            )))
        }
    }

    async fn skip_preamble(&mut self) -> Result<(), UploadError> {
        loop {
            // The first boundary is either at the very start or on its own line.
            if self.buffer.starts_with(&self.dash_boundary) {
                self.buffer.advance(self.dash_boundary.len());
                self.state = DecodeState::AfterDelimiter;
                return Ok(());
            }
            if let Some(idx) = find(&self.buffer, &self.delimiter) {
                self.buffer.advance(idx + self.delimiter.len());
                self.state = DecodeState::AfterDelimiter;
                return Ok(());
            }

            if self.buffer.len() > self.limits.max_header_bytes {
                return Err(UploadError::malformed("opening boundary not found"));
            }
            self.fill_or("the opening boundary").await?;
        }
    }

    /// After `--boundary`: `--` closes the body, otherwise optional padding then CRLF.
    async fn read_delimiter_suffix(&mut self) -> Result<(), UploadError> {
        loop {
            if self.buffer.starts_with(b"--") {
                self.buffer.clear();
                self.state = DecodeState::Finished;
                return Ok(());
            }

            let padding = self
                .buffer
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
            let rest = &self.buffer[padding..];

            if rest.starts_with(CRLF) {
                self.buffer.advance(padding + CRLF.len());
                self.state = DecodeState::Headers;
                return Ok(());
            }

            let undecided = rest.is_empty() || rest == b"\r" || &self.buffer[..] == b"-";
            if !undecided {
                return Err(UploadError::malformed("unexpected bytes after boundary"));
            }
            if padding > MAX_BOUNDARY_LEN {
                return Err(UploadError::malformed("excessive padding after boundary"));
            }
            self.fill_or("a boundary line").await?;
        }
    }

    async fn read_headers(&mut self) -> Result<Option<FilePart>, UploadError> {
        let block = loop {
            // A part with no headers at all starts directly with the blank line.
            if self.buffer.starts_with(CRLF) {
                self.buffer.advance(CRLF.len());
                break Bytes::new();
            }
            if let Some(idx) = find(&self.buffer, HEADER_END) {
                let block = self.buffer.split_to(idx).freeze();
                self.buffer.advance(HEADER_END.len());
                break block;
            }
            if self.buffer.len() > self.limits.max_header_bytes {
                return Err(UploadError::malformed("part header block too large"));
            }
            self.fill_or("part headers").await?;
        };

        let headers = PartHeaders::parse(&block)?;
        self.state = DecodeState::Body;

        let Some(filename) = headers.filename else {
            // Plain form field: drained, never handed out.
            tracing::debug!("Skipping non-file field {:?}", headers.field_name);
            return Ok(None);
        };

        let (tx, rx) = mpsc::channel(self.limits.part_channel_capacity.max(1));
        self.current = Some(tx);
        Ok(Some(FilePart {
            field_name: headers.field_name,
            filename,
            content_type: headers.content_type,
            body: PartBody { rx, done: false },
        }))
    }

    async fn stream_body(&mut self) -> Result<(), UploadError> {
        loop {
            if let Some(idx) = find(&self.buffer, &self.delimiter) {
                let data = self.buffer.split_to(idx).freeze();
                self.deliver(data).await;
                self.buffer.advance(self.delimiter.len());
                if let Some(tx) = self.current.take() {
                    let _ = tx.send(BodyFrame::End).await;
                }
                self.state = DecodeState::AfterDelimiter;
                return Ok(());
            }

            // Everything except a possible partial delimiter at the tail is body.
            let keep = self.delimiter.len() - 1;
            if self.buffer.len() > keep {
                let data = self.buffer.split_to(self.buffer.len() - keep).freeze();
                self.deliver(data).await;
            }
            self.fill_or("a part body").await?;
        }
    }

    /// Sends body bytes to the open part. A consumer that went away stops
    /// receiving; the rest of its body is discarded.
    async fn deliver(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        if let Some(tx) = &self.current {
            if tx.send(BodyFrame::Data(data)).await.is_err() {
                self.current = None;
            }
        }
    }
}

#[derive(Debug, Default)]
struct PartHeaders {
    field_name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(block: &[u8]) -> Result<Self, UploadError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| UploadError::malformed("part headers are not valid UTF-8"))?;

        let mut headers = PartHeaders::default();
        let mut has_disposition = false;

        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| UploadError::malformed(format!("invalid header line {line:?}")))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(UploadError::malformed(format!("invalid header name {name:?}")));
            }
            let value = value.trim();

            if name.eq_ignore_ascii_case("content-disposition") {
                let (kind, params) = parse_header_value(value)?;
                if !kind.eq_ignore_ascii_case("form-data") {
                    return Err(UploadError::malformed(format!(
                        "unsupported content disposition {kind:?}"
                    )));
                }
                for (key, val) in params {
                    if key.eq_ignore_ascii_case("name") {
                        headers.field_name = val;
                    } else if key.eq_ignore_ascii_case("filename") {
                        headers.filename = Some(val);
                    }
                }
                has_disposition = true;
            } else if name.eq_ignore_ascii_case("content-type") {
                headers.content_type = Some(value.to_string());
            }
        }

        if !has_disposition {
            return Err(UploadError::malformed("part is missing Content-Disposition"));
        }
        Ok(headers)
    }
}

/// Splits `kind; key=value; key="quoted \"value\""` into its parts.
fn parse_header_value(value: &str) -> Result<(String, Vec<(String, String)>), UploadError> {
    let mut chars = value.chars().peekable();
    let kind: String = chars.by_ref().take_while(|c| *c != ';').collect();
    let mut params = Vec::new();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ';') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_string();
        if key.is_empty() || key.contains(';') {
            return Err(UploadError::malformed(format!("invalid header parameter in {value:?}")));
        }

        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    // Only `\"` and `\\` are escapes; Windows paths keep their separators
                    '\\' => match chars.peek() {
                        Some(&escaped) if escaped == '"' || escaped == '\\' => {
                            chars.next();
                            val.push(escaped);
                        }
                        _ => val.push('\\'),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => val.push(c),
                }
            }
            if !closed {
                return Err(UploadError::malformed(format!("unterminated quote in {value:?}")));
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ';' {
                    break;
                }
                val.push(*c);
                chars.next();
            }
            val = val.trim().to_string();
        }
        params.push((key, val));
    }

    Ok((kind.trim().to_string(), params))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const BOUNDARY: &str = "----formdata-boundary-1234";

    /// Splits `body` at the given offsets into separate source chunks.
    pub(crate) fn fragments(
        body: &[u8],
        cuts: &[usize],
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static {
        let mut pieces = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            pieces.push(Ok(Bytes::copy_from_slice(&body[start..cut])));
            start = cut;
        }
        pieces.push(Ok(Bytes::copy_from_slice(&body[start..])));
        futures::stream::iter(pieces)
    }

    pub(crate) fn file_field(name: &str, filename: &str, content: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        out.extend_from_slice(content);
        out.extend_from_slice(b"\r\n");
        out
    }

    pub(crate) fn closing() -> Vec<u8> {
        format!("--{BOUNDARY}--\r\n").into_bytes()
    }

    async fn collect_body(part: FilePart) -> Result<Vec<u8>, UploadError> {
        let mut body = part.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Drains every part concurrently with decoding, the way the coordinator does.
    async fn decode_all(
        source: impl Stream<Item = io::Result<Bytes>> + Unpin,
    ) -> Result<Vec<(String, Vec<u8>)>, UploadError> {
        let mut decoder = MultipartDecoder::new(source, BOUNDARY, DecoderLimits::default());
        let mut handles = Vec::new();
        while let Some(part) = decoder.next_part().await? {
            let name = part.filename.clone();
            handles.push(tokio::spawn(async move { (name, collect_body(part).await) }));
        }
        let mut parts = Vec::new();
        for handle in handles {
            let (name, body) = handle.await.unwrap();
            parts.push((name, body?));
        }
        Ok(parts)
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            boundary_from_content_type(&format!("multipart/form-data; boundary={BOUNDARY}"))
                .unwrap(),
            BOUNDARY
        );
        assert!(boundary_from_content_type("multipart/form-data; boundary=").is_err());
        assert!(boundary_from_content_type("multipart/form-data").is_err());
        assert!(boundary_from_content_type("application/json").is_err());
        assert!(boundary_from_content_type(&format!(
            "multipart/form-data; boundary={}",
            "x".repeat(71)
        ))
        .is_err());
    }

    #[test]
    fn test_backslash_kept_unless_escaping() {
        let (kind, params) =
            parse_header_value(r#"form-data; name="f"; filename="C:\dir\a \"b\".txt""#).unwrap();
        assert_eq!(kind, "form-data");
        assert_eq!(params[1], ("filename".to_string(), r#"C:\dir\a "b".txt"#.to_string()));
    }

    #[tokio::test]
    async fn test_field_split_across_fragments() {
        let mut body = file_field("photo", "demo.gif", b"GIF89a-binary-content");
        body.extend(closing());

        // One cut inside the boundary, one inside the Content-Disposition line.
        let header_cut = BOUNDARY.len() + 2 + 4 + 20;
        let parts = decode_all(fragments(&body, &[5, header_cut])).await.unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0, "demo.gif");
        assert_eq!(parts[0].1, b"GIF89a-binary-content");
    }

    #[tokio::test]
    async fn test_every_split_point_decodes_the_same() {
        let content = b"line one\r\nline two\r\n--not-a-boundary\r\n".to_vec();
        let mut body = file_field("files", "notes.txt", &content);
        body.extend(closing());

        for cut in 1..body.len() {
            let parts = decode_all(fragments(&body, &[cut])).await.unwrap();
            assert_eq!(parts.len(), 1, "cut at {cut}");
            assert_eq!(parts[0].1, content, "cut at {cut}");
        }
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let mut body = file_field("a", "one.bin", &[0u8, 13, 10, 45, 45, 255]);
        body.extend(file_field("b", "two.bin", b""));
        body.extend(closing());

        let cuts: Vec<usize> = (1..body.len()).collect();
        let parts = decode_all(fragments(&body, &cuts)).await.unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], ("one.bin".to_string(), vec![0u8, 13, 10, 45, 45, 255]));
        assert_eq!(parts[1], ("two.bin".to_string(), Vec::new()));
    }

    #[tokio::test]
    async fn test_preamble_fields_and_epilogue() {
        let mut body = b"this is a preamble\r\n".to_vec();
        body.extend(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nplain value\r\n")
                .into_bytes(),
        );
        body.extend(file_field("files", "kept.txt", b"kept"));
        body.extend(closing());
        body.extend(b"epilogue is ignored");

        let parts = decode_all(fragments(&body, &[])).await.unwrap();

        assert_eq!(parts, vec![("kept.txt".to_string(), b"kept".to_vec())]);
    }

    #[tokio::test]
    async fn test_header_details() {
        let body = format!(
            "--{BOUNDARY}  \r\ncontent-disposition: form-data; name=files; filename=\"we \\\"quote\\\"; ok.txt\"\r\nCONTENT-TYPE: text/plain\r\n\r\nx\r\n--{BOUNDARY}--"
        );
        let mut decoder = MultipartDecoder::new(
            fragments(body.as_bytes(), &[]),
            BOUNDARY,
            DecoderLimits::default(),
        );

        let part = decoder.next_part().await.unwrap().unwrap();
        assert_eq!(part.field_name, "files");
        assert_eq!(part.filename, "we \"quote\"; ok.txt");
        assert_eq!(part.content_type.as_deref(), Some("text/plain"));

        let handle = tokio::spawn(collect_body(part));
        assert!(decoder.next_part().await.unwrap().is_none());
        assert_eq!(handle.await.unwrap().unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_empty_multipart() {
        let body = format!("--{BOUNDARY}--\r\n");
        let parts = decode_all(fragments(body.as_bytes(), &[])).await.unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_header_line() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition form-data\r\n\r\nbody\r\n--{BOUNDARY}--\r\n"
        );
        let err = decode_all(fragments(body.as_bytes(), &[])).await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));
    }

    #[tokio::test]
    async fn test_missing_disposition() {
        let body = format!("--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nbody\r\n--{BOUNDARY}--\r\n");
        let err = decode_all(fragments(body.as_bytes(), &[])).await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));
    }

    #[tokio::test]
    async fn test_garbage_after_boundary() {
        let body = format!("--{BOUNDARY}garbage\r\n\r\n");
        let err = decode_all(fragments(body.as_bytes(), &[])).await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));
    }

    #[tokio::test]
    async fn test_missing_opening_boundary() {
        let err = decode_all(fragments(b"no boundary anywhere", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));
    }

    #[tokio::test]
    async fn test_header_block_limit() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"",
            "n".repeat(64)
        );
        let limits = DecoderLimits {
            max_header_bytes: 32,
            part_channel_capacity: 1,
        };
        let mut decoder = MultipartDecoder::new(fragments(body.as_bytes(), &[]), BOUNDARY, limits);
        let err = decoder.next_part().await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));

        // A failed decoder stays failed.
        assert!(decoder.next_part().await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_body_fails_part_and_decoder() {
        let body = file_field("files", "cut.bin", b"only half of the da");
        let truncated = &body[..body.len() - 2];

        let mut decoder =
            MultipartDecoder::new(fragments(truncated, &[]), BOUNDARY, DecoderLimits::default());
        let part = decoder.next_part().await.unwrap().unwrap();
        let handle = tokio::spawn(collect_body(part));

        let err = decoder.next_part().await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedMultipart(_)));
        assert_eq!(handle.await.unwrap().unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_source_error_interrupts_part() {
        let head = file_field("files", "drop.bin", b"partial");
        let source = futures::stream::iter(vec![
            Ok(Bytes::copy_from_slice(&head[..head.len() - 2])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ]);

        let mut decoder = MultipartDecoder::new(source, BOUNDARY, DecoderLimits::default());
        let part = decoder.next_part().await.unwrap().unwrap();
        let handle = tokio::spawn(collect_body(part));

        let err = decoder.next_part().await.unwrap_err();
        assert!(matches!(err, UploadError::SourceInterrupted(_)));
        assert!(matches!(
            handle.await.unwrap(),
            Err(UploadError::SourceInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_decoder_interrupts_part() {
        let body = file_field("files", "x.bin", b"abc");
        let mut decoder =
            MultipartDecoder::new(fragments(&body, &[]), BOUNDARY, DecoderLimits::default());
        let part = decoder.next_part().await.unwrap().unwrap();
        drop(decoder);

        assert!(matches!(
            collect_body(part).await,
            Err(UploadError::SourceInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_part_is_skipped() {
        let mut body = file_field("a", "ignored.bin", &vec![7u8; 64 * 1024]);
        body.extend(file_field("b", "wanted.bin", b"wanted"));
        body.extend(closing());

        let mut decoder =
            MultipartDecoder::new(fragments(&body, &[1000, 9000]), BOUNDARY, DecoderLimits::default());
        let first = decoder.next_part().await.unwrap().unwrap();
        drop(first);

        let second = decoder.next_part().await.unwrap().unwrap();
        assert_eq!(second.filename, "wanted.bin");
        let handle = tokio::spawn(collect_body(second));
        assert!(decoder.next_part().await.unwrap().is_none());
        assert_eq!(handle.await.unwrap().unwrap(), b"wanted");
    }

    #[tokio::test]
    async fn test_slow_consumer_stalls_source() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let content = vec![42u8; 1024 * 1024];
        let mut body = file_field("files", "big.bin", &content);
        body.extend(closing());
        let cuts: Vec<usize> = (1..body.len() / 4096).map(|i| i * 4096).collect();

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = fragments(&body, &cuts).inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                counter.fetch_add(chunk.len(), Ordering::SeqCst);
            }
        });

        let mut decoder = MultipartDecoder::new(source, BOUNDARY, DecoderLimits::default());
        let part = decoder.next_part().await.unwrap().unwrap();
        let driver = tokio::spawn(async move { decoder.next_part().await.map(|p| p.is_none()) });

        // Nobody reads the part yet: the decoder must stop pulling after a few chunks.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(pulled.load(Ordering::SeqCst) < 16 * 4096);

        let received = collect_body(part).await.unwrap();
        assert_eq!(received.len(), content.len());
        assert!(driver.await.unwrap().unwrap());
        assert_eq!(pulled.load(Ordering::SeqCst), body.len());
    }
}
