//! Incremental decoder for upload bodies (§4.6): `application/x-www-form-urlencoded`
//! (percent-decoded), `multipart/form-data`, and a permissive `text/plain`
//! linewise form, each driven by repeated calls to [`PostProcessor::feed`] as
//! more of the body arrives.
//!
//! Unlike [`query::Query`](crate::query::Query), which is deliberately
//! zero-copy and leaves percent-escapes undecoded, a `PostProcessor` owns a
//! small scratch buffer per key/value so it can actually decode the bytes it
//! hands back; callers that need zero-copy query-string parsing should reach
//! for `Query` instead.

use memchr::memchr;
use simdutf8::basic::from_utf8;

/// Whether a decoded event belongs to a plain form field or an uploaded file
/// (`multipart/form-data` parts with a `filename`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostEventKind {
    Field,
    File,
}

/// One decoded chunk of a streaming upload body.
///
/// `data` is a slice of the current field/file's value starting at `offset`;
/// a call with `size == 0` (`data` empty) signals that the value is complete
/// and the next event, if any, starts a new field.
#[derive(Debug)]
pub struct PostEvent<'a> {
    pub kind: PostEventKind,
    pub key: &'a [u8],
    pub filename: Option<&'a [u8]>,
    pub content_type: Option<&'a [u8]>,
    pub transfer_encoding: Option<&'a [u8]>,
    pub data: &'a [u8],
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PostError {
    #[error("unsupported content type for PostProcessor")]
    UnsupportedContentType,
    #[error("multipart/form-data is missing a boundary parameter")]
    MissingBoundary,
    #[error("key exceeded the configured buffer size ({0} bytes)")]
    KeyTooLarge(usize),
    #[error("field was not valid UTF-8")]
    InvalidUtf8,
}

enum Codec {
    UrlEncoded,
    Multipart {
        /// `--boundary`, used to find the first part.
        open: Vec<u8>,
        /// `\r\n--boundary`, used to find the end of a part's body.
        close: Vec<u8>,
    },
    PlainText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading a key (url-encoded/plain-text) or scanning for the first
    /// multipart boundary (preamble).
    Key,
    /// Streaming a value's bytes.
    Value,
    /// Multipart only: reading a part's sub-headers up to the blank line.
    PartHeaders,
    /// Multipart only: streaming a part's body up to the next boundary.
    PartBody,
    /// The terminal boundary (`--boundary--`) was seen; nothing more to emit.
    Done,
}

/// Stateful decoder consuming an upload body and producing a sequence of
/// [`PostEvent`]s. Constructed from the request's `Content-Type` and fed the
/// whole body received so far on every call to [`feed`](PostProcessor::feed)
/// (not just the newly-arrived bytes) — each call only emits the portion of
/// the buffer newly completed since the last call.
pub struct PostProcessor {
    codec: Codec,
    phase: Phase,
    consumed: usize,
    key_buf: Vec<u8>,
    key_buf_limit: usize,
    value_buf: Vec<u8>,
    current_filename: Vec<u8>,
    current_content_type: Vec<u8>,
    has_filename: bool,
    has_content_type: bool,
}

impl PostProcessor {
    /// Builds a processor for `content_type` (the request's `Content-Type`
    /// header value), bounding key buffering to `key_buf_limit` bytes
    /// (clamped to a minimum of 256 per §4.6).
    pub fn new(content_type: &[u8], key_buf_limit: usize) -> Result<Self, PostError> {
        let key_buf_limit = key_buf_limit.max(256);
        let codec = if content_type_is(content_type, b"application/x-www-form-urlencoded") {
            Codec::UrlEncoded
        } else if content_type_is(content_type, b"multipart/form-data") {
            let boundary = extract_boundary(content_type).ok_or(PostError::MissingBoundary)?;
            let mut open = Vec::with_capacity(boundary.len() + 2);
            open.extend_from_slice(b"--");
            open.extend_from_slice(&boundary);
            let mut close = Vec::with_capacity(boundary.len() + 4);
            close.extend_from_slice(b"\r\n--");
            close.extend_from_slice(&boundary);
            Codec::Multipart { open, close }
        } else if content_type_is(content_type, b"text/plain") {
            Codec::PlainText
        } else {
            return Err(PostError::UnsupportedContentType);
        };

        Ok(Self {
            codec,
            phase: Phase::Key,
            consumed: 0,
            key_buf: Vec::new(),
            key_buf_limit,
            value_buf: Vec::new(),
            current_filename: Vec::new(),
            current_content_type: Vec::new(),
            has_filename: false,
            has_content_type: false,
        })
    }

    /// Processes `body` (the entire body received so far, starting at byte
    /// 0) and invokes `on_event` for each newly-completed field/file chunk.
    pub fn feed<F: FnMut(PostEvent<'_>)>(
        &mut self,
        body: &[u8],
        mut on_event: F,
    ) -> Result<(), PostError> {
        match &self.codec {
            Codec::UrlEncoded => self.feed_pairs(body, b'&', true, &mut on_event),
            Codec::PlainText => self.feed_pairs(body, b'\n', false, &mut on_event),
            Codec::Multipart { .. } => self.feed_multipart(body, &mut on_event),
        }
    }

    fn feed_pairs<F: FnMut(PostEvent<'_>)>(
        &mut self,
        body: &[u8],
        sep: u8,
        decode: bool,
        on_event: &mut F,
    ) -> Result<(), PostError> {
        loop {
            match self.phase {
                Phase::Key => {
                    let rest = &body[self.consumed..];
                    let eq = memchr(b'=', rest);
                    let end = memchr(sep, rest);
                    let key_end = match (eq, end) {
                        (Some(eq), Some(end)) if eq < end => eq,
                        (_, Some(end)) => end,
                        (Some(eq), None) => eq,
                        (None, None) => return Ok(()), // wait for more data
                    };

                    self.key_buf.clear();
                    push_maybe_decoded(&mut self.key_buf, &rest[..key_end], decode);
                    if self.key_buf.len() > self.key_buf_limit {
                        return Err(PostError::KeyTooLarge(self.key_buf_limit));
                    }
                    if from_utf8(&self.key_buf).is_err() {
                        return Err(PostError::InvalidUtf8);
                    }

                    self.consumed += key_end;
                    if eq == Some(key_end) {
                        self.consumed += 1; // skip '='
                    }
                    self.phase = Phase::Value;
                }
                Phase::Value => {
                    let rest = &body[self.consumed..];
                    match memchr(sep, rest) {
                        Some(end) => {
                            self.value_buf.clear();
                            push_maybe_decoded(&mut self.value_buf, &rest[..end], decode);
                            if from_utf8(&self.value_buf).is_err() {
                                return Err(PostError::InvalidUtf8);
                            }
                            let size = self.value_buf.len();
                            on_event(PostEvent {
                                kind: PostEventKind::Field,
                                key: &self.key_buf,
                                filename: None,
                                content_type: None,
                                transfer_encoding: None,
                                data: &self.value_buf,
                                offset: 0,
                                size,
                            });
                            on_event(PostEvent {
                                kind: PostEventKind::Field,
                                key: &self.key_buf,
                                filename: None,
                                content_type: None,
                                transfer_encoding: None,
                                data: &[],
                                offset: size,
                                size: 0,
                            });
                            self.consumed += end + 1;
                            self.phase = Phase::Key;
                        }
                        None => return Ok(()), // wait for more data or end-of-body flush
                    }
                }
                Phase::Done | Phase::PartHeaders | Phase::PartBody => unreachable!(),
            }
        }
    }

    /// Call once after the body is fully read to flush a final value that
    /// had no trailing separator (url-encoded/plain-text only).
    pub fn finish<F: FnMut(PostEvent<'_>)>(
        &mut self,
        body: &[u8],
        mut on_event: F,
    ) -> Result<(), PostError> {
        if matches!(self.codec, Codec::Multipart { .. }) || self.phase != Phase::Value {
            return Ok(());
        }
        let rest = &body[self.consumed..];
        let decode = matches!(self.codec, Codec::UrlEncoded);
        self.value_buf.clear();
        push_maybe_decoded(&mut self.value_buf, rest, decode);
        if from_utf8(&self.value_buf).is_err() {
            return Err(PostError::InvalidUtf8);
        }
        let size = self.value_buf.len();
        on_event(PostEvent {
            kind: PostEventKind::Field,
            key: &self.key_buf,
            filename: None,
            content_type: None,
            transfer_encoding: None,
            data: &self.value_buf,
            offset: 0,
            size,
        });
        on_event(PostEvent {
            kind: PostEventKind::Field,
            key: &self.key_buf,
            filename: None,
            content_type: None,
            transfer_encoding: None,
            data: &[],
            offset: size,
            size: 0,
        });
        self.consumed = body.len();
        self.phase = Phase::Key;
        Ok(())
    }

    fn feed_multipart<F: FnMut(PostEvent<'_>)>(
        &mut self,
        body: &[u8],
        on_event: &mut F,
    ) -> Result<(), PostError> {
        // Cloned out so the loop below can still borrow `self` mutably while
        // scanning for these markers.
        let (open, close) = match &self.codec {
            Codec::Multipart { open, close } => (open.clone(), close.clone()),
            _ => unreachable!(),
        };
        let marker_len = open.len();

        loop {
            match self.phase {
                Phase::Key => {
                    // Preamble: scan for the first "--boundary\r\n" (or "--boundary--").
                    let Some(pos) = find_subslice(&body[self.consumed..], &open) else {
                        return Ok(());
                    };
                    let after = self.consumed + pos + marker_len;
                    match body.get(after..after + 2) {
                        Some(b"--") => {
                            self.phase = Phase::Done;
                            return Ok(());
                        }
                        _ => {}
                    }
                    let Some(line_end) = memchr(b'\n', &body[after..]) else {
                        return Ok(()); // need more bytes to finish the boundary line
                    };
                    self.consumed = after + line_end + 1;
                    self.phase = Phase::PartHeaders;
                }
                Phase::PartHeaders => {
                    let rest = &body[self.consumed..];
                    let Some(headers_end) = find_subslice(rest, b"\r\n\r\n") else {
                        return Ok(());
                    };
                    let headers = &rest[..headers_end];
                    self.key_buf.clear();
                    self.current_filename.clear();
                    self.current_content_type.clear();
                    self.has_filename = false;
                    self.has_content_type = false;

                    for line in headers.split(|&b| b == b'\n') {
                        let line = strip_cr(line);
                        if let Some(value) = strip_prefix_ci(line, b"content-disposition:") {
                            if let Some(name) = extract_param(value, b"name") {
                                self.key_buf.extend_from_slice(name);
                            }
                            if let Some(filename) = extract_param(value, b"filename") {
                                self.current_filename.extend_from_slice(filename);
                                self.has_filename = true;
                            }
                        } else if let Some(value) = strip_prefix_ci(line, b"content-type:") {
                            self.current_content_type
                                .extend_from_slice(trim_ascii(value));
                            self.has_content_type = true;
                        }
                    }

                    self.consumed += headers_end + 4;
                    self.phase = Phase::PartBody;
                }
                Phase::PartBody => {
                    let rest = &body[self.consumed..];
                    let needle_len = close.len();
                    match find_subslice(rest, &close) {
                        Some(end) => {
                            emit_multipart_chunk(self, &rest[..end], 0, true, on_event);
                            self.consumed += end;
                            self.phase = Phase::Key;
                        }
                        None => {
                            // Keep the tail unconsumed in case it's a partial boundary match.
                            let safe = rest.len().saturating_sub(needle_len);
                            if safe > 0 {
                                emit_multipart_chunk(self, &rest[..safe], 0, false, on_event);
                                self.consumed += safe;
                            }
                            return Ok(());
                        }
                    }
                }
                Phase::Done | Phase::Value => return Ok(()),
            }
        }
    }
}

fn emit_multipart_chunk<F: FnMut(PostEvent<'_>)>(
    proc: &mut PostProcessor,
    data: &[u8],
    offset: usize,
    done: bool,
    on_event: &mut F,
) {
    let kind = if proc.has_filename {
        PostEventKind::File
    } else {
        PostEventKind::Field
    };
    let filename = proc.has_filename.then_some(proc.current_filename.as_slice());
    let content_type = proc
        .has_content_type
        .then_some(proc.current_content_type.as_slice());

    if !data.is_empty() {
        on_event(PostEvent {
            kind,
            key: &proc.key_buf,
            filename,
            content_type,
            transfer_encoding: None,
            data,
            offset,
            size: data.len(),
        });
    }
    if done {
        on_event(PostEvent {
            kind,
            key: &proc.key_buf,
            filename,
            content_type,
            transfer_encoding: None,
            data: &[],
            offset: offset + data.len(),
            size: 0,
        });
    }
}

#[inline]
fn push_maybe_decoded(dst: &mut Vec<u8>, src: &[u8], decode: bool) {
    if !decode {
        dst.extend_from_slice(src);
        return;
    }
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'+' => {
                dst.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < src.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(src[i + 1]), hex_digit(src[i + 2])) {
                    dst.push(hi * 16 + lo);
                    i += 3;
                } else {
                    dst.push(b'%');
                    i += 1;
                }
            }
            b => {
                dst.push(b);
                i += 1;
            }
        }
    }
}

#[inline]
fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[inline]
fn content_type_is(content_type: &[u8], expected: &[u8]) -> bool {
    let head = match memchr(b';', content_type) {
        Some(pos) => &content_type[..pos],
        None => content_type,
    };
    trim_ascii(head).eq_ignore_ascii_case(expected)
}

fn extract_boundary(content_type: &[u8]) -> Option<Vec<u8>> {
    extract_param(content_type, b"boundary").map(|b| b.to_vec())
}

/// Finds a `key=value` or `key="value"` parameter (case-insensitive key) in a
/// `;`-separated header value, returning the unquoted value.
fn extract_param<'a>(value: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    for segment in value.split(|&b| b == b';') {
        let segment = trim_ascii(segment);
        let Some(eq) = memchr(b'=', segment) else {
            continue;
        };
        let (name, val) = (trim_ascii(&segment[..eq]), trim_ascii(&segment[eq + 1..]));
        if name.eq_ignore_ascii_case(key) {
            let val = if val.len() >= 2 && val[0] == b'"' && val[val.len() - 1] == b'"' {
                &val[1..val.len() - 1]
            } else {
                val
            };
            return Some(val);
        }
    }
    None
}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

#[inline]
fn trim_ascii(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(value.len());
    let end = value.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &value[start..end]
}

fn strip_prefix_ci<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() < prefix.len() || !line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(trim_ascii(&line[prefix.len()..]))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let first = needle[0];
    let mut start = 0;
    while let Some(pos) = memchr(first, &haystack[start..]) {
        let at = start + pos;
        if haystack[at..].starts_with(needle) {
            return Some(at);
        }
        start = at + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_urlencoded(body: &[u8]) -> Vec<(String, String)> {
        let mut proc = PostProcessor::new(b"application/x-www-form-urlencoded", 64).unwrap();
        let mut out = Vec::new();
        proc.feed(body, |ev| {
            if ev.size > 0 {
                out.push((
                    String::from_utf8_lossy(ev.key).into_owned(),
                    String::from_utf8_lossy(ev.data).into_owned(),
                ));
            }
        })
        .unwrap();
        proc.finish(body, |ev| {
            if ev.size > 0 {
                out.push((
                    String::from_utf8_lossy(ev.key).into_owned(),
                    String::from_utf8_lossy(ev.data).into_owned(),
                ));
            }
        })
        .unwrap();
        out
    }

    #[test]
    fn urlencoded_basic() {
        let out = collect_urlencoded(b"name=John+Doe&age=30");
        assert_eq!(out, vec![
            ("name".into(), "John Doe".into()),
            ("age".into(), "30".into()),
        ]);
    }

    #[test]
    fn urlencoded_percent_escape() {
        let out = collect_urlencoded(b"email=user%40example.com");
        assert_eq!(out, vec![("email".into(), "user@example.com".into())]);
    }

    #[test]
    fn unsupported_content_type() {
        assert_eq!(
            PostProcessor::new(b"application/json", 64).unwrap_err(),
            PostError::UnsupportedContentType
        );
    }

    #[test]
    fn urlencoded_invalid_utf8_key() {
        let mut proc = PostProcessor::new(b"application/x-www-form-urlencoded", 64).unwrap();
        assert_eq!(
            proc.feed(b"%ff%fe=1", |_| {}).unwrap_err(),
            PostError::InvalidUtf8
        );
    }

    #[test]
    fn urlencoded_invalid_utf8_value() {
        let mut proc = PostProcessor::new(b"application/x-www-form-urlencoded", 64).unwrap();
        assert_eq!(
            proc.feed(b"key=%ff%fe&", |_| {}).unwrap_err(),
            PostError::InvalidUtf8
        );
    }

    #[test]
    fn urlencoded_invalid_utf8_on_finish() {
        let mut proc = PostProcessor::new(b"application/x-www-form-urlencoded", 64).unwrap();
        let body = b"key=%ff%fe";
        proc.feed(body, |_| {}).unwrap();
        assert_eq!(proc.finish(body, |_| {}).unwrap_err(), PostError::InvalidUtf8);
    }

    #[test]
    fn multipart_missing_boundary() {
        assert_eq!(
            PostProcessor::new(b"multipart/form-data", 64).unwrap_err(),
            PostError::MissingBoundary
        );
    }

    #[test]
    fn multipart_field_and_file() {
        let body = concat!(
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"field1\"\r\n",
            "\r\n",
            "value1\r\n",
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file1\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "file contents\r\n",
            "--BOUNDARY--\r\n"
        )
        .as_bytes();

        let mut proc = PostProcessor::new(b"multipart/form-data; boundary=BOUNDARY", 64).unwrap();
        let mut events = Vec::new();
        proc.feed(body, |ev| {
            events.push((
                ev.kind,
                String::from_utf8_lossy(ev.key).into_owned(),
                ev.filename.map(|f| String::from_utf8_lossy(f).into_owned()),
                String::from_utf8_lossy(ev.data).into_owned(),
                ev.size,
            ));
        })
        .unwrap();

        let fields: Vec<_> = events
            .iter()
            .filter(|(_, _, _, data, size)| *size > 0 && !data.is_empty())
            .collect();
        assert_eq!(fields[0].1, "field1");
        assert_eq!(fields[0].3, "value1");
        assert_eq!(fields[1].0, PostEventKind::File);
        assert_eq!(fields[1].1, "file1");
        assert_eq!(fields[1].2, Some("a.txt".to_string()));
        assert_eq!(fields[1].3, "file contents");
    }

    #[test]
    fn plain_text_lines() {
        let mut proc = PostProcessor::new(b"text/plain", 64).unwrap();
        let mut out = Vec::new();
        let body = b"a=1\nb=2\n";
        proc.feed(body, |ev| {
            if ev.size > 0 {
                out.push((
                    String::from_utf8_lossy(ev.key).into_owned(),
                    String::from_utf8_lossy(ev.data).into_owned(),
                ));
            }
        })
        .unwrap();
        assert_eq!(out, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
    }
}
