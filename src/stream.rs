use futures_util::{stream::BoxStream, StreamExt};

use bytes::Bytes;

use crate::transport::TransportFailure;

/// UTF-8 decoder that carries incomplete multi-byte sequences across chunk
/// boundaries. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // valid_up_to marks a char boundary.
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush a trailing incomplete sequence.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Read `chunks` to the end, calling `on_chunk(chunk, accumulated)` for every
/// non-empty decoded chunk in arrival order. Returns the accumulated text.
pub(crate) async fn read_incremental<F>(
    mut chunks: BoxStream<'static, Result<Bytes, TransportFailure>>,
    mut on_chunk: F,
) -> Result<String, TransportFailure>
where
    F: FnMut(&str, &str),
{
    let mut decoder = ChunkDecoder::default();
    let mut accumulated = String::new();
    while let Some(chunk) = chunks.next().await {
        let text = decoder.decode(&chunk?);
        if text.is_empty() {
            continue;
        }
        accumulated.push_str(&text);
        on_chunk(&text, &accumulated);
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        accumulated.push_str(&tail);
        on_chunk(&tail, &accumulated);
    }
    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn chunks(parts: Vec<&'static [u8]>) -> BoxStream<'static, Result<Bytes, TransportFailure>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p)))).boxed()
    }

    #[tokio::test]
    async fn reports_each_chunk_with_running_total() {
        let mut seen = Vec::new();
        let full = read_incremental(chunks(vec![&b"a"[..], &b"b"[..], &b"c"[..]]), |chunk, all| {
            seen.push((chunk.to_string(), all.to_string()));
        })
        .await
        .expect("stream");
        assert_eq!(full, "abc");
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "ab".to_string()),
                ("c".to_string(), "abc".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn split_multibyte_chars_are_reassembled() {
        // "é" is 0xC3 0xA9
        let mut seen = Vec::new();
        let full = read_incremental(chunks(vec![&b"caf\xC3"[..], &b"\xA9!"[..]]), |chunk, _| {
            seen.push(chunk.to_string());
        })
        .await
        .unwrap();
        assert_eq!(full, "café!");
        assert_eq!(seen, vec!["caf", "é!"]);
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(TransportFailure::Body {
                message: "reset".into(),
            }),
        ])
        .boxed();
        let err = read_incremental(failing, |_, _| {}).await.unwrap_err();
        assert!(matches!(err, TransportFailure::Body { .. }));
    }

    #[test]
    fn invalid_bytes_become_replacement_chars() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xE2\x82"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
