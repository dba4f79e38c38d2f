//! On-disk record layout.
//!
//! A record file is a block of `key:value` header lines, a terminator line
//! of exactly `---`, then the raw payload with no further framing:
//!
//! ```text
//! token:<secret>
//! [expire:<unix-seconds>]
//! [mime:<string>]
//! [filename:<string>]
//! ---
//! <payload bytes>
//! ```

use crate::error::{StorageError, StorageResult};
use pasta_core::Record;
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Line that separates the header from the payload.
pub const TERMINATOR: &[u8] = b"---";

/// Headers larger than this are treated as corruption (64 KiB).
pub const MAX_HEADER_SIZE: u64 = 64 * 1024;

/// Encode the header block of a record, terminator included.
pub fn encode_header(record: &Record) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    push_line(&mut out, "token", &record.token);
    if let Some(expire_at) = record.expire_at
        && expire_at > 0
    {
        push_line(&mut out, "expire", &expire_at.to_string());
    }
    if let Some(mime) = &record.mime {
        push_line(&mut out, "mime", mime);
    }
    if let Some(filename) = &record.filename {
        push_line(&mut out, "filename", filename);
    }
    out.extend_from_slice(TERMINATOR);
    out.push(b'\n');
    out
}

fn push_line(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(key.as_bytes());
    out.push(b':');
    // A line break inside a value would end the header early.
    out.extend(value.bytes().filter(|b| *b != b'\n' && *b != b'\r'));
    out.push(b'\n');
}

/// Decode a header block from the start of `reader`.
///
/// Returns the metadata and the header length in bytes, terminator included.
/// `id` is copied into the record and used in error messages; `size` is left
/// for the caller to fill in.
pub async fn decode_header<R>(reader: &mut R, id: &str) -> StorageResult<(Record, u64)>
where
    R: AsyncBufRead + Unpin,
{
    let mut record = Record {
        id: id.to_string(),
        ..Record::default()
    };
    let mut header_len: u64 = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        header_len += n as u64;

        if n == 0 || line.last() != Some(&b'\n') {
            return Err(StorageError::malformed(id, "header terminator not found"));
        }
        if header_len > MAX_HEADER_SIZE {
            return Err(StorageError::malformed(id, "header too large"));
        }

        line.pop();
        if line == TERMINATOR {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let Some((key, value)) = text.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        match key {
            "token" => record.token = value.to_string(),
            "expire" => record.expire_at = value.parse::<i64>().ok().filter(|t| *t > 0),
            "mime" => record.mime = Some(value.to_string()).filter(|v| !v.is_empty()),
            "filename" => record.filename = Some(value.to_string()).filter(|v| !v.is_empty()),
            _ => {}
        }
    }

    Ok((record, header_len))
}

/// Decode the header of an open record file and position the file at the
/// first payload byte.
///
/// The returned record has `size` set from the file length.
pub async fn locate_body(file: File, id: &str) -> StorageResult<(Record, File)> {
    let file_len = file.metadata().await?.len();
    let mut reader = BufReader::new(file);
    let (mut record, header_len) = decode_header(&mut reader, id).await?;

    // The buffered reader may have read past the terminator.
    let mut file = reader.into_inner();
    file.seek(SeekFrom::Start(header_len)).await?;

    record.size = file_len.saturating_sub(header_len);
    Ok((record, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            id: "abcdefgh".to_string(),
            token: "ABCDEFGHijklmnop".to_string(),
            expire_at: Some(1_700_000_000),
            filename: Some("notes.txt".to_string()),
            mime: Some("text/plain".to_string()),
            size: 0,
            public: false,
        }
    }

    #[test]
    fn test_encode_full_header() {
        let header = encode_header(&sample());
        assert_eq!(
            header,
            b"token:ABCDEFGHijklmnop\nexpire:1700000000\nmime:text/plain\nfilename:notes.txt\n---\n"
        );
    }

    #[test]
    fn test_encode_omits_absent_keys() {
        let record = Record {
            token: "tok".to_string(),
            ..Record::default()
        };
        assert_eq!(encode_header(&record), b"token:tok\n---\n");
    }

    #[test]
    fn test_encode_strips_line_breaks() {
        let record = Record {
            token: "tok".to_string(),
            filename: Some("a\nexpire:1\rb".to_string()),
            ..Record::default()
        };
        assert_eq!(
            encode_header(&record),
            b"token:tok\nfilename:aexpire:1b\n---\n"
        );
    }

    #[tokio::test]
    async fn test_decode_reads_encoded_header() {
        let mut data = encode_header(&sample());
        let header_len = data.len() as u64;
        data.extend_from_slice(b"payload");

        let mut reader = &data[..];
        let (record, len) = decode_header(&mut reader, "abcdefgh").await.unwrap();
        assert_eq!(len, header_len);
        assert_eq!(record, sample());
        assert_eq!(reader, b"payload");
    }

    #[tokio::test]
    async fn test_decode_trims_and_ignores_unknown_keys() {
        let data = b"  token : abc \ncolor:blue\n:orphan\nnot a pair\nmime:text/x\r\n---\nbody";
        let mut reader = &data[..];
        let (record, len) = decode_header(&mut reader, "id").await.unwrap();
        assert_eq!(record.token, "abc");
        assert_eq!(record.mime.as_deref(), Some("text/x"));
        assert_eq!(record.expire_at, None);
        assert_eq!(len, (data.len() - 4) as u64);
    }

    #[tokio::test]
    async fn test_decode_payload_may_contain_terminator() {
        let data = b"token:abc\n---\n---\nmore";
        let mut reader = &data[..];
        let (_, len) = decode_header(&mut reader, "id").await.unwrap();
        assert_eq!(len, 14);
    }

    #[tokio::test]
    async fn test_decode_requires_exact_terminator() {
        let data = b"token:abc\n----\n- --\n";
        let mut reader = &data[..];
        let err = decode_header(&mut reader, "id").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_decode_terminator_rejects_carriage_return() {
        let data = b"token:abc\n---\r\nbody";
        let mut reader = &data[..];
        let err = decode_header(&mut reader, "id").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_decode_terminator_needs_newline() {
        let data = b"token:abc\n---";
        let mut reader = &data[..];
        let err = decode_header(&mut reader, "id").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_decode_rejects_oversized_header() {
        let mut data = Vec::new();
        while data.len() < 70 * 1024 {
            data.extend_from_slice(b"padding:xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\n");
        }
        data.extend_from_slice(b"---\n");
        let mut reader = &data[..];
        let err = decode_header(&mut reader, "id").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_locate_body_positions_after_header() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abcdefgh");
        let mut data = encode_header(&sample());
        data.extend_from_slice(b"line one\n---\nline two");
        tokio::fs::write(&path, &data).await.unwrap();

        let file = File::open(&path).await.unwrap();
        let (record, mut file) = locate_body(file, "abcdefgh").await.unwrap();
        assert_eq!(record.size, 22);

        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"line one\n---\nline two");
    }
}
