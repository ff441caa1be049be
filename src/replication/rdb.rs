use base64::prelude::*;

// The canonical empty dump, sent verbatim to a replica that requests a full
// resynchronization while the master holds no persisted state.
const EMPTY_SNAPSHOT_BASE64: &[u8] = b"UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

pub fn empty_snapshot() -> Vec<u8> {
    BASE64_STANDARD
        .decode(EMPTY_SNAPSHOT_BASE64)
        .expect("not a valid base64 encoded empty dump")
}

/// Frames a dump for the snapshot transfer: `$<len>\r\n<bytes>`, with no
/// trailing CRLF.
pub fn encode_snapshot_frame(rdb: &[u8]) -> Vec<u8> {
    [b"$", rdb.len().to_string().as_bytes(), b"\r\n", rdb].concat()
}
