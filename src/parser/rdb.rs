use super::resp::{find_first_crlf, ParseError, Result};

#[derive(Debug)]
pub struct RdbParseResult {
    pub bytes: Vec<u8>,
    pub len: usize,
}

/// Parses the snapshot transfer frame: `$<len>\r\n<bytes>` with NO trailing
/// CRLF, used exclusively for the RDB payload that follows FULLRESYNC.
pub fn parse_rdb_payload(message: &[u8]) -> Result<RdbParseResult> {
    if message.is_empty() {
        return Err(ParseError::Incomplete);
    }
    if message[0] != b'$' {
        return Err(ParseError::Malformed);
    }
    let crlf = find_first_crlf(message).ok_or(ParseError::Incomplete)?;
    let n = std::str::from_utf8(&message[1..crlf])?
        .parse::<usize>()
        .map_err(|_| ParseError::Malformed)?;
    let rdb_start = crlf + 2;
    if rdb_start + n > message.len() {
        return Err(ParseError::Incomplete);
    }
    Ok(RdbParseResult {
        bytes: message[rdb_start..rdb_start + n].to_vec(),
        len: rdb_start + n,
    })
}
