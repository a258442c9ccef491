//! RESP2 wire codec for the backend commands.
//!
//! Covers only the fragment of the protocol the counter traffic needs:
//! command arrays out, the five reply kinds back. The parser is incremental
//! and returns `None` until the buffer holds one complete reply.

use super::StoreError;

/// A single reply from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Parse one reply from the front of `buf`.
///
/// Returns the reply and the number of bytes consumed, or `None` when the
/// buffer does not yet hold a full reply.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, StoreError> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Reply, usize)>, StoreError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    let kind = buf[pos];
    let Some((end, next)) = find_line(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..end];

    match kind {
        b'+' => Ok(Some((Reply::Simple(utf8_line(line)?), next))),
        b'-' => Ok(Some((Reply::Error(utf8_line(line)?), next))),
        b':' => Ok(Some((Reply::Integer(integer_line(line)?), next))),
        b'$' => {
            let len = integer_line(line)?;
            if len < 0 {
                return Ok(Some((Reply::Bulk(None), next)));
            }
            let len = len as usize;
            if buf.len() < next + len + 2 {
                return Ok(None);
            }
            if &buf[next + len..next + len + 2] != b"\r\n" {
                return Err(StoreError::Protocol(
                    "bulk reply missing terminator".to_string(),
                ));
            }
            let data = buf[next..next + len].to_vec();
            Ok(Some((Reply::Bulk(Some(data)), next + len + 2)))
        }
        b'*' => {
            let len = integer_line(line)?;
            if len < 0 {
                return Ok(Some((Reply::Array(None), next)));
            }
            let mut items = Vec::with_capacity(len as usize);
            let mut at = next;
            for _ in 0..len {
                match parse_at(buf, at)? {
                    Some((item, after)) => {
                        items.push(item);
                        at = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), at)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown reply prefix {:?}",
            other as char
        ))),
    }
}

/// Position of the next CRLF at or after `start`: (index of `\r`, index
/// after `\n`).
fn find_line(buf: &[u8], start: usize) -> Option<(usize, usize)> {
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some((i, i + 2));
        }
        i += 1;
    }
    None
}

fn utf8_line(line: &[u8]) -> Result<String, StoreError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| StoreError::Protocol("reply line is not UTF-8".to_string()))
}

fn integer_line(line: &[u8]) -> Result<i64, StoreError> {
    utf8_line(line)?
        .parse()
        .map_err(|_| StoreError::Protocol("malformed integer in reply".to_string()))
}
