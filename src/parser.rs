//! RESP frame parsing, built on `combine` the way the `redis-rs` crate
//! parses its own wire format.
//!
//! A `RespParser` owns a growing byte buffer. Each `recv()` on the socket
//! feeds more bytes in; `poll()` re-attempts a parse of the whole
//! accumulated buffer and, on success, drains the consumed prefix. This is
//! simpler than `combine`'s full `AnySendPartialState` machinery (which
//! avoids re-scanning already-seen bytes) at the cost of re-parsing the
//! buffered prefix on every call — acceptable here since a RESP frame is
//! never more than a few kilobytes in practice, unlike a giant streamed
//! bulk value.

use combine::parser::byte::{byte, crlf, digit};
use combine::parser::choice::choice;
use combine::parser::range::{recognize, take};
use combine::parser::repeat::{count, skip_many1};
use combine::stream::RangeStream;
use combine::{ParseError, Parser};

use crate::types::Value;

fn integer<'a, I>() -> impl Parser<I, Output = i64>
where
    I: RangeStream<Token = u8, Range = &'a [u8]>,
    I::Error: ParseError<u8, &'a [u8], I::Position>,
{
    recognize((combine::optional(byte(b'-')), skip_many1(digit()))).map(|bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .expect("digits already validated by the parser grammar")
    })
}

/// A line of arbitrary bytes terminated by `\r\n`, with the terminator
/// stripped off.
fn line<'a, I>() -> impl Parser<I, Output = &'a [u8]>
where
    I: RangeStream<Token = u8, Range = &'a [u8]>,
    I::Error: ParseError<u8, &'a [u8], I::Position>,
{
    recognize(combine::parser::repeat::skip_until(combine::attempt(crlf()))).skip(crlf())
}

fn bulk_body<'a, I>(len: i64) -> Box<dyn Parser<I, Output = Value>>
where
    I: RangeStream<Token = u8, Range = &'a [u8]> + 'a,
    I::Error: ParseError<u8, &'a [u8], I::Position>,
{
    if len < 0 {
        Box::new(combine::value(Value::Nil))
    } else {
        Box::new(
            take(len as usize)
                .skip(crlf())
                .map(|bytes: &[u8]| Value::Data(bytes.to_vec())),
        )
    }
}

combine::parser! {
    fn resp_value['a, I]()(I) -> Value
    where [I: RangeStream<Token = u8, Range = &'a [u8]>]
    {
        choice((
            byte(b'+')
                .with(line())
                .map(|s: &[u8]| Value::Status(String::from_utf8_lossy(s).into_owned())),
            byte(b'-')
                .with(line())
                .map(|s: &[u8]| Value::Error(String::from_utf8_lossy(s).into_owned())),
            byte(b':').with(integer()).skip(crlf()).map(Value::Int),
            byte(b'$')
                .with(integer())
                .skip(crlf())
                .then(|len| bulk_body(len)),
            byte(b'*').with(integer()).skip(crlf()).then(|len| {
                array_items(len).map(|items| match items {
                    Some(v) => Value::Array(v),
                    None => Value::Nil,
                })
            }),
            byte(b'>').with(integer()).skip(crlf()).then(|len| {
                array_items(len).map(|items| Value::Push(items.unwrap_or_default()))
            }),
        ))
    }
}

fn array_items<'a, I>(len: i64) -> Box<dyn Parser<I, Output = Option<Vec<Value>>>>
where
    I: RangeStream<Token = u8, Range = &'a [u8]> + 'a,
    I::Error: ParseError<u8, &'a [u8], I::Position>,
{
    if len < 0 {
        Box::new(combine::value(None))
    } else {
        Box::new(count(len as usize, resp_value()).map(Some))
    }
}

/// Parse exactly one RESP frame from the front of `buf`.
///
/// `Ok(Some((value, consumed)))`: a full frame, and how many bytes of
/// `buf` it occupied. `Ok(None)`: not enough bytes yet — the caller should
/// `recv()` more and retry. `Err`: the bytes present can never form a valid
/// frame (unknown leading byte, malformed length).
pub fn parse_one(buf: &[u8]) -> Result<Option<(Value, usize)>, String> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' | b'-' | b':' | b'$' | b'*' | b'>' => {}
        other => return Err(format!("unrecognized RESP sigil {other:#x}")),
    }

    match resp_value().parse(buf) {
        Ok((parsed, remaining)) => Ok(Some((parsed, buf.len() - remaining.len()))),
        Err(_) => Ok(None),
    }
}

/// Buffers incoming bytes and yields complete RESP frames one at a time.
#[derive(Default)]
pub struct RespParser {
    buffer: Vec<u8>,
}

impl RespParser {
    pub fn new() -> Self {
        RespParser { buffer: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Try to pull the next complete frame out of the buffered bytes.
    pub fn poll(&mut self) -> Result<Option<Value>, String> {
        match parse_one(&self.buffer)? {
            Some((value, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_reply() {
        assert_eq!(
            parse_one(b"+OK\r\n").unwrap(),
            Some((Value::Status("OK".into()), 5))
        );
    }

    #[test]
    fn parses_error_reply() {
        assert_eq!(
            parse_one(b"-ERR bad\r\n").unwrap(),
            Some((Value::Error("ERR bad".into()), 10))
        );
    }

    #[test]
    fn parses_integer_reply() {
        assert_eq!(parse_one(b":42\r\n").unwrap(), Some((Value::Int(42), 5)));
        assert_eq!(parse_one(b":-7\r\n").unwrap(), Some((Value::Int(-7), 5)));
    }

    #[test]
    fn parses_bulk_string_and_nil() {
        assert_eq!(
            parse_one(b"$3\r\nfoo\r\n").unwrap(),
            Some((Value::Data(b"foo".to_vec()), 9))
        );
        assert_eq!(parse_one(b"$-1\r\n").unwrap(), Some((Value::Nil, 5)));
    }

    #[test]
    fn parses_array_of_mixed_types() {
        let input = b"*2\r\n+OK\r\n:7\r\n";
        let (value, consumed) = parse_one(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(
            value,
            Value::Array(vec![Value::Status("OK".into()), Value::Int(7)])
        );
    }

    #[test]
    fn parses_push_type_frame() {
        let input = b">1\r\n$5\r\nhello\r\n";
        let (value, _) = parse_one(input).unwrap().unwrap();
        assert!(value.is_push());
    }

    #[test]
    fn incomplete_frame_asks_for_more_bytes() {
        assert_eq!(parse_one(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_one(b"+OK").unwrap(), None);
    }

    #[test]
    fn unrecognized_sigil_is_a_protocol_error() {
        assert!(parse_one(b"?garbage\r\n").is_err());
    }

    #[test]
    fn resp_parser_drains_consumed_bytes_across_two_feeds() {
        let mut parser = RespParser::new();
        parser.feed(b"+OK\r\n:");
        assert_eq!(parser.poll().unwrap(), Some(Value::Status("OK".into())));
        assert_eq!(parser.poll().unwrap(), None);
        parser.feed(b"9\r\n");
        assert_eq!(parser.poll().unwrap(), Some(Value::Int(9)));
    }
}
