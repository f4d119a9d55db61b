//! PDF lexer and object parser.
//!
//! Tokenizes PDF syntax (ISO 32000-1 §7.2–7.3) and assembles tokens into
//! [`Object`] values by recursive descent. Indirect objects (`N G obj …
//! endobj`) including stream payloads are parsed by [`parse_indirect_object`].
//!
//! Stream lengths: when `/Length` is a direct integer it is trusted; when it
//! is an indirect reference the payload boundary is found by scanning for the
//! `endstream` keyword, which is what forgiving readers do in practice.

use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    combinator::opt,
    sequence::tuple,
    IResult,
};
use std::collections::HashMap;

/// True for PDF whitespace characters (ISO 32000-1 Table 1).
#[inline]
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// True for PDF delimiter characters (ISO 32000-1 Table 2).
#[inline]
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Skip whitespace and comments (`%` to end of line).
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let trimmed = match take_while::<_, _, nom::error::Error<&[u8]>>(is_whitespace)(input) {
            Ok((rest, _)) => rest,
            Err(_) => input,
        };
        if trimmed.first() == Some(&b'%') {
            let (rest, _) = take_till::<_, _, nom::error::Error<&[u8]>>(|c| {
                c == b'\r' || c == b'\n'
            })(trimmed)
            .unwrap_or((trimmed, &[]));
            input = rest;
        } else {
            return trimmed;
        }
    }
}

fn parse_err(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Fail))
}

/// Parse a signed integer or real number.
fn number(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, (sign, int_part, frac_part)) = tuple((
        opt(alt((tag("+"), tag("-")))),
        take_while(|c: u8| c.is_ascii_digit()),
        opt(tuple((tag("."), take_while(|c: u8| c.is_ascii_digit())))),
    ))(input)?;

    let frac_empty = frac_part.as_ref().map(|(_, f)| f.is_empty()).unwrap_or(true);
    if int_part.is_empty() && frac_empty {
        return Err(parse_err(input));
    }

    let negative = sign == Some(b"-".as_ref());
    match frac_part {
        None => {
            let mut value: i64 = 0;
            for &d in int_part {
                value = value.wrapping_mul(10).wrapping_add((d - b'0') as i64);
            }
            Ok((rest, Object::Integer(if negative { -value } else { value })))
        },
        Some((_, frac)) => {
            let text = format!(
                "{}{}.{}",
                if negative { "-" } else { "" },
                String::from_utf8_lossy(int_part),
                String::from_utf8_lossy(frac)
            );
            let value = text.parse::<f64>().map_err(|_| parse_err(input))?;
            Ok((rest, Object::Real(value)))
        },
    }
}

/// Parse a name: `/` followed by regular characters, `#xx` escapes decoded.
fn name(input: &[u8]) -> IResult<&[u8], String> {
    let (rest, _) = tag("/")(input)?;
    let (rest, raw) = take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c))(rest)?;

    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(raw[i] as char);
        i += 1;
    }
    Ok((rest, out))
}

/// Parse a literal string `(...)` with nesting and escape decoding.
fn literal_string(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    if input.first() != Some(&b'(') {
        return Err(parse_err(input));
    }
    let mut out = Vec::new();
    let mut depth = 1usize;
    let mut i = 1;
    while i < input.len() {
        match input[i] {
            b'\\' if i + 1 < input.len() => {
                let c = input[i + 1];
                i += 2;
                match c {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(8),
                    b'f' => out.push(12),
                    b'(' => out.push(b'('),
                    b')' => out.push(b')'),
                    b'\\' => out.push(b'\\'),
                    // Line continuation: backslash-EOL is dropped
                    b'\n' => {},
                    b'\r' => {
                        if input.get(i) == Some(&b'\n') {
                            i += 1;
                        }
                    },
                    d if d.is_ascii_digit() && d < b'8' => {
                        // Octal escape, 1-3 digits
                        let mut value = (d - b'0') as u16;
                        for _ in 0..2 {
                            match input.get(i) {
                                Some(&o) if o.is_ascii_digit() && o < b'8' => {
                                    value = value * 8 + (o - b'0') as u16;
                                    i += 1;
                                },
                                _ => break,
                            }
                        }
                        out.push(value as u8);
                    },
                    other => out.push(other),
                }
            },
            b'(' => {
                depth += 1;
                out.push(b'(');
                i += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[i + 1..], out));
                }
                out.push(b')');
                i += 1;
            },
            other => {
                out.push(other);
                i += 1;
            },
        }
    }
    Err(parse_err(input))
}

/// Parse a hex string `<...>` (not `<<`).
fn hex_string(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    if input.first() != Some(&b'<') || input.get(1) == Some(&b'<') {
        return Err(parse_err(input));
    }
    let mut out = Vec::new();
    let mut nibble: Option<u8> = None;
    let mut i = 1;
    while i < input.len() {
        let b = input[i];
        i += 1;
        let value = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b'>' => {
                if let Some(high) = nibble {
                    out.push(high << 4);
                }
                return Ok((&input[i..], out));
            },
            c if is_whitespace(c) => continue,
            _ => return Err(parse_err(input)),
        };
        nibble = match nibble {
            None => Some(value),
            Some(high) => {
                out.push((high << 4) | value);
                None
            },
        };
    }
    Err(parse_err(input))
}

/// Parse an indirect reference `N G R`.
fn reference(input: &[u8]) -> IResult<&[u8], ObjectRef> {
    let (rest, id_digits) = take_while1(|c: u8| c.is_ascii_digit())(input)?;
    let rest = skip_ws(rest);
    let (rest, gen_digits) = take_while1(|c: u8| c.is_ascii_digit())(rest)?;
    let rest = skip_ws(rest);
    let (rest, _) = tag("R")(rest)?;
    // "R" must not be the start of a longer keyword
    if rest.first().map(|&c| !is_whitespace(c) && !is_delimiter(c)).unwrap_or(false) {
        return Err(parse_err(input));
    }
    let id: u32 = std::str::from_utf8(id_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err(input))?;
    let gen: u16 = std::str::from_utf8(gen_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err(input))?;
    Ok((rest, ObjectRef::new(id, gen)))
}

fn keyword<'a>(input: &'a [u8], word: &str) -> IResult<&'a [u8], ()> {
    let (rest, _) = tag(word)(input)?;
    if rest.first().map(|&c| !is_whitespace(c) && !is_delimiter(c)).unwrap_or(false) {
        return Err(parse_err(input));
    }
    Ok((rest, ()))
}

/// Parse a dictionary body after `<<`, returning at `>>`.
fn dictionary(input: &[u8]) -> IResult<&[u8], HashMap<String, Object>> {
    let (mut rest, _) = tag("<<")(input)?;
    let mut dict = HashMap::new();
    loop {
        rest = skip_ws(rest);
        if let Ok((after, _)) = tag::<_, _, nom::error::Error<&[u8]>>(">>")(rest) {
            return Ok((after, dict));
        }
        let (after_key, key) = name(rest)?;
        let after_key = skip_ws(after_key);
        let (after_value, value) = parse_object(after_key)?;
        dict.insert(key, value);
        rest = after_value;
    }
}

/// Parse any direct object (no `obj`/`endobj` framing).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let input = skip_ws(input);
    // Order matters: reference before number, dict before hex string.
    if let Ok((rest, r)) = reference(input) {
        return Ok((rest, Object::Reference(r)));
    }
    if input.starts_with(b"<<") {
        let (rest, dict) = dictionary(input)?;
        return Ok((rest, Object::Dictionary(dict)));
    }
    if input.starts_with(b"[") {
        let mut rest = &input[1..];
        let mut items = Vec::new();
        loop {
            rest = skip_ws(rest);
            if rest.starts_with(b"]") {
                return Ok((&rest[1..], Object::Array(items)));
            }
            let (after, item) = parse_object(rest)?;
            items.push(item);
            rest = after;
        }
    }
    if let Ok((rest, s)) = literal_string(input) {
        return Ok((rest, Object::String(s)));
    }
    if let Ok((rest, s)) = hex_string(input) {
        return Ok((rest, Object::String(s)));
    }
    if let Ok((rest, n)) = name(input) {
        return Ok((rest, Object::Name(n)));
    }
    if let Ok((rest, _)) = keyword(input, "true") {
        return Ok((rest, Object::Boolean(true)));
    }
    if let Ok((rest, _)) = keyword(input, "false") {
        return Ok((rest, Object::Boolean(false)));
    }
    if let Ok((rest, _)) = keyword(input, "null") {
        return Ok((rest, Object::Null));
    }
    number(input)
}

/// Parse the indirect object starting at `offset` in `buf`.
///
/// Returns the object's reference and value. Stream payloads are attached
/// raw; callers decode via [`Object::decode_stream_data`].
pub fn parse_indirect_object(buf: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let input = buf.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;
    let fail = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };

    let input = skip_ws(input);
    let (rest, id_digits) =
        take_while1::<_, _, nom::error::Error<&[u8]>>(|c: u8| c.is_ascii_digit())(input)
            .map_err(|_| fail("expected object number"))?;
    let rest = skip_ws(rest);
    let (rest, gen_digits) =
        take_while1::<_, _, nom::error::Error<&[u8]>>(|c: u8| c.is_ascii_digit())(rest)
            .map_err(|_| fail("expected generation number"))?;
    let rest = skip_ws(rest);
    let (rest, _) = keyword(rest, "obj").map_err(|_| fail("expected 'obj' keyword"))?;

    let id: u32 = std::str::from_utf8(id_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| fail("invalid object number"))?;
    let gen: u16 = std::str::from_utf8(gen_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| fail("invalid generation number"))?;

    let (rest, value) = parse_object(rest).map_err(|_| fail("malformed object body"))?;

    // Stream payload follows a dictionary when the `stream` keyword is next.
    let rest = skip_ws(rest);
    if rest.starts_with(b"stream") {
        let dict = match value {
            Object::Dictionary(d) => d,
            _ => return Err(fail("stream keyword after non-dictionary")),
        };
        let mut data_start = b"stream".len();
        // A single EOL after the keyword: CRLF or LF (ISO 32000-1 §7.3.8.1)
        if rest.get(data_start) == Some(&b'\r') {
            data_start += 1;
        }
        if rest.get(data_start) == Some(&b'\n') {
            data_start += 1;
        }
        let after_keyword = &rest[data_start..];

        let length = dict.get("Length").and_then(|o| o.as_integer());
        let data_len = match length {
            Some(len) if (len as usize) <= after_keyword.len() => {
                let candidate = len as usize;
                // Trust the declared length only if endstream actually follows.
                let tail = skip_ws(&after_keyword[candidate..]);
                if tail.starts_with(b"endstream") {
                    candidate
                } else {
                    find_endstream(after_keyword).ok_or_else(|| fail("missing endstream"))?
                }
            },
            _ => find_endstream(after_keyword).ok_or_else(|| fail("missing endstream"))?,
        };

        let data = bytes::Bytes::copy_from_slice(&after_keyword[..data_len]);
        return Ok((ObjectRef::new(id, gen), Object::Stream { dict, data }));
    }

    Ok((ObjectRef::new(id, gen), value))
}

/// Locate the stream payload length by scanning for `endstream`, trimming the
/// EOL that precedes the keyword.
fn find_endstream(data: &[u8]) -> Option<usize> {
    let pos = data.windows(b"endstream".len()).position(|w| w == b"endstream")?;
    let mut end = pos;
    if end > 0 && data[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && data[end - 1] == b'\r' {
        end -= 1;
    }
    Some(end)
}
