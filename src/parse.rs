use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space0, space1},
    combinator::{map_res, value},
    sequence::separated_pair,
    IResult,
};
use std::str::{self, FromStr};

use super::error::{Error, ParseError, Result};
use super::types::*;

fn number<T: FromStr>(i: &str) -> IResult<&str, T> {
    map_res(digit1, |s: &str| s.parse::<T>())(i)
}

fn status(i: &str) -> IResult<&str, bool> {
    let (i, ok) = alt((value(true, tag("+OK")), value(false, tag("-ERR"))))(i)?;
    let (i, _) = space0(i)?;
    Ok((i, ok))
}

fn token(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_ascii_whitespace())(i)
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Checks a status line, yielding the text after `+OK`.
///
/// `-ERR` becomes [`Error::ErrResponse`] carrying the server's explanation.
pub fn parse_status(line: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(line);
    match status(trim_line(&text)) {
        Ok((info, true)) => Ok(info.to_string()),
        Ok((info, false)) => Err(Error::ErrResponse(if info.is_empty() {
            "no explanation given".to_string()
        } else {
            info.to_string()
        })),
        Err(_) => Err(Error::Parse(ParseError::Invalid(line.to_vec()))),
    }
}

/// Parses the text of a positive `STAT` response: `nn mm`.
pub fn parse_stat(info: &str) -> Result<Stat> {
    match separated_pair(number::<u32>, space1, number::<u64>)(info.trim()) {
        Ok((_, (count, size))) => Ok(Stat { count, size }),
        Err(_) => Err(Error::Parse(ParseError::Stat(info.to_string()))),
    }
}

/// Parses a unique-id listing line: `msg uid`.
pub fn parse_uid_line(line: &str) -> Result<MessageRef> {
    match separated_pair(number::<Seq>, space1, token)(trim_line(line).trim()) {
        Ok((_, (index, uid))) => Ok(MessageRef {
            index,
            uid: uid.to_string(),
        }),
        Err(_) => Err(Error::Parse(ParseError::Listing(line.to_string()))),
    }
}

/// Parses a scan listing line: `msg octets`.
pub fn parse_list_line(line: &str) -> Result<ListEntry> {
    match separated_pair(number::<Seq>, space1, number::<u64>)(trim_line(line).trim()) {
        Ok((_, (index, size))) => Ok(ListEntry { index, size }),
        Err(_) => Err(Error::Parse(ParseError::Listing(line.to_string()))),
    }
}

fn parse_lines<T, F>(data: &[u8], parse: F) -> Result<Vec<T>>
where
    F: Fn(&str) -> Result<T>,
{
    let text =
        str::from_utf8(data).map_err(|e| ParseError::DataNotUtf8(data.to_vec(), e))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse)
        .collect()
}

/// Parses the body of a multi-line `UIDL` response.
pub fn parse_uids(data: &[u8]) -> Result<Vec<MessageRef>> {
    parse_lines(data, parse_uid_line)
}

/// Parses the body of a multi-line `LIST` response.
pub fn parse_list(data: &[u8]) -> Result<Vec<ListEntry>> {
    parse_lines(data, parse_list_line)
}
