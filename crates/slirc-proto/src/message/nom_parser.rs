//! Nom-based IRC line parser.
//!
//! Parsing works on raw octets so that each parameter can be decoded on its
//! own afterwards. The parser never allocates; it returns slices into the
//! input line.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

/// Parse IRCv3 message tags (the part after `@` and before the first space).
///
/// The client never negotiates tags, but some servers send them anyway.
fn parse_tags(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(char(':'), take_while1(|c| c != b' '))(input)
}

/// Parse the command name (1*letter or 3digit).
fn parse_command(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, cmd) = take_while1(|c: u8| c.is_ascii_alphanumeric())(input)?;

    let is_all_letters = cmd.iter().all(|c| c.is_ascii_alphabetic());
    let is_three_digits = cmd.len() == 3 && cmd.iter().all(|c| c.is_ascii_digit());
    let well_terminated = matches!(rest.first(), None | Some(b' '));

    if (is_all_letters || is_three_digits) && well_terminated {
        Ok((rest, cmd))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::AlphaNumeric,
        )))
    }
}

/// Parse parameters from the remaining input after the command.
///
/// Handles both regular space-separated parameters and the trailing
/// parameter (prefixed with `:`) which may contain spaces. Multiple
/// consecutive spaces are treated as a single separator.
fn parse_params(input: &[u8]) -> (&[u8], SmallVec<[&[u8]; 15]>) {
    let mut params: SmallVec<[&[u8]; 15]> = SmallVec::new();
    let mut rest = input;

    while rest.first() == Some(&b' ') {
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() {
            break;
        }

        if rest[0] == b':' {
            params.push(&rest[1..]);
            rest = &rest[rest.len()..];
            break;
        }

        let end = rest.iter().position(|&c| c == b' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    (rest, params)
}

/// Parse a complete line (already stripped of CR/LF) into its components.
///
/// ```text
/// [@tags] [:prefix] <command> [params...] [:trailing]
/// ```
pub(crate) fn parse_message(input: &[u8]) -> IResult<&[u8], ParsedMessage<'_>> {
    let (input, _tags) = opt(parse_tags)(input)?;
    let (input, _) = space0(input)?;

    let (input, prefix) = opt(parse_prefix)(input)?;
    let (input, _) = space0(input)?;

    let (input, command) = parse_command(input)?;
    let (rest, params) = parse_params(input);

    Ok((
        rest,
        ParsedMessage {
            prefix,
            command,
            params,
        },
    ))
}

/// A parsed line with borrowed octet slices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedMessage<'a> {
    /// Raw prefix (without the leading `:`), if present.
    pub prefix: Option<&'a [u8]>,
    /// The command token.
    pub command: &'a [u8],
    /// Parameters, including trailing.
    pub params: SmallVec<[&'a [u8]; 15]>,
}

impl<'a> ParsedMessage<'a> {
    /// Parse a stripped line, returning the byte offset of the failure.
    pub fn parse(input: &'a [u8]) -> Result<Self, usize> {
        match parse_message(input) {
            Ok((_remaining, msg)) => Ok(msg),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(input.len() - e.input.len()),
            Err(nom::Err::Incomplete(_)) => Err(input.len()),
        }
    }
}
