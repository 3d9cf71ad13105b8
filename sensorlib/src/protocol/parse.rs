use nom::error::{Error, ErrorKind};
use nom::{IResult, Parser};

use super::framing::{Frame, Tag};

/// A trait for messages that can be parsed out of a frame's payload.
pub trait MessageParse<'a>: Sized {
    /// Parse the payload of a frame with the given tag.
    ///
    /// Tags this message does not know about should fail with
    /// [nom::combinator::fail], so they are reported as unknown.
    fn parse_body(tag: Tag) -> impl Parser<&'a [u8], Self, Error<&'a [u8]>>;
}

/// A frame that was well-formed, but could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub tag: Tag,
    pub kind: ErrorKind,
}

impl ParseError {
    /// Was this frame's command simply not one we know?
    pub fn is_unknown(&self) -> bool {
        self.kind == ErrorKind::Fail
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.tag.command {
            Some(command) if self.is_unknown() => write!(
                f,
                "unknown command 0x{:02x} (kind {})",
                command, self.tag.kind
            ),
            None if self.is_unknown() => write!(f, "unknown frame (kind {})", self.tag.kind),
            Some(command) => write!(
                f,
                "bad payload for command 0x{:02x}: {:?}",
                command, self.kind
            ),
            None => write!(f, "bad payload: {:?}", self.kind),
        }
    }
}

/// Parse a message out of a validated frame.
///
/// Bytes left over after the message are ignored, devices are free to
/// append fields we don't know about.
pub fn parse_frame<'a, M>(frame: &Frame<'a>) -> Result<M, ParseError>
where
    M: MessageParse<'a>,
{
    let tag = frame.tag();
    match M::parse_body(tag).parse(frame.payload()) {
        Ok((_, msg)) => Ok(msg),
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            tag,
            kind: ErrorKind::Complete,
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseError { tag, kind: e.code }),
    }
}

/// Parse a statically-sized array with a parser.
pub fn parse_array<'a, P, A, const LEN: usize>(
    parser: P,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], [A; LEN]>
where
    P: Fn(&'a [u8]) -> IResult<&'a [u8], A>,
    A: Default + Copy,
{
    move |input| {
        let mut data = [A::default(); LEN];
        let (input, _) = nom::multi::fill(&parser, &mut data[..])(input)?;
        Ok((input, data))
    }
}

/// Parse fields in order, stopping for good at the first one that
/// is missing.
///
/// Some devices leave trailing fields off entirely when they are not
/// subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fields<'a> {
    input: Option<&'a [u8]>,
}

impl<'a> Fields<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input: Some(input) }
    }

    /// The next field, if it and all fields before it were present.
    pub fn next<O, P>(&mut self, mut parser: P) -> Option<O>
    where
        P: FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
    {
        let input = self.input?;
        match parser(input) {
            Ok((rest, out)) => {
                self.input = Some(rest);
                Some(out)
            }
            Err(_) => {
                self.input = None;
                None
            }
        }
    }

    /// Whatever was not parsed. Empty once a field was missing.
    pub fn rest(&self) -> &'a [u8] {
        self.input.unwrap_or(&[])
    }
}

#[cfg(test)]
mod test {
    use nom::combinator::map;
    use nom::number::complete::u8;

    use super::super::framing::test::SHORT;
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Reply {
        Direction(u8),
        Config([u8; 3]),
    }

    impl<'a> MessageParse<'a> for Reply {
        fn parse_body(tag: Tag) -> impl Parser<&'a [u8], Self, Error<&'a [u8]>> {
            move |input: &'a [u8]| -> IResult<&'a [u8], Self> {
                match tag.command {
                    Some(0x14) => map(u8, Reply::Direction)(input),
                    Some(0x19) => map(parse_array(u8), Reply::Config)(input),
                    _ => nom::combinator::fail(input),
                }
            }
        }
    }

    fn parse(bytes: &[u8]) -> Result<Reply, ParseError> {
        let frame = SHORT.parse(bytes).unwrap();
        parse_frame(&frame)
    }

    #[test]
    fn dispatch_by_command() {
        let bytes = SHORT.encode(0, 0x14, b"\x01").unwrap();
        assert_eq!(parse(&bytes), Ok(Reply::Direction(1)));
        let bytes = SHORT.encode(0, 0x19, b"\x03\x05\x01").unwrap();
        assert_eq!(parse(&bytes), Ok(Reply::Config([3, 5, 1])));
    }

    #[test]
    fn unknown_command() {
        let bytes = SHORT.encode(0, 0x42, b"\x01").unwrap();
        let err = parse(&bytes).unwrap_err();
        assert!(err.is_unknown());
        assert_eq!(err.tag.command, Some(0x42));
    }

    #[test]
    fn short_payload() {
        let bytes = SHORT.encode(0, 0x19, b"\x03").unwrap();
        let err = parse(&bytes).unwrap_err();
        assert!(!err.is_unknown());
    }

    #[test]
    fn fields_stop_at_first_missing() {
        use nom::number::complete::le_u16;

        let mut fields = Fields::new(b"\x01\x00\x02");
        assert_eq!(fields.next(le_u16), Some(1));
        assert_eq!(fields.next(le_u16), None);
        // one byte is left, but an earlier field was missing
        assert_eq!(fields.next(u8), None);
        assert!(fields.rest().is_empty());
    }
}
