//! Framed serial protocols: description, reading, parsing and
//! encoding.

pub mod checksum;
pub use checksum::{ChecksumStyle, NegSum8, NoChecksum, Sum8};

pub mod framing;
pub use framing::{Check, Checksum, Field, Frame, Framing, Length, Malformed, Markers, Tag, Width};

pub mod parse;
pub use parse::{parse_frame, MessageParse, ParseError};

pub mod reader;
pub use reader::FrameReader;

pub mod serialize;
pub use serialize::{CommandSerialize, Serializer};

/// Read every complete frame available on the port, handing each to
/// `f` as it is found.
///
/// Returns the number of frames seen.
pub fn for_each_frame<C, S, F>(
    reader: &mut FrameReader<C>,
    port: &mut S,
    mut f: F,
) -> Result<usize, S::Error>
where
    C: ChecksumStyle,
    S: crate::ByteSource,
    F: FnMut(&Frame),
{
    let mut count = 0;
    while let Some(frame) = reader.read_frame(port)? {
        f(&frame);
        count += 1;
    }
    Ok(count)
}
