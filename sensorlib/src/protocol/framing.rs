//! Declarative description of a framed serial protocol.
//!
//! A [Framing] says where a frame starts and ends, how long it is,
//! where its command code and payload live, and how it is
//! checksummed. The same description drives both validation of
//! incoming frames and encoding of outgoing ones.

use alloc::vec::Vec;
use core::ops::Range;

use super::checksum::ChecksumStyle;

/// One header/tail pair a protocol may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Markers {
    pub header: &'static [u8],
    pub tail: &'static [u8],
}

/// Width and byte order of an integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Width {
    U8,
    LeU16,
    BeU16,
}

impl Width {
    /// Size of the field in bytes.
    pub const fn len(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::LeU16 | Self::BeU16 => 2,
        }
    }

    /// Largest value the field can hold.
    pub const fn max(&self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::LeU16 | Self::BeU16 => u16::MAX as usize,
        }
    }

    fn read(&self, bytes: &[u8]) -> usize {
        match self {
            Self::U8 => bytes[0] as usize,
            Self::LeU16 => u16::from_le_bytes([bytes[0], bytes[1]]) as usize,
            Self::BeU16 => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
        }
    }

    fn write(&self, value: usize, out: &mut [u8]) {
        match self {
            Self::U8 => out[0] = value as u8,
            Self::LeU16 => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
            Self::BeU16 => out[..2].copy_from_slice(&(value as u16).to_be_bytes()),
        }
    }
}

/// An integer field at a fixed offset from the start of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    pub offset: usize,
    pub width: Width,
}

impl Field {
    pub const fn new(offset: usize, width: Width) -> Self {
        Self { offset, width }
    }

    /// One past the last byte of this field.
    pub const fn end(&self) -> usize {
        self.offset + self.width.len()
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// How the total length of a frame is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Length {
    /// Every frame is exactly this long.
    Fixed(usize),
    /// The frame carries a length field. The total frame length is
    /// the field's value plus `base`.
    Field { field: Field, base: usize },
}

/// Where a frame's checksum comes from.
///
/// The checksum byte sits right before the tail, and covers the bytes
/// from `start` up to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Checksum<C> {
    pub style: C,
    pub start: usize,
}

/// Why a buffer is not a valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Malformed {
    /// Header bytes do not match any known header.
    Header,
    /// Declared frame length is impossible.
    Length(usize),
    /// Tail bytes do not match the header's tail.
    Tail,
    /// Checksum mismatch.
    Checksum { calculated: u8, provided: u8 },
}

#[cfg(feature = "std")]
impl std::error::Error for Malformed {}

impl core::fmt::Display for Malformed {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Header => write!(f, "bad header"),
            Self::Length(len) => write!(f, "bad length {}", len),
            Self::Tail => write!(f, "bad tail"),
            Self::Checksum {
                calculated,
                provided,
            } => write!(
                f,
                "checksum mismatch: 0x{:02x} != 0x{:02x}",
                provided, calculated
            ),
        }
    }
}

/// The result of looking at a buffer that starts at a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Check {
    /// More bytes are needed.
    Incomplete,
    /// The first `len` bytes are a valid frame using marker `kind`.
    Complete { len: usize, kind: usize },
    /// The buffer can never become a valid frame.
    Malformed(Malformed),
}

/// Identifies what a frame carries: which markers it used, and its
/// command code if the protocol has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tag {
    pub kind: usize,
    pub command: Option<u16>,
}

/// A validated frame, borrowed from a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame<'a> {
    tag: Tag,
    bytes: &'a [u8],
    payload: Range<usize>,
}

impl<'a> Frame<'a> {
    /// Kind and command.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Index of the header/tail pair this frame used.
    pub fn kind(&self) -> usize {
        self.tag.kind
    }

    /// Command code, if the protocol has one.
    pub fn command(&self) -> Option<u16> {
        self.tag.command
    }

    /// Payload, between the fixed fields and the checksum or tail.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.payload.clone()]
    }

    /// The whole frame, markers included.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Description of a framed protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Framing<C> {
    /// Header/tail pairs. A frame's kind is the index of its pair.
    pub markers: &'static [Markers],
    pub length: Length,
    pub command: Option<Field>,
    /// Offset of the first payload byte.
    pub payload: usize,
    pub checksum: Option<Checksum<C>>,
    /// Frames declaring more than this are malformed.
    pub max_len: usize,
}

impl<C> Framing<C>
where
    C: ChecksumStyle,
{
    /// Can this byte start a frame?
    pub fn is_lead(&self, byte: u8) -> bool {
        self.markers.iter().any(|m| m.header.first() == Some(&byte))
    }

    /// Bytes that follow the payload in a frame of this kind.
    fn trailer_len(&self, kind: usize) -> usize {
        self.markers[kind].tail.len() + if self.checksum.is_some() { 1 } else { 0 }
    }

    /// Shortest possible frame of this kind, with an empty payload.
    pub fn min_len(&self, kind: usize) -> usize {
        let fixed = self.markers[kind].header.len().max(self.payload);
        fixed + self.trailer_len(kind)
    }

    /// Find which header the buffer starts with. `Ok(None)` means the
    /// buffer is a prefix of some header.
    fn match_header(&self, buf: &[u8]) -> Result<Option<usize>, Malformed> {
        let mut partial = false;
        for (kind, markers) in self.markers.iter().enumerate() {
            let n = buf.len().min(markers.header.len());
            if buf[..n] == markers.header[..n] {
                if n == markers.header.len() {
                    return Ok(Some(kind));
                }
                partial = true;
            }
        }

        if partial {
            Ok(None)
        } else {
            Err(Malformed::Header)
        }
    }

    /// Look at a buffer starting at a frame, and decide whether it
    /// holds a complete valid frame yet.
    ///
    /// Header, length, tail and checksum are checked in that order,
    /// each as soon as the bytes for it are present.
    pub fn check(&self, buf: &[u8]) -> Check {
        let kind = match self.match_header(buf) {
            Ok(Some(kind)) => kind,
            Ok(None) => return Check::Incomplete,
            Err(e) => return Check::Malformed(e),
        };

        let len = match self.length {
            Length::Fixed(len) => len,
            Length::Field { field, base } => {
                if buf.len() < field.end() {
                    return Check::Incomplete;
                }
                let len = field.width.read(&buf[field.range()]) + base;
                if len < self.min_len(kind) || len > self.max_len {
                    return Check::Malformed(Malformed::Length(len));
                }
                len
            }
        };

        if buf.len() < len {
            return Check::Incomplete;
        }
        let frame = &buf[..len];

        if !frame.ends_with(self.markers[kind].tail) {
            return Check::Malformed(Malformed::Tail);
        }

        if let Some(checksum) = &self.checksum {
            let at = len - self.trailer_len(kind);
            let calculated = checksum.style.checksum(&frame[checksum.start..at]);
            let provided = frame[at];
            if !checksum.style.validate(calculated, provided) {
                return Check::Malformed(Malformed::Checksum {
                    calculated,
                    provided,
                });
            }
        }

        Check::Complete { len, kind }
    }

    /// Wrap a buffer already known to be a complete frame, as
    /// reported by [Framing::check].
    pub fn frame<'a>(&self, bytes: &'a [u8], kind: usize) -> Frame<'a> {
        let command = self
            .command
            .map(|field| field.width.read(&bytes[field.range()]) as u16);
        let end = bytes.len() - self.trailer_len(kind);
        Frame {
            tag: Tag { kind, command },
            bytes,
            payload: self.payload.min(end)..end,
        }
    }

    /// Check a buffer that must be exactly one frame, such as a
    /// synchronous reply.
    pub fn parse<'a>(&self, bytes: &'a [u8]) -> Result<Frame<'a>, Malformed> {
        match self.check(bytes) {
            Check::Complete { len, kind } if len == bytes.len() => Ok(self.frame(bytes, kind)),
            Check::Complete { len, .. } => Err(Malformed::Length(len)),
            Check::Incomplete => Err(Malformed::Length(bytes.len())),
            Check::Malformed(e) => Err(e),
        }
    }

    /// Build a complete frame of the given kind around a command
    /// code and payload.
    pub fn encode(&self, kind: usize, command: u16, payload: &[u8]) -> Result<Vec<u8>, Malformed> {
        let markers = self.markers.get(kind).ok_or(Malformed::Header)?;
        let len = self.min_len(kind) + payload.len();
        if len > self.max_len {
            return Err(Malformed::Length(len));
        }

        let mut out = Vec::with_capacity(len);
        out.resize(self.payload.max(markers.header.len()), 0);
        out[..markers.header.len()].copy_from_slice(markers.header);

        if let Some(field) = self.command {
            field.width.write(command as usize, &mut out[field.range()]);
        }

        match self.length {
            Length::Fixed(fixed) if fixed == len => {}
            Length::Fixed(_) => return Err(Malformed::Length(len)),
            Length::Field { field, base } => {
                let value = len.checked_sub(base).ok_or(Malformed::Length(len))?;
                if value > Width::max(&field.width) {
                    return Err(Malformed::Length(len));
                }
                field.width.write(value, &mut out[field.range()]);
            }
        }

        out.extend_from_slice(payload);
        if let Some(checksum) = &self.checksum {
            let sum = checksum.style.checksum(&out[checksum.start..]);
            out.push(sum);
        }
        out.extend_from_slice(markers.tail);

        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::super::checksum::{NoChecksum, Sum8};
    use super::*;

    use quickcheck_macros::quickcheck;

    pub(crate) const SHORT: Framing<Sum8> = Framing {
        markers: &[Markers {
            header: b"\xfa\xfb",
            tail: b"\xfc\xfd",
        }],
        length: Length::Field {
            field: Field::new(2, Width::U8),
            base: 5,
        },
        command: Some(Field::new(3, Width::U8)),
        payload: 4,
        checksum: Some(Checksum {
            style: Sum8,
            start: 3,
        }),
        max_len: 0x100,
    };

    const TWO_KINDS: Framing<NoChecksum> = Framing {
        markers: &[
            Markers {
                header: b"\xf4\xf3\xf2\xf1",
                tail: b"\xf8\xf7\xf6\xf5",
            },
            Markers {
                header: b"\xfd\xfc\xfb\xfa",
                tail: b"\x04\x03\x02\x01",
            },
        ],
        length: Length::Field {
            field: Field::new(5, Width::LeU16),
            base: 0,
        },
        command: Some(Field::new(4, Width::U8)),
        payload: 7,
        checksum: None,
        max_len: 0x100,
    };

    #[test]
    fn check_incomplete() {
        assert_eq!(SHORT.check(b""), Check::Incomplete);
        assert_eq!(SHORT.check(b"\xfa"), Check::Incomplete);
        assert_eq!(SHORT.check(b"\xfa\xfb\x03\x11"), Check::Incomplete);
        assert_eq!(SHORT.check(b"\xfa\xfb\x03\x11\x01\x12\xfc"), Check::Incomplete);
    }

    #[test]
    fn check_complete() {
        assert_eq!(
            SHORT.check(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd"),
            Check::Complete { len: 8, kind: 0 }
        );
        // trailing bytes are not part of the frame
        assert_eq!(
            SHORT.check(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd\xfa"),
            Check::Complete { len: 8, kind: 0 }
        );
    }

    #[test]
    fn check_bad_header_early() {
        assert_eq!(SHORT.check(b"\xfa\x00"), Check::Malformed(Malformed::Header));
    }

    #[test]
    fn check_bad_tail() {
        assert_eq!(
            SHORT.check(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfe"),
            Check::Malformed(Malformed::Tail)
        );
    }

    #[test]
    fn check_bad_checksum() {
        assert_eq!(
            SHORT.check(b"\xfa\xfb\x03\x11\x01\x13\xfc\xfd"),
            Check::Malformed(Malformed::Checksum {
                calculated: 0x12,
                provided: 0x13
            })
        );
    }

    #[test]
    fn check_impossible_length() {
        // too short to hold command, checksum and tail
        assert_eq!(
            SHORT.check(b"\xfa\xfb\x00\x11"),
            Check::Malformed(Malformed::Length(5))
        );
        assert_eq!(
            TWO_KINDS.check(b"\xfd\xfc\xfb\xfa\x01\x05\x00"),
            Check::Malformed(Malformed::Length(5))
        );
    }

    #[test]
    fn check_kind() {
        let upload = b"\xf4\xf3\xf2\xf1\x04\x0b\x00\xf8\xf7\xf6\xf5";
        let ack = b"\xfd\xfc\xfb\xfa\x0a\x0c\x00\x01\x04\x03\x02\x01";
        assert_eq!(TWO_KINDS.check(upload), Check::Complete { len: 11, kind: 0 });
        assert_eq!(TWO_KINDS.check(ack), Check::Complete { len: 12, kind: 1 });

        let frame = TWO_KINDS.frame(ack, 1);
        assert_eq!(frame.command(), Some(0x0a));
        assert_eq!(frame.payload(), b"\x01");
    }

    #[test]
    fn encode_short() {
        assert_eq!(
            SHORT.encode(0, 0x11, &[0x01]),
            Ok(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd".to_vec())
        );
    }

    #[test]
    fn encode_too_long() {
        assert!(SHORT.encode(0, 0x11, &[0; 0x100]).is_err());
    }

    #[quickcheck]
    fn encode_then_check(command: u8, payload: Vec<u8>) -> bool {
        let payload = &payload[..payload.len().min(0x80)];
        let Ok(bytes) = SHORT.encode(0, command as u16, payload) else {
            return false;
        };
        let frame = match SHORT.check(&bytes) {
            Check::Complete { len, kind } if len == bytes.len() => SHORT.frame(&bytes, kind),
            _ => return false,
        };
        frame.command() == Some(command as u16) && frame.payload() == payload
    }

    #[quickcheck]
    fn encode_then_check_two_kinds(ack: bool, command: u8, payload: Vec<u8>) -> bool {
        let kind = ack as usize;
        let payload = &payload[..payload.len().min(0x80)];
        let Ok(bytes) = TWO_KINDS.encode(kind, command as u16, payload) else {
            return false;
        };
        match TWO_KINDS.parse(&bytes) {
            Ok(frame) => {
                frame.kind() == kind
                    && frame.command() == Some(command as u16)
                    && frame.payload() == payload
            }
            Err(_) => false,
        }
    }
}
