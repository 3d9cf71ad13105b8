/// Generic checksum style, for encoding and validating frames.
pub trait ChecksumStyle {
    type Digest<'a>: ChecksumDigest
    where
        Self: 'a;

    fn digest<'a>(&'a self) -> Self::Digest<'a>;

    fn validate(&self, calculated: u8, provided: u8) -> bool {
        calculated == provided
    }

    /// Checksum a whole span at once.
    fn checksum(&self, bytes: &[u8]) -> u8 {
        let mut digest = self.digest();
        digest.update(bytes);
        digest.finalize()
    }
}

/// Interface for a checksum digest.
pub trait ChecksumDigest {
    fn update(&mut self, bytes: &[u8]);
    fn finalize(self) -> u8;
}

impl<C> ChecksumStyle for &C
where
    C: ChecksumStyle,
{
    type Digest<'a> = C::Digest<'a> where Self: 'a;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        (*self).digest()
    }

    fn validate(&self, calculated: u8, provided: u8) -> bool {
        (*self).validate(calculated, provided)
    }
}

/// Plain additive checksum, truncated to a byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sum8;

/// Running sum for [Sum8] and [NegSum8].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SumDigest {
    sum: u8,
    negate: bool,
}

impl ChecksumStyle for Sum8 {
    type Digest<'a> = SumDigest;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        SumDigest {
            sum: 0,
            negate: false,
        }
    }
}

/// Two's complement of the additive sum, `0x100 - sum`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NegSum8;

impl ChecksumStyle for NegSum8 {
    type Digest<'a> = SumDigest;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        SumDigest {
            sum: 0,
            negate: true,
        }
    }
}

impl ChecksumDigest for SumDigest {
    fn update(&mut self, bytes: &[u8]) {
        self.sum = bytes.iter().fold(self.sum, |acc, b| acc.wrapping_add(*b));
    }

    fn finalize(self) -> u8 {
        if self.negate {
            (!self.sum).wrapping_add(1)
        } else {
            self.sum
        }
    }
}

/// For protocols without a checksum. Always validates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoChecksum;

impl ChecksumStyle for NoChecksum {
    type Digest<'a> = NoChecksum;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        NoChecksum
    }

    fn validate(&self, _calculated: u8, _provided: u8) -> bool {
        true
    }
}

impl ChecksumDigest for NoChecksum {
    fn update(&mut self, _bytes: &[u8]) {}

    fn finalize(self) -> u8 {
        0
    }
}

/// The 8-bit CRC Sensirion puts after every data word.
pub const SENSIRION_CRC: crc::Crc<u8, crc::NoTable> =
    crc::Crc::<u8, crc::NoTable>::new(&crc::CRC_8_NRSC_5);

impl ChecksumStyle for crc::Crc<u8, crc::NoTable> {
    type Digest<'a> = crc::Digest<'a, u8, crc::NoTable>;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        self.digest()
    }
}

impl<'a> ChecksumDigest for crc::Digest<'a, u8, crc::NoTable> {
    fn update(&mut self, bytes: &[u8]) {
        self.update(bytes)
    }

    fn finalize(self) -> u8 {
        self.finalize()
    }
}

impl ChecksumStyle for crc::Crc<u8, crc::Table<1>> {
    type Digest<'a> = crc::Digest<'a, u8, crc::Table<1>>;

    fn digest<'a>(&'a self) -> Self::Digest<'a> {
        self.digest()
    }
}

impl<'a> ChecksumDigest for crc::Digest<'a, u8, crc::Table<1>> {
    fn update(&mut self, bytes: &[u8]) {
        self.update(bytes)
    }

    fn finalize(self) -> u8 {
        self.finalize()
    }
}
