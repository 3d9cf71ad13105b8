use alloc::vec::Vec;

use super::checksum::ChecksumStyle;
use super::framing::{Check, Frame, Framing};
use crate::port::ByteSource;

/// Pulls frames out of a noisy byte stream, a byte at a time.
///
/// The reader never blocks. Each call to [FrameReader::read_frame]
/// consumes whatever input is available and stops at the first
/// complete frame, or when input runs dry. Partial frames persist
/// across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameReader<C> {
    framing: Framing<C>,
    buffer: Vec<u8>,
    head_found: bool,
    skip: Option<usize>,
    dropped: usize,
    noise: usize,
}

impl<C> FrameReader<C>
where
    C: ChecksumStyle,
{
    pub fn new(framing: Framing<C>) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            head_found: false,
            skip: None,
            dropped: 0,
            noise: 0,
        }
    }

    /// The protocol this reader understands.
    pub fn framing(&self) -> &Framing<C> {
        &self.framing
    }

    /// Bytes of the frame currently being accumulated.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[self.skip.unwrap_or(0)..]
    }

    /// Malformed frames dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Bytes skipped so far while looking for a header.
    pub fn noise(&self) -> usize {
        self.noise
    }

    /// Has a frame's lead byte been seen?
    pub fn is_synchronized(&self) -> bool {
        self.head_found
    }

    /// Drop everything and go back to looking for a header.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.head_found = false;
        self.skip = None;
    }

    // erase the frame returned last time. it can't be done before
    // returning, the frame borrows the buffer.
    fn consume(&mut self) {
        if let Some(skip) = self.skip.take() {
            self.buffer.drain(..skip);
            if self.buffer.is_empty() {
                self.head_found = false;
            }
        }
    }

    /// Skip input until something that might start a frame. Returns
    /// false if input ran out first.
    fn synchronize<S>(&mut self, port: &mut S) -> Result<bool, S::Error>
    where
        S: ByteSource,
    {
        let mut noise = 0usize;
        let found = loop {
            match port.peek()? {
                Some(b) if self.framing.is_lead(b) => break true,
                Some(_) => {
                    port.read_byte()?;
                    noise += 1;
                }
                None => break false,
            }
        };

        if noise > 0 {
            log::trace!("skipped {} bytes of noise", noise);
            self.noise = self.noise.saturating_add(noise);
        }
        Ok(found)
    }

    /// Read from the port until a complete, valid frame is buffered.
    ///
    /// Returns `None` once the port has nothing more to give. Malformed
    /// frames are logged and dropped, and the reader goes back to
    /// looking for a header.
    pub fn read_frame<S>(&mut self, port: &mut S) -> Result<Option<Frame<'_>>, S::Error>
    where
        S: ByteSource,
    {
        self.consume();

        loop {
            if !self.head_found && !self.synchronize(port)? {
                return Ok(None);
            }
            // set on every pass, not just the first
            self.head_found = true;

            let Some(byte) = port.read_byte()? else {
                return Ok(None);
            };
            self.buffer.push(byte);

            match self.framing.check(&self.buffer) {
                Check::Incomplete => {}
                Check::Malformed(e) => {
                    log::warn!("dropping frame: {}", e);
                    log::debug!("dropped: {:02x?}", self.buffer);
                    self.dropped = self.dropped.saturating_add(1);
                    self.reset();
                }
                Check::Complete { len, kind } => {
                    log::trace!("frame: {:02x?}", &self.buffer[..len]);
                    self.skip = Some(len);
                    return Ok(Some(self.framing.frame(&self.buffer[..len], kind)));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::vec::Vec;

    use super::super::framing::test::SHORT;
    use super::super::framing::Framing;
    use super::*;
    use crate::port::mock::MockPort;

    use quickcheck_macros::quickcheck;

    type Decoded = (Option<u16>, Vec<u8>);

    fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
        SHORT.encode(0, command as u16, payload).unwrap()
    }

    fn read_all<C, S>(reader: &mut FrameReader<C>, port: &mut S) -> Vec<Decoded>
    where
        C: ChecksumStyle,
        S: ByteSource<Error = core::convert::Infallible>,
    {
        let mut out = Vec::new();
        while let Some(f) = reader.read_frame(port).unwrap() {
            out.push((f.command(), f.payload().to_vec()));
        }
        out
    }

    fn noise(seed: &[u8], framing: &Framing<impl ChecksumStyle>) -> Vec<u8> {
        seed.iter()
            .copied()
            .filter(|b| !framing.is_lead(*b))
            .collect()
    }

    #[test]
    fn factory_reset_ack() {
        let mut reader = FrameReader::new(SHORT);
        let mut data: &[u8] = b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd";
        let f = reader.read_frame(&mut data).unwrap().unwrap();
        assert_eq!(f.command(), Some(0x11));
        assert_eq!(f.payload(), b"\x01");
        assert_eq!(reader.read_frame(&mut data).unwrap(), None);
        assert!(reader.buffered().is_empty());
        assert!(!reader.is_synchronized());
    }

    #[test]
    fn bad_checksum_clears_buffer() {
        let mut reader = FrameReader::new(SHORT);
        let mut data: &[u8] = b"\xfa\xfb\x03\x11\x01\x13\xfc\xfd";
        assert_eq!(reader.read_frame(&mut data).unwrap(), None);
        assert!(data.is_empty());
        assert!(reader.buffered().is_empty());
        assert!(!reader.is_synchronized());
    }

    #[test]
    fn resync_after_noise() {
        let seed: Vec<u8> = (0..=255).collect();
        let all_noise = noise(&seed, &SHORT);
        for n in [0, 1, 17, 255] {
            let mut data = all_noise.iter().cycle().take(n).copied().collect::<Vec<_>>();
            data.extend(frame(0x10, b"\x01"));
            let mut reader = FrameReader::new(SHORT);
            let decoded = read_all(&mut reader, &mut data.as_slice());
            assert_eq!(decoded, [(Some(0x10), b"\x01".to_vec())], "noise {}", n);
        }
    }

    #[quickcheck]
    fn resync_arbitrary_noise(seed: Vec<u8>, payload: Vec<u8>) -> bool {
        let payload = &payload[..payload.len().min(0x40)];
        let mut data = noise(&seed, &SHORT);
        data.extend(frame(0x00, payload));
        let mut reader = FrameReader::new(SHORT);
        read_all(&mut reader, &mut data.as_slice()) == [(Some(0x00), payload.to_vec())]
    }

    #[quickcheck]
    fn fragmentation_is_idempotent(payload: Vec<u8>, cuts: Vec<usize>) -> bool {
        let payload = &payload[..payload.len().min(0x40)];
        let data = frame(0x1b, payload);

        let mut whole = FrameReader::new(SHORT);
        let expected = read_all(&mut whole, &mut data.as_slice());

        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (data.len() + 1)).collect();
        cuts.push(0);
        cuts.push(data.len());
        cuts.sort();

        let mut reader = FrameReader::new(SHORT);
        let mut port = MockPort::new();
        let mut decoded = Vec::new();
        for w in cuts.windows(2) {
            port.feed(&data[w[0]..w[1]]);
            decoded.extend(read_all(&mut reader, &mut port));
        }

        expected.len() == 1 && decoded == expected
    }

    #[quickcheck]
    fn bit_flip_is_rejected(payload: Vec<u8>, bit: usize) -> bool {
        if payload.is_empty() {
            return true;
        }
        let payload = &payload[..payload.len().min(0x40)];
        let mut data = frame(0x00, payload);
        let bit = bit % (payload.len() * 8);
        data[SHORT.payload + bit / 8] ^= 1 << (bit % 8);

        let mut reader = FrameReader::new(SHORT);
        read_all(&mut reader, &mut data.as_slice()).is_empty()
            && reader.buffered().is_empty()
            && !reader.is_synchronized()
    }

    #[test]
    fn concatenated_frames_in_order() {
        let mut data = frame(0x14, b"\x01");
        data.extend(frame(0x19, b"\x03\x05\x01"));
        let mut reader = FrameReader::new(SHORT);
        let decoded = read_all(&mut reader, &mut data.as_slice());
        assert_eq!(
            decoded,
            [
                (Some(0x14), b"\x01".to_vec()),
                (Some(0x19), b"\x03\x05\x01".to_vec())
            ]
        );
    }

    #[test]
    fn frame_after_garbage_frame() {
        // a corrupt frame, then a good one
        let mut data = b"\xfa\xfb\x03\x11\x01\x00\xfc\xfd".to_vec();
        data.extend(b"\x00\x01");
        data.extend(frame(0x12, b"\x01"));
        let mut reader = FrameReader::new(SHORT);
        let decoded = read_all(&mut reader, &mut data.as_slice());
        assert_eq!(decoded, [(Some(0x12), b"\x01".to_vec())]);
        assert_eq!(reader.dropped(), 1);
        assert_eq!(reader.noise(), 2);
    }

    #[test]
    fn partial_frame_persists() {
        let data = frame(0x13, b"\x01");
        let mut reader = FrameReader::new(SHORT);
        let mut port = MockPort::new();
        port.feed(&data[..3]);
        assert_eq!(reader.read_frame(&mut port).unwrap(), None);
        assert!(reader.is_synchronized());
        assert_eq!(reader.buffered(), &data[..3]);
        port.feed(&data[3..]);
        let f = reader.read_frame(&mut port).unwrap().unwrap();
        assert_eq!(f.bytes(), &data[..]);
    }
}
