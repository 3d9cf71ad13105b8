//! Byte-level access to a serial port.

/// A non-blocking, buffered serial input.
///
/// None of these methods may block: when nothing is buffered they
/// report so and return.
pub trait ByteSource: embedded_io::ErrorType {
    /// Is at least one byte ready to read?
    fn available(&mut self) -> Result<bool, Self::Error>;

    /// Look at the next byte without consuming it.
    fn peek(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Consume the next byte.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Throw away everything currently buffered, returning the count.
    fn drain(&mut self) -> Result<usize, Self::Error> {
        let mut count = 0;
        while self.read_byte()?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

impl<S> ByteSource for &mut S
where
    S: ByteSource + ?Sized,
{
    fn available(&mut self) -> Result<bool, Self::Error> {
        S::available(self)
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        S::peek(self)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        S::read_byte(self)
    }
}

/// Replays a captured byte stream.
impl ByteSource for &[u8] {
    fn available(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_empty())
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.first().copied())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        match self.split_first() {
            Some((byte, rest)) => {
                *self = rest;
                Ok(Some(*byte))
            }
            None => Ok(None),
        }
    }
}

/// Adapt an [embedded_io] reader into a [ByteSource] with one byte
/// of look-ahead.
///
/// Writes are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Peekable<R> {
    inner: R,
    peeked: Option<u8>,
}

impl<R> Peekable<R> {
    /// Wrap a port.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    /// Release the wrapped port. A peeked byte is lost.
    pub fn release(self) -> R {
        self.inner
    }
}

impl<R> Peekable<R>
where
    R: embedded_io::Read + embedded_io::ReadReady,
{
    fn fill(&mut self) -> Result<Option<u8>, R::Error> {
        if self.peeked.is_none() && self.inner.read_ready()? {
            let mut byte = [0; 1];
            if self.inner.read(&mut byte)? == 1 {
                self.peeked = Some(byte[0]);
            }
        }
        Ok(self.peeked)
    }
}

impl<R> embedded_io::ErrorType for Peekable<R>
where
    R: embedded_io::ErrorType,
{
    type Error = R::Error;
}

impl<R> ByteSource for Peekable<R>
where
    R: embedded_io::Read + embedded_io::ReadReady,
{
    fn available(&mut self) -> Result<bool, Self::Error> {
        Ok(self.fill()?.is_some())
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        self.fill()
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        self.fill()?;
        Ok(self.peeked.take())
    }
}

impl<R> embedded_io::Write for Peekable<R>
where
    R: embedded_io::Write,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush()
    }
}

/// A [ByteSource] over an [std::io] stream.
///
/// The stream should have a short read timeout. Timeouts and end of
/// file both read as no input.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdPort<F> {
    inner: F,
    peeked: Option<u8>,
}

#[cfg(feature = "std")]
impl<F> StdPort<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    pub fn get_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn release(self) -> F {
        self.inner
    }
}

#[cfg(feature = "std")]
impl<F> StdPort<F>
where
    F: std::io::Read,
{
    fn fill(&mut self) -> std::io::Result<Option<u8>> {
        use std::io::ErrorKind;

        if self.peeked.is_none() {
            let mut byte = [0; 1];
            match self.inner.read(&mut byte) {
                Ok(1) => self.peeked = Some(byte[0]),
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(self.peeked)
    }
}

#[cfg(feature = "std")]
impl<F> embedded_io::ErrorType for StdPort<F> {
    type Error = std::io::Error;
}

#[cfg(feature = "std")]
impl<F> ByteSource for StdPort<F>
where
    F: std::io::Read,
{
    fn available(&mut self) -> Result<bool, Self::Error> {
        Ok(self.fill()?.is_some())
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        self.fill()
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        self.fill()?;
        Ok(self.peeked.take())
    }
}

#[cfg(feature = "std")]
impl<F> embedded_io::Write for StdPort<F>
where
    F: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush()
    }
}


#[cfg(test)]
mod test {
    use super::mock::MockPort;
    use super::*;

    struct Chunked<'a> {
        data: &'a [u8],
    }

    impl embedded_io::ErrorType for Chunked<'_> {
        type Error = core::convert::Infallible;
    }

    impl embedded_io::Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    impl embedded_io::ReadReady for Chunked<'_> {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.data.is_empty())
        }
    }

    #[test]
    fn peekable_peek_does_not_consume() {
        let mut p = Peekable::new(Chunked { data: b"ab" });
        assert_eq!(p.peek(), Ok(Some(b'a')));
        assert_eq!(p.peek(), Ok(Some(b'a')));
        assert_eq!(p.read_byte(), Ok(Some(b'a')));
        assert_eq!(p.read_byte(), Ok(Some(b'b')));
        assert_eq!(p.available(), Ok(false));
        assert_eq!(p.read_byte(), Ok(None));
    }

    #[test]
    fn slice_replays() {
        let mut data: &[u8] = b"xy";
        assert_eq!(data.peek(), Ok(Some(b'x')));
        assert_eq!(data.read_byte(), Ok(Some(b'x')));
        assert_eq!(data, b"y");
        assert_eq!(data.drain(), Ok(1));
        assert_eq!(data.available(), Ok(false));
    }

    #[test]
    fn drain_empties_input() {
        let mut port = MockPort::new();
        port.feed(b"\x01\x02\x03");
        assert_eq!(port.drain(), Ok(3));
        assert_eq!(port.available(), Ok(false));
    }

    #[cfg(feature = "std")]
    struct Flaky {
        reads: std::collections::VecDeque<std::io::Result<u8>>,
    }

    #[cfg(feature = "std")]
    impl std::io::Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(b)) => {
                    buf[0] = b;
                    Ok(1)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_port_timeouts_are_empty() {
        use std::io::{Error, ErrorKind};

        let reads = [
            Ok(b'a'),
            Err(Error::from(ErrorKind::TimedOut)),
            Ok(b'b'),
            Err(Error::from(ErrorKind::BrokenPipe)),
        ];
        let mut port = StdPort::new(Flaky {
            reads: reads.into_iter().collect(),
        });
        assert_eq!(port.peek().unwrap(), Some(b'a'));
        assert_eq!(port.read_byte().unwrap(), Some(b'a'));
        assert!(!port.available().unwrap());
        assert_eq!(port.read_byte().unwrap(), Some(b'b'));
        assert_eq!(
            port.read_byte().unwrap_err().kind(),
            ErrorKind::BrokenPipe
        );
        // end of file
        assert_eq!(port.read_byte().unwrap(), None);
    }
}
