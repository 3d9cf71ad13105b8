use crate::exchange::ExchangeError;

/// An error produced by a driver.
///
/// Malformed frames arriving on their own are never reported this
/// way. They are logged and the frame reader resynchronizes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// IO error in the underlying port.
    Io(E),
    /// A synchronous command exchange did not complete.
    Exchange(ExchangeError),
    /// The driver failed during setup and is disabled.
    Failed,
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: core::fmt::Debug {}

impl<E> core::fmt::Display for Error<E>
where
    E: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {:?}", e),
            Self::Exchange(e) => write!(f, "exchange error: {}", e),
            Self::Failed => write!(f, "driver failed"),
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(other: E) -> Self {
        Self::Io(other)
    }
}
