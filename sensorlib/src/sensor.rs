use alloc::boxed::Box;

/// A published reading's destination.
///
/// An unconfigured sensor means nobody downstream asked for the value;
/// publishing to it discards the value.
pub struct Sensor<T> {
    sink: Option<Box<dyn FnMut(T)>>,
}

impl<T> Sensor<T> {
    /// A sensor with no sink.
    pub const fn none() -> Self {
        Self { sink: None }
    }

    /// A sensor that forwards every published value to `sink`.
    pub fn new<F>(sink: F) -> Self
    where
        F: FnMut(T) + 'static,
    {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    /// Is anything listening?
    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// Deliver a value once, if configured.
    pub fn publish(&mut self, value: T) {
        if let Some(sink) = self.sink.as_mut() {
            sink(value);
        }
    }
}

impl<T> Default for Sensor<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> core::fmt::Debug for Sensor<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if self.is_configured() {
            write!(f, "Sensor(configured)")
        } else {
            write!(f, "Sensor(none)")
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;

    /// A sensor recording everything published to it.
    pub(crate) fn recorder<T: 'static>() -> (Sensor<T>, Rc<RefCell<Vec<T>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner = log.clone();
        (Sensor::new(move |v| inner.borrow_mut().push(v)), log)
    }

    #[test]
    fn unconfigured_discards() {
        let mut s = Sensor::<f32>::none();
        assert!(!s.is_configured());
        s.publish(1.0);
    }

    #[test]
    fn configured_forwards_once() {
        let (mut s, log) = recorder();
        s.publish(3u8);
        s.publish(4u8);
        assert_eq!(*log.borrow(), [3, 4]);
    }
}
