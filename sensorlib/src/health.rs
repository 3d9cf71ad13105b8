/// Communication health of a driver, as seen by the host.
///
/// `warning` is transient: it reflects the most recent cycle and is
/// cleared by the next good one. `failed` is permanent for the life of
/// the driver instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Health {
    warning: bool,
    failed: bool,
}

impl Health {
    /// A healthy status.
    pub const fn new() -> Self {
        Self {
            warning: false,
            failed: false,
        }
    }

    /// Is communication currently degraded?
    pub fn is_warning(&self) -> bool {
        self.warning
    }

    /// Did the driver fail permanently?
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Flag communication as degraded.
    pub fn set_warning(&mut self) {
        self.warning = true;
    }

    /// Communication succeeded.
    pub fn clear_warning(&mut self) {
        self.warning = false;
    }

    /// Disable the driver until it is recreated.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

/// A driver as driven by the host scheduler.
///
/// `poll` runs as often as the main loop does, `update` runs on the
/// driver's own timer. Both do nothing once the driver has failed.
pub trait Driver {
    type Error;

    /// Bring up the device. A driver that cannot reach its device at
    /// all marks itself failed.
    fn setup(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Advance the receive pipeline with whatever input is available.
    fn poll(&mut self) -> Result<(), Self::Error>;

    /// Periodic work, such as polling a device for a reading.
    fn update(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Current communication health.
    fn health(&self) -> Health;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn warning_is_transient() {
        let mut h = Health::new();
        h.set_warning();
        assert!(h.is_warning());
        h.clear_warning();
        assert!(!h.is_warning());
        assert!(!h.is_failed());
    }

    #[test]
    fn failure_is_sticky() {
        let mut h = Health::new();
        h.mark_failed();
        h.clear_warning();
        assert!(h.is_failed());
    }
}
