/// A logical pin of the target microcontroller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct PinName(pub u32);

impl PinName {
    /// Marker for "not connected".
    pub const NC: PinName = PinName(u32::MAX);
}

impl core::fmt::Display for PinName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if *self == Self::NC {
            f.write_str("NC")
        } else {
            write!(f, "P{}", self.0)
        }
    }
}

/// An entry of a board's pin table.
///
/// The meaning of `peripheral` and `function` is defined by the target: usually the former
/// identifies the timer and the latter the channel together with target specific flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct PinMap {
    pub pin: PinName,
    pub peripheral: u32,
    pub function: u32,
}

impl PinMap {
    /// Sentinel that terminates a pin table handed out through the C interface.
    pub const END: PinMap = PinMap::new(PinName::NC, 0, 0);

    pub const fn new(pin: PinName, peripheral: u32, function: u32) -> Self {
        Self {
            pin,
            peripheral,
            function,
        }
    }
}

/// Looks up the entry for `pin` in `map`.
///
/// The scan stops at the first [`PinMap::END`] sentinel.
pub fn pinmap_peripheral(pin: PinName, map: &[PinMap]) -> Option<&PinMap> {
    if pin == PinName::NC {
        return None;
    }
    map.iter()
        .take_while(|entry| entry.pin != PinName::NC)
        .find(|entry| entry.pin == pin)
}
