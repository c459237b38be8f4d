//! Logging and assertion macros.
//!
//! With the `defmt` feature the macros forward to [`defmt`]. Without it the log macros only
//! evaluate their arguments and the panic macro forwards to [`core::panic`].

#[macro_export]
#[doc(hidden)]
#[collapse_debuginfo(yes)]
macro_rules! __panic {
    ($($x:tt)*) => {
        {
            #[cfg(feature = "defmt")]
            defmt::panic!($($x)*);
            #[cfg(not(feature = "defmt"))]
            core::panic!($($x)*);
        }
    };
}

#[macro_export]
#[doc(hidden)]
#[collapse_debuginfo(yes)]
macro_rules! __warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            defmt::warn!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($(&$x),*);
        }
    };
}

#[macro_export]
#[doc(hidden)]
#[collapse_debuginfo(yes)]
macro_rules! __debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            defmt::debug!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($(&$x),*);
        }
    };
}

#[doc(inline)]
pub use {__debug as debug, __panic as panic, __warn as warn};
