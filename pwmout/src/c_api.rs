//! Export of the C interface.
//!
//! Firmware that links C code against this HAL invokes [`export_c_api!`] once with the PWM
//! output type of its target and a `'static` reference to the board peripherals. The macro
//! defines the `pwmout_t` storage type and the `pwmout_*` functions:
//!
//! ```c
//! void  pwmout_init(pwmout_t *obj, PinName pin);
//! void  pwmout_init_direct(pwmout_t *obj, const PinMap *pinmap);
//! void  pwmout_free(pwmout_t *obj);
//! void  pwmout_write(pwmout_t *obj, float percent);
//! float pwmout_read(pwmout_t *obj);
//! void  pwmout_period(pwmout_t *obj, float seconds);
//! void  pwmout_period_ms(pwmout_t *obj, int ms);
//! void  pwmout_period_us(pwmout_t *obj, int us);
//! int   pwmout_read_period_us(pwmout_t *obj);
//! void  pwmout_pulsewidth(pwmout_t *obj, float seconds);
//! void  pwmout_pulsewidth_ms(pwmout_t *obj, int ms);
//! void  pwmout_pulsewidth_us(pwmout_t *obj, int us);
//! int   pwmout_read_pulsewidth_us(pwmout_t *obj);
//! const PinMap *pwmout_pinmap(void);
//! ```
//!
//! Failing to claim a channel is fatal. Negative durations are treated as zero. Calling any
//! function other than the `init` functions on an uninitialised `pwmout_t` is undefined
//! behavior. The pin table returned by `pwmout_pinmap` must end with [`PinMap::END`] for C
//! callers to find its end.
//!
//! [`PinMap::END`]: crate::PinMap::END

use crate::Error;

/// Converts a C `int` duration to the unsigned value used by [`PwmOut`](crate::PwmOut).
#[doc(hidden)]
pub const fn non_negative(value: i32) -> u32 {
    if value < 0 { 0 } else { value as u32 }
}

/// Converts an unsigned duration back to a C `int`, saturating.
#[doc(hidden)]
pub const fn to_c_int(value: u32) -> i32 {
    if value > i32::MAX as u32 {
        i32::MAX
    } else {
        value as i32
    }
}

/// Aborts after a `pwmout_init*` call could not claim a channel.
#[doc(hidden)]
#[cold]
pub fn init_failed(error: Error) -> ! {
    crate::util::panic!("pwmout initialisation failed: {}", error)
}

/// Defines the `pwmout_*` C functions for a [`Target`](crate::Target).
///
/// ```ignore
/// static BOARD: SimBoard<4> = SimBoard::new(&PIN_MAP);
/// pwmout::export_c_api!(SimPwm<'static, 4>, &BOARD);
/// ```
#[macro_export]
macro_rules! export_c_api {
    ($target:ty, $peripherals:expr $(,)?) => {
        /// Storage for a PWM output handle.
        #[allow(non_camel_case_types)]
        #[repr(C)]
        pub struct pwmout_t {
            handle: ::core::mem::MaybeUninit<$target>,
        }

        fn __pwmout_claimed(result: ::core::result::Result<$target, $crate::Error>) -> $target {
            match result {
                Ok(handle) => handle,
                Err(error) => $crate::c_api::init_failed(error),
            }
        }

        /// # Safety
        ///
        /// `obj` must point to writable storage for a `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_init(obj: *mut pwmout_t, pin: $crate::PinName) {
            let handle = __pwmout_claimed(<$target as $crate::Target<'static>>::init(
                $peripherals,
                pin,
            ));
            unsafe {
                (*obj).handle.write(handle);
            }
        }

        /// # Safety
        ///
        /// `obj` must point to writable storage for a `pwmout_t` and `pinmap` to a valid
        /// pin table entry.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_init_direct(
            obj: *mut pwmout_t,
            pinmap: *const $crate::PinMap,
        ) {
            let map = unsafe { &*pinmap };
            let handle = __pwmout_claimed(<$target as $crate::Target<'static>>::init_direct(
                $peripherals,
                map,
            ));
            unsafe {
                (*obj).handle.write(handle);
            }
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`. It is uninitialised afterwards.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_free(obj: *mut pwmout_t) {
            let handle = unsafe { (*obj).handle.assume_init_read() };
            <$target as $crate::Target<'static>>::free(handle);
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_write(obj: *mut pwmout_t, percent: f32) {
            $crate::PwmOut::write(unsafe { (*obj).handle.assume_init_mut() }, percent);
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_read(obj: *mut pwmout_t) -> f32 {
            $crate::PwmOut::read(unsafe { (*obj).handle.assume_init_ref() })
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_period(obj: *mut pwmout_t, seconds: f32) {
            $crate::PwmOut::period(unsafe { (*obj).handle.assume_init_mut() }, seconds);
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_period_ms(obj: *mut pwmout_t, ms: i32) {
            $crate::PwmOut::period_ms(
                unsafe { (*obj).handle.assume_init_mut() },
                $crate::c_api::non_negative(ms),
            );
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_period_us(obj: *mut pwmout_t, us: i32) {
            $crate::PwmOut::period_us(
                unsafe { (*obj).handle.assume_init_mut() },
                $crate::c_api::non_negative(us),
            );
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_read_period_us(obj: *mut pwmout_t) -> i32 {
            $crate::c_api::to_c_int($crate::PwmOut::read_period_us(unsafe {
                (*obj).handle.assume_init_ref()
            }))
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_pulsewidth(obj: *mut pwmout_t, seconds: f32) {
            $crate::PwmOut::pulsewidth(unsafe { (*obj).handle.assume_init_mut() }, seconds);
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_pulsewidth_ms(obj: *mut pwmout_t, ms: i32) {
            $crate::PwmOut::pulsewidth_ms(
                unsafe { (*obj).handle.assume_init_mut() },
                $crate::c_api::non_negative(ms),
            );
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_pulsewidth_us(obj: *mut pwmout_t, us: i32) {
            $crate::PwmOut::pulsewidth_us(
                unsafe { (*obj).handle.assume_init_mut() },
                $crate::c_api::non_negative(us),
            );
        }

        /// # Safety
        ///
        /// `obj` must point to an initialised `pwmout_t`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn pwmout_read_pulsewidth_us(obj: *mut pwmout_t) -> i32 {
            $crate::c_api::to_c_int($crate::PwmOut::read_pulsewidth_us(unsafe {
                (*obj).handle.assume_init_ref()
            }))
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn pwmout_pinmap() -> *const $crate::PinMap {
            <$target as $crate::Target<'static>>::pinmap($peripherals).as_ptr()
        }
    };
}
