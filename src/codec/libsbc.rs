//! SBC encoder backed by the system libsbc.
//!
//! The library is linked by the build script when the `libsbc` feature is
//! enabled. `SBC_LIB_DIR` points the linker at a non-standard prefix.

#![allow(unsafe_code)] // FFI requires unsafe

use std::ffi::{c_int, c_ulong, c_void};
use std::ptr;

use bytes::BytesMut;

use crate::codec::{Encoded, SbcConfig, SbcEncoder};
use crate::CodecError;

// MARK: - FFI Types

/// Mirror of `sbc_t` from `<sbc/sbc.h>`.
#[repr(C)]
struct RawSbc {
    flags: c_ulong,
    frequency: u8,
    blocks: u8,
    subbands: u8,
    mode: u8,
    allocation: u8,
    bitpool: u8,
    endian: u8,
    priv_: *mut c_void,
    priv_alloc_base: *mut c_void,
}

extern "C" {
    fn sbc_init(sbc: *mut RawSbc, flags: c_ulong) -> c_int;
    fn sbc_reinit(sbc: *mut RawSbc, flags: c_ulong) -> c_int;
    fn sbc_encode(
        sbc: *mut RawSbc,
        input: *const c_void,
        input_len: usize,
        output: *mut c_void,
        output_len: usize,
        written: *mut isize,
    ) -> isize;
    fn sbc_get_frame_length(sbc: *mut RawSbc) -> usize;
    fn sbc_get_codesize(sbc: *mut RawSbc) -> usize;
    fn sbc_finish(sbc: *mut RawSbc);
}

/// [`SbcEncoder`] using libsbc.
///
/// # Example
///
/// ```no_run
/// use sbc_relay::codec::{LibSbc, SbcConfig, SbcEncoder};
///
/// let mut encoder = LibSbc::new();
/// encoder.init(&SbcConfig::default())?;
/// assert_eq!(encoder.codesize(), 512);
/// # Ok::<(), sbc_relay::CodecError>(())
/// ```
pub struct LibSbc {
    raw: RawSbc,
    initialized: bool,
    frame_length: usize,
    codesize: usize,
}

// Safety: the codec state is only touched through &mut self and libsbc keeps
// no thread-local state.
unsafe impl Send for LibSbc {}

impl LibSbc {
    /// Creates an uninitialized encoder.
    pub fn new() -> Self {
        Self {
            raw: RawSbc {
                flags: 0,
                frequency: 0,
                blocks: 0,
                subbands: 0,
                mode: 0,
                allocation: 0,
                bitpool: 0,
                endian: 0,
                priv_: ptr::null_mut(),
                priv_alloc_base: ptr::null_mut(),
            },
            initialized: false,
            frame_length: 0,
            codesize: 0,
        }
    }
}

impl Default for LibSbc {
    fn default() -> Self {
        Self::new()
    }
}

impl SbcEncoder for LibSbc {
    fn init(&mut self, config: &SbcConfig) -> Result<(), CodecError> {
        // Safety: `raw` is a valid sbc_t; reinit is only used after init.
        let rc = unsafe {
            if self.initialized {
                sbc_reinit(&mut self.raw, 0)
            } else {
                sbc_init(&mut self.raw, 0)
            }
        };
        if rc < 0 {
            return Err(CodecError::InvalidConfig(format!("sbc_init returned {rc}")));
        }
        self.initialized = true;

        self.raw.frequency = config.frequency.code();
        self.raw.blocks = config.blocks.code();
        self.raw.subbands = config.subbands.code();
        self.raw.mode = config.mode.code();
        self.raw.allocation = config.allocation.code();
        self.raw.bitpool = config.bitpool;
        self.raw.endian = config.endianness.code();

        // Safety: `raw` was initialized above.
        unsafe {
            self.frame_length = sbc_get_frame_length(&mut self.raw);
            self.codesize = sbc_get_codesize(&mut self.raw);
        }
        Ok(())
    }

    fn codesize(&self) -> usize {
        self.codesize
    }

    fn encode(&mut self, input: &[u8]) -> Result<Encoded, CodecError> {
        if !self.initialized {
            return Err(CodecError::NotConfigured);
        }
        if input.len() < self.codesize {
            return Err(CodecError::ShortInput {
                needed: self.codesize,
                available: input.len(),
            });
        }

        let mut out = BytesMut::zeroed(self.frame_length);
        let mut written: isize = 0;
        // Safety: both buffers are valid for the lengths passed.
        let consumed = unsafe {
            sbc_encode(
                &mut self.raw,
                input.as_ptr().cast(),
                input.len(),
                out.as_mut_ptr().cast(),
                out.len(),
                &mut written,
            )
        };

        if consumed < 0 {
            return Err(CodecError::EncodeFailed(format!("sbc_encode returned {consumed}")));
        }
        out.truncate(written.max(0) as usize);
        Ok(Encoded {
            consumed: consumed as usize,
            frame: out.freeze(),
        })
    }

    fn finish(&mut self) {
        if self.initialized {
            // Safety: `raw` was initialized and is not used afterwards.
            unsafe { sbc_finish(&mut self.raw) };
            self.initialized = false;
        }
    }
}

impl Drop for LibSbc {
    fn drop(&mut self) {
        self.finish();
    }
}
