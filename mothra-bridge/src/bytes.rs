//! Buffer marshalling between native (pointer, length) views and host-owned arrays.
//! Bytes are always copied across the boundary, never aliased, and never re-encoded.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::slice;

use crate::error::{BridgeError, Result};

/// Borrowed payload owned by the caller for the duration of one call.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ByteView<'a>(&'a [u8]);

impl<'a> ByteView<'a> {
    pub const EMPTY: ByteView<'static> = ByteView(&[]);

    pub fn new(bytes: &'a [u8]) -> Self {
        ByteView(bytes)
    }

    /// View over a raw C pair. A null pointer or a non-positive length is the empty payload.
    ///
    /// # Safety
    /// When `ptr` is non-null and `len > 0`, `ptr` must be valid for reads of `len` bytes for `'a`.
    pub unsafe fn from_raw(ptr: *const u8, len: c_int) -> Self {
        if ptr.is_null() || len <= 0 {
            return ByteView(&[]);
        }
        ByteView(slice::from_raw_parts(ptr, len as usize))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pointer and length for handing the view to C. The pointer is never null.
    pub fn to_raw(&self) -> Result<(*const u8, c_int)> {
        let len = c_int::try_from(self.0.len()).map_err(|_| {
            BridgeError::InvalidArgument(format!("payload of {} bytes exceeds c_int", self.0.len()))
        })?;
        Ok((self.0.as_ptr(), len))
    }

    /// Lossy UTF-8 rendering. Log fields only; payloads are never decoded.
    pub fn display(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.0)
    }
}

impl<'a> From<&'a [u8]> for ByteView<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ByteView(bytes)
    }
}

impl<'a> From<&'a str> for ByteView<'a> {
    fn from(s: &'a str) -> Self {
        ByteView(s.as_bytes())
    }
}

impl fmt::Debug for ByteView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes, {:?})", self.0.len(), self.display())
    }
}

/// Host-owned byte array. Always a valid array, zero-length included; never null.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HostByteArray(Box<[u8]>);

impl HostByteArray {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        HostByteArray(bytes.into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for HostByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostByteArray({} bytes)", self.0.len())
    }
}

/// Allocate a host array of the same length and copy the view into it.
pub fn to_host_array(view: ByteView<'_>) -> HostByteArray {
    HostByteArray(view.as_bytes().into())
}

/// Borrow the array's backing storage. Valid until the array is dropped.
pub fn from_host_array(array: &HostByteArray) -> ByteView<'_> {
    ByteView(&array.0)
}

/// Copy host strings into NUL-terminated native strings owned for one call.
pub fn to_c_strings<S: AsRef<str>>(values: &[S]) -> Result<Vec<CString>> {
    values
        .iter()
        .map(|v| {
            CString::new(v.as_ref()).map_err(|e| {
                BridgeError::InvalidArgument(format!(
                    "interior NUL at byte {} in {:?}",
                    e.nul_position(),
                    v.as_ref()
                ))
            })
        })
        .collect()
}

/// Copy a C string vector into owned strings. Invalid UTF-8 is replaced lossily.
///
/// # Safety
/// When `count > 0`, `argv` must point to `count` valid NUL-terminated strings.
pub unsafe fn from_c_string_array(argv: *const *const c_char, count: c_int) -> Result<Vec<String>> {
    if count <= 0 {
        return Ok(Vec::new());
    }
    if argv.is_null() {
        return Err(BridgeError::InvalidArgument(format!(
            "null argument vector with {count} entries"
        )));
    }
    let ptrs = slice::from_raw_parts(argv, count as usize);
    let mut out = Vec::with_capacity(ptrs.len());
    for (i, p) in ptrs.iter().enumerate() {
        if p.is_null() {
            return Err(BridgeError::InvalidArgument(format!("argument {i} is null")));
        }
        match CStr::from_ptr(*p).to_string_lossy() {
            Cow::Borrowed(s) => out.push(s.to_owned()),
            Cow::Owned(s) => {
                tracing::warn!(index = i, "argument is not valid UTF-8; replaced lossily");
                out.push(s);
            }
        }
    }
    Ok(out)
}
