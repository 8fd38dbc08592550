//! Memory utilities for crossing the guest/host boundary
//!
//! This is the only module that deals in raw addresses. Everything above it
//! works with `&str`, `String` and owned protocol values.

use netgate_api::unpack_ptr_len;
use std::alloc::{alloc, dealloc, Layout};
use thiserror::Error;

/// Text could not be marshaled across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("Text of {0} bytes does not fit in a boundary length")]
    TooLong(usize),
}

/// Borrowed UTF-8 view of a string as (pointer, length)
///
/// Lives only as long as the text it points into, so a view can never
/// outlast the boundary call it was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryStr<'a> {
    text: &'a str,
}

impl<'a> BoundaryStr<'a> {
    /// Create a view, rejecting text whose length does not fit an `i32`
    pub fn new(text: &'a str) -> Result<Self, EncodingError> {
        if text.len() > i32::MAX as usize {
            return Err(EncodingError::TooLong(text.len()));
        }
        Ok(Self { text })
    }

    /// Start of the UTF-8 bytes
    pub fn ptr(&self) -> *const u8 {
        self.text.as_ptr()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }
}

/// Allocate memory in the Wasm linear memory
///
/// Exported to the host so it can write replies into guest memory.
#[inline]
pub fn plugin_alloc(size: i32) -> i32 {
    if size <= 0 {
        return 0;
    }
    match Layout::from_size_align(size as usize, 1) {
        Ok(layout) => unsafe { alloc(layout) as i32 },
        Err(_) => 0,
    }
}

/// Deallocate memory in the Wasm linear memory
///
/// The ptr must have been allocated by `plugin_alloc` with the same size.
#[inline]
pub fn plugin_dealloc(ptr: i32, size: i32) {
    if ptr == 0 || size <= 0 {
        return;
    }
    if let Ok(layout) = Layout::from_size_align(size as usize, 1) {
        unsafe { dealloc(ptr as u32 as usize as *mut u8, layout) }
    }
}

/// Copy out and free a buffer the host wrote into guest memory
///
/// Returns `None` for the packed value `0` or a non-positive length.
///
/// # Safety
/// `packed` must come from a host import that allocated the buffer with
/// `plugin_alloc` and filled all `len` bytes.
pub unsafe fn take_host_buffer(packed: i64) -> Option<Vec<u8>> {
    let (ptr, len) = unpack_ptr_len(packed);
    if ptr == 0 || len <= 0 {
        return None;
    }
    let bytes = std::slice::from_raw_parts(ptr as u32 as usize as *const u8, len as usize).to_vec();
    plugin_dealloc(ptr, len);
    Some(bytes)
}
