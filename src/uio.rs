use std::marker::PhantomData;
use std::ops::Deref;

/// A borrowed buffer with the layout of an `iovec`, for scatter-gather I/O.
#[repr(transparent)]
pub(crate) struct IoVec<'a>(libc::iovec, PhantomData<&'a [u8]>);

impl<'a> IoVec<'a> {
    #[inline]
    pub fn new(s: &'a [u8]) -> Self {
        Self(
            libc::iovec {
                iov_base: s.as_ptr() as *mut _,
                iov_len: s.len(),
            },
            PhantomData,
        )
    }
}

impl<'a> Deref for IoVec<'a> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.iov_base as *const _, self.0.iov_len) }
    }
}

/// View a slice of `IoVec`s as raw `iovec`s for passing to the kernel.
#[inline]
pub(crate) fn as_raw_iovecs<'a, 'b>(iovs: &'b [IoVec<'a>]) -> &'b [libc::iovec] {
    // SAFETY: IoVec is repr(transparent) over libc::iovec
    unsafe { std::slice::from_raw_parts(iovs.as_ptr() as *const libc::iovec, iovs.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let buf = [1u8, 2, 3];
        let iov = IoVec::new(&buf);
        assert_eq!(&*iov, &buf);

        let iovs = [IoVec::new(&buf), IoVec::new(&buf[1..])];
        let raw = as_raw_iovecs(&iovs);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].iov_len, 3);
        assert_eq!(raw[1].iov_len, 2);
    }
}
