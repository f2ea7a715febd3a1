cfg_if::cfg_if! {
    if #[cfg(any(target_os = "freebsd", apple))] {
        use libc::__error as errno_ptr;
    } else if #[cfg(target_os = "dragonfly")] {
        use libc::__errno_location as errno_ptr;
    } else if #[cfg(netbsdlike)] {
        use libc::__errno as errno_ptr;
    }
}

/// Get the current thread's `errno` value.
#[inline]
pub fn errno_get() -> i32 {
    unsafe { *errno_ptr() }
}

/// Set the current thread's `errno` value.
#[inline]
pub fn errno_set(eno: i32) {
    unsafe {
        *errno_ptr() = eno;
    }
}
