use std::path::{Path, PathBuf};

use crate::internal_prelude::*;

/// Represents a string that can be cheaply re-cast as an `OsStr`, and possibly also as a `CStr`.
///
/// This is essentially a combination of `AsRef<OsStr>` and a nul-termination-aware conversion; it
/// lets path-taking APIs accept `&str`, `&Path`, `&CStr`, etc. without forcing the caller to
/// allocate when the string is already nul-terminated.
pub trait AsPath {
    /// Convert this string to an `OsStr`.
    ///
    /// This serves a similar purpose to `AsRef<OsStr>::as_ref()`, so many of the `AsRef` rules
    /// apply (i.e. it should be very inexpensive and never fail).
    fn as_os_str(&self) -> &OsStr;

    /// Calls the given closure with a version of `self` converted to a `CStr`.
    ///
    /// The `CStr` may actually be a `CString` (allocated from the heap), or it may be the
    /// original string if that string is already nul-terminated.
    ///
    /// IMPORTANT: If the string contains an interior nul byte that prevents it from being
    /// converted to a `CString`, the closure will not be called, and an error will be returned.
    fn with_cstr<T, F: FnMut(&CStr) -> Result<T>>(&self, f: F) -> Result<T>;
}

macro_rules! osstr_ref_impl {
    ($($type:ty)*) => {
        $(
            impl AsPath for $type {
                #[inline]
                fn as_os_str(&self) -> &OsStr {
                    self.as_ref()
                }

                fn with_cstr<T, F: FnMut(&CStr) -> Result<T>>(&self, mut f: F) -> Result<T> {
                    if let Ok(s) = CString::new(self.as_os_str().as_bytes()) {
                        f(&s)
                    } else {
                        Err(Error::mid_nul())
                    }
                }
            }
        )*
    };
}

macro_rules! cstr_impl {
    ($($type:ty)*) => {
        $(
            impl AsPath for $type {
                #[inline]
                fn as_os_str(&self) -> &OsStr {
                    OsStr::from_bytes(self.to_bytes())
                }

                #[inline]
                fn with_cstr<T, F: FnMut(&CStr) -> Result<T>>(&self, mut f: F) -> Result<T> {
                    f(self)
                }
            }
        )*
    };
}

osstr_ref_impl! { &Path PathBuf &PathBuf &OsStr OsString &OsString &str String &String }
cstr_impl! { &CStr CString &CString }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_os_str() {
        assert_eq!(
            CStr::from_bytes_with_nul(b"abc/def\0").unwrap().as_os_str(),
            OsStr::new("abc/def")
        );

        assert_eq!("abc/def".as_os_str(), OsStr::new("abc/def"));
        assert_eq!(String::from("abc/def").as_os_str(), OsStr::new("abc/def"));
        assert_eq!(Path::new("abc/def").as_os_str(), OsStr::new("abc/def"));
        assert_eq!(PathBuf::from("abc/def").as_os_str(), OsStr::new("abc/def"));
    }

    #[test]
    fn test_with_cstr() {
        fn do_it<P: AsPath>(p: P) {
            let expected = CStr::from_bytes_with_nul(b"abc/def\0").unwrap();

            p.with_cstr(|s| {
                assert_eq!(s, expected);
                Ok(())
            })
            .unwrap();
        }

        do_it("abc/def");
        do_it(String::from("abc/def"));
        do_it(OsStr::new("abc/def"));
        do_it(Path::new("abc/def"));
        do_it(CString::new("abc/def").unwrap());
    }

    #[test]
    fn test_with_cstr_mid_nul() {
        assert_eq!(
            "abc\0def".with_cstr(|_| Ok(())).unwrap_err(),
            Error::from_code(libc::EINVAL)
        );
    }
}
