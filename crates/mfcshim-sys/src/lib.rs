// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::type_complexity)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

include!("ffi.rs");

// Re-export libloading for error handling
pub use libloading;

use std::sync::{Mutex, OnceLock, PoisonError};

static LIBRARY: OnceLock<MfcEngineLibrary> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Default engine library name, resolved through the system search path.
pub const DEFAULT_LIBRARY: &str = "libmfcengine.so";

/// Path of the engine library to load.
///
/// The environment variable `MFCSHIM_LIBRARY` overrides the default
/// `libmfcengine.so`.
pub fn library_path() -> String {
    std::env::var("MFCSHIM_LIBRARY").unwrap_or_else(|_| DEFAULT_LIBRARY.to_string())
}

/// Initialize the engine bindings by loading libmfcengine.so
///
/// This must be called before using any engine function. The library is
/// loaded once per process; later calls return the same instance.
/// Returns an error if the library cannot be loaded.
pub fn init() -> Result<&'static MfcEngineLibrary, libloading::Error> {
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    // Double-check after acquiring lock
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let path = library_path();
    let lib = unsafe { MfcEngineLibrary::new(std::ffi::OsStr::new(&path))? };
    Ok(LIBRARY.get_or_init(move || lib))
}

/// Try to get a reference to the loaded library without loading it
pub fn try_library() -> Option<&'static MfcEngineLibrary> {
    LIBRARY.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_reports_error() {
        let missing = std::ffi::OsStr::new("libmfcengine-does-not-exist.so");
        assert!(unsafe { MfcEngineLibrary::new(missing) }.is_err());
    }

    #[test]
    fn test_default_library_name() {
        if std::env::var_os("MFCSHIM_LIBRARY").is_none() {
            assert_eq!(library_path(), DEFAULT_LIBRARY);
        }
    }
}
