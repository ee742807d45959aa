use std::ffi::CString;
use tracing::{debug, trace};

/// Ask the dynamic loader of the calling process for an exported symbol.
///
/// `module` is only consulted if it is already loaded (`RTLD_NOLOAD`); a
/// lookup never causes a library to be loaded. When the module is not
/// loaded under that name (eg. `libdl.so` folded into libc), the global
/// symbol scope is searched instead.
pub fn find_export(module: &str, symbol: &str) -> Option<usize> {
    let symbol_c = CString::new(symbol).ok()?;
    let module_c = CString::new(module).ok()?;

    // SAFETY: both strings are NUL-terminated and outlive the calls. The
    // handle obtained with RTLD_NOLOAD holds a reference that is released
    // before returning; the symbol address stays valid while the module is
    // loaded by someone else.
    let address = unsafe {
        let handle = libc::dlopen(module_c.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD);
        if handle.is_null() {
            trace!(module, "module not loaded, searching global scope");
            libc::dlsym(libc::RTLD_DEFAULT, symbol_c.as_ptr())
        } else {
            let address = libc::dlsym(handle, symbol_c.as_ptr());
            libc::dlclose(handle);
            address
        }
    };

    if address.is_null() {
        debug!(module, symbol, "export not found");
        None
    } else {
        Some(address as usize)
    }
}
