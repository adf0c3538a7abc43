/// Read access to the process-wide key/value property store. The daemon only
/// ever reads properties; writes stay with the host.
pub trait PropertyStore: Send + Sync {
    /// Returns the property value, or `None` when the key is unset.
    fn get(&self, key: &str) -> Option<String>;
}

#[cfg(target_os = "android")]
pub struct SystemProperties;

#[cfg(target_os = "android")]
impl PropertyStore for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        use std::ffi::{CStr, CString};

        const PROP_VALUE_MAX: usize = 92;
        let c_key = CString::new(key).ok()?;
        let mut buffer = vec![0u8; PROP_VALUE_MAX];
        let len = unsafe {
            libc::__system_property_get(c_key.as_ptr(), buffer.as_mut_ptr() as *mut libc::c_char)
        };
        if len <= 0 {
            return None;
        }
        let value = unsafe { CStr::from_ptr(buffer.as_ptr() as *const libc::c_char) };
        Some(value.to_string_lossy().into_owned())
    }
}
