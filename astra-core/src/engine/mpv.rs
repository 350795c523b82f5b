// MPV ENGINE - libmpv backend via dynamic library loading
//
// Loads libmpv at runtime - no compile-time dependency.
//
// Call flow:
// 1. Load libmpv and resolve the client API entry points
// 2. mpv_create -> set options -> mpv_initialize
// 3. Commands / property reads / property writes
// 4. mpv_terminate_destroy
//
// Node-valued reads are copied into an owned `Node` tree and the native tree is
// released with mpv_free_node_contents before the call returns.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_double, c_int};
use std::ptr;

use once_cell::sync::Lazy;

use super::{status, EngineBackend, NativeStatus, Node, PropertyFormat, PropertyValue};
use crate::error::EngineError;

// ============================================================================
// libmpv Types (from mpv/client.h)
// ============================================================================

type MpvHandle = *mut c_void;
type MpvFormat = c_int;

const MPV_FORMAT_NONE: MpvFormat = 0;
const MPV_FORMAT_STRING: MpvFormat = 1;
const MPV_FORMAT_FLAG: MpvFormat = 3;
const MPV_FORMAT_INT64: MpvFormat = 4;
const MPV_FORMAT_DOUBLE: MpvFormat = 5;
const MPV_FORMAT_NODE: MpvFormat = 6;
const MPV_FORMAT_NODE_ARRAY: MpvFormat = 7;
const MPV_FORMAT_NODE_MAP: MpvFormat = 8;
const MPV_FORMAT_BYTE_ARRAY: MpvFormat = 9;

#[repr(C)]
#[derive(Clone, Copy)]
union MpvNodeValue {
    string: *mut c_char,
    flag: c_int,
    int64: i64,
    double_: c_double,
    list: *mut MpvNodeList,
    ba: *mut MpvByteArray,
}

#[repr(C)]
struct MpvNode {
    u: MpvNodeValue,
    format: MpvFormat,
}

#[repr(C)]
struct MpvNodeList {
    num: c_int,
    values: *mut MpvNode,
    keys: *mut *mut c_char,
}

#[repr(C)]
struct MpvByteArray {
    data: *mut c_void,
    size: usize,
}

// ============================================================================
// Library Path Detection
// ============================================================================

#[cfg(target_os = "linux")]
const LIBMPV_CANDIDATES: &[&str] = &["libmpv.so.2", "libmpv.so.1", "libmpv.so"];

#[cfg(target_os = "windows")]
const LIBMPV_CANDIDATES: &[&str] = &["libmpv-2.dll", "mpv-2.dll", "mpv-1.dll"];

#[cfg(target_os = "macos")]
const LIBMPV_CANDIDATES: &[&str] = &[
    "libmpv.2.dylib",
    "libmpv.dylib",
    "/opt/homebrew/lib/libmpv.dylib",
    "/usr/local/lib/libmpv.dylib",
];

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
const LIBMPV_CANDIDATES: &[&str] = &["libmpv.so"];

// ============================================================================
// Function Types
// ============================================================================

type MpvCreateFn = unsafe extern "C" fn() -> MpvHandle;
type MpvInitializeFn = unsafe extern "C" fn(MpvHandle) -> c_int;
type MpvTerminateDestroyFn = unsafe extern "C" fn(MpvHandle);
type MpvSetOptionStringFn = unsafe extern "C" fn(MpvHandle, *const c_char, *const c_char) -> c_int;
type MpvCommandFn = unsafe extern "C" fn(MpvHandle, *mut *const c_char) -> c_int;
type MpvGetPropertyFn =
    unsafe extern "C" fn(MpvHandle, *const c_char, MpvFormat, *mut c_void) -> c_int;
type MpvSetPropertyFn =
    unsafe extern "C" fn(MpvHandle, *const c_char, MpvFormat, *mut c_void) -> c_int;
type MpvFreeFn = unsafe extern "C" fn(*mut c_void);
type MpvFreeNodeContentsFn = unsafe extern "C" fn(*mut MpvNode);
type MpvErrorStringFn = unsafe extern "C" fn(c_int) -> *const c_char;

// ============================================================================
// Loaded Functions Container
// ============================================================================

struct MpvLibrary {
    _lib: libloading::Library,
    path: &'static str,

    mpv_create: MpvCreateFn,
    mpv_initialize: MpvInitializeFn,
    mpv_terminate_destroy: MpvTerminateDestroyFn,
    mpv_set_option_string: MpvSetOptionStringFn,
    mpv_command: MpvCommandFn,
    mpv_get_property: MpvGetPropertyFn,
    mpv_set_property: MpvSetPropertyFn,
    mpv_free: MpvFreeFn,
    mpv_free_node_contents: MpvFreeNodeContentsFn,
    mpv_error_string: MpvErrorStringFn,
}

unsafe impl Send for MpvLibrary {}
unsafe impl Sync for MpvLibrary {}

static MPV_LIB: Lazy<Option<MpvLibrary>> = Lazy::new(load_mpv_library);

fn load_mpv_library() -> Option<MpvLibrary> {
    for path in LIBMPV_CANDIDATES.iter().copied() {
        let lib = match unsafe { libloading::Library::new(path) } {
            Ok(lib) => lib,
            Err(e) => {
                tracing::debug!("libmpv candidate {} not loadable: {}", path, e);
                continue;
            }
        };

        match unsafe { resolve_symbols(lib, path) } {
            Some(mpv) => {
                tracing::info!("libmpv loaded from {}", mpv.path);
                return Some(mpv);
            }
            None => tracing::warn!("{} is missing libmpv client API symbols", path),
        }
    }

    tracing::warn!("No usable libmpv found (tried {:?})", LIBMPV_CANDIDATES);
    None
}

unsafe fn resolve_symbols(lib: libloading::Library, path: &'static str) -> Option<MpvLibrary> {
    let mpv_create: MpvCreateFn = *lib.get(b"mpv_create\0").ok()?;
    let mpv_initialize: MpvInitializeFn = *lib.get(b"mpv_initialize\0").ok()?;
    let mpv_terminate_destroy: MpvTerminateDestroyFn = *lib.get(b"mpv_terminate_destroy\0").ok()?;
    let mpv_set_option_string: MpvSetOptionStringFn = *lib.get(b"mpv_set_option_string\0").ok()?;
    let mpv_command: MpvCommandFn = *lib.get(b"mpv_command\0").ok()?;
    let mpv_get_property: MpvGetPropertyFn = *lib.get(b"mpv_get_property\0").ok()?;
    let mpv_set_property: MpvSetPropertyFn = *lib.get(b"mpv_set_property\0").ok()?;
    let mpv_free: MpvFreeFn = *lib.get(b"mpv_free\0").ok()?;
    let mpv_free_node_contents: MpvFreeNodeContentsFn = *lib.get(b"mpv_free_node_contents\0").ok()?;
    let mpv_error_string: MpvErrorStringFn = *lib.get(b"mpv_error_string\0").ok()?;

    Some(MpvLibrary {
        _lib: lib,
        path,
        mpv_create,
        mpv_initialize,
        mpv_terminate_destroy,
        mpv_set_option_string,
        mpv_command,
        mpv_get_property,
        mpv_set_property,
        mpv_free,
        mpv_free_node_contents,
        mpv_error_string,
    })
}

/// Whether a libmpv library could be loaded on this machine.
pub fn is_available() -> bool {
    MPV_LIB.is_some()
}

// ============================================================================
// Backend
// ============================================================================

/// libmpv engine instance.
pub struct MpvEngine {
    lib: &'static MpvLibrary,
    ctx: MpvHandle,
}

// The handle is only touched through the bridge's lock.
unsafe impl Send for MpvEngine {}

impl MpvEngine {
    /// Load libmpv (once per process) and create an uninitialized instance.
    pub fn load() -> Result<Self, EngineError> {
        let lib = MPV_LIB.as_ref().ok_or_else(|| {
            EngineError::LibraryUnavailable(format!("tried {}", LIBMPV_CANDIDATES.join(", ")))
        })?;

        let ctx = unsafe { (lib.mpv_create)() };
        if ctx.is_null() {
            return Err(EngineError::InitFailed {
                code: status::NOMEM,
                message: "mpv_create returned null".to_string(),
            });
        }
        Ok(Self { lib, ctx })
    }

    fn c_string(value: &str) -> Result<CString, NativeStatus> {
        CString::new(value).map_err(|_| status::INVALID_PARAMETER)
    }

    fn check(code: c_int) -> Result<(), NativeStatus> {
        if code < 0 {
            Err(code)
        } else {
            Ok(())
        }
    }

    /// Copy a native node into owned memory. Does not free anything.
    unsafe fn read_node(&self, node: &MpvNode) -> Node {
        match node.format {
            MPV_FORMAT_STRING => Node::String(read_c_str(node.u.string)),
            MPV_FORMAT_FLAG => Node::Flag(node.u.flag != 0),
            MPV_FORMAT_INT64 => Node::Int64(node.u.int64),
            MPV_FORMAT_DOUBLE => Node::Double(node.u.double_),
            MPV_FORMAT_NODE_ARRAY => {
                let list = node.u.list;
                if list.is_null() {
                    return Node::Array(Vec::new());
                }
                let list = &*list;
                let mut items = Vec::with_capacity(list.num.max(0) as usize);
                for i in 0..list.num.max(0) as usize {
                    items.push(self.read_node(&*list.values.add(i)));
                }
                Node::Array(items)
            }
            MPV_FORMAT_NODE_MAP => {
                let list = node.u.list;
                if list.is_null() {
                    return Node::Map(Vec::new());
                }
                let list = &*list;
                let mut entries = Vec::with_capacity(list.num.max(0) as usize);
                for i in 0..list.num.max(0) as usize {
                    let key = read_c_str(*list.keys.add(i));
                    entries.push((key, self.read_node(&*list.values.add(i))));
                }
                Node::Map(entries)
            }
            MPV_FORMAT_BYTE_ARRAY => {
                let ba = node.u.ba;
                if ba.is_null() || (*ba).data.is_null() {
                    return Node::ByteArray(Vec::new());
                }
                let bytes = std::slice::from_raw_parts((*ba).data as *const u8, (*ba).size);
                Node::ByteArray(bytes.to_vec())
            }
            _ => Node::None,
        }
    }
}

unsafe fn read_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Untyped data pointer for the property calls.
fn out_ptr<T>(value: &mut T) -> *mut c_void {
    value as *mut T as *mut c_void
}

impl EngineBackend for MpvEngine {
    fn name(&self) -> &str {
        "libmpv"
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<(), NativeStatus> {
        let name = Self::c_string(name)?;
        let value = Self::c_string(value)?;
        let set = self.lib.mpv_set_option_string;
        Self::check(unsafe { set(self.ctx, name.as_ptr(), value.as_ptr()) })
    }

    fn initialize(&mut self) -> Result<(), NativeStatus> {
        Self::check(unsafe { (self.lib.mpv_initialize)(self.ctx) })
    }

    fn command(&mut self, args: &[&str]) -> Result<(), NativeStatus> {
        let owned = args
            .iter()
            .map(|a| Self::c_string(a))
            .collect::<Result<Vec<_>, _>>()?;
        let mut argv: Vec<*const c_char> = owned.iter().map(|a| a.as_ptr()).collect();
        argv.push(ptr::null());
        Self::check(unsafe { (self.lib.mpv_command)(self.ctx, argv.as_mut_ptr()) })
    }

    fn get_property(
        &mut self,
        name: &str,
        format: PropertyFormat,
    ) -> Result<PropertyValue, NativeStatus> {
        let cname = Self::c_string(name)?;
        let (get, ctx, key) = (self.lib.mpv_get_property, self.ctx, cname.as_ptr());
        unsafe {
            match format {
                PropertyFormat::Flag => {
                    let mut out: c_int = 0;
                    Self::check(get(ctx, key, MPV_FORMAT_FLAG, out_ptr(&mut out)))?;
                    Ok(PropertyValue::Flag(out != 0))
                }
                PropertyFormat::Int64 => {
                    let mut out: i64 = 0;
                    Self::check(get(ctx, key, MPV_FORMAT_INT64, out_ptr(&mut out)))?;
                    Ok(PropertyValue::Int64(out))
                }
                PropertyFormat::Double => {
                    let mut out: c_double = 0.0;
                    Self::check(get(ctx, key, MPV_FORMAT_DOUBLE, out_ptr(&mut out)))?;
                    Ok(PropertyValue::Double(out))
                }
                PropertyFormat::String => {
                    let mut out: *mut c_char = ptr::null_mut();
                    Self::check(get(ctx, key, MPV_FORMAT_STRING, out_ptr(&mut out)))?;
                    let value = read_c_str(out);
                    if !out.is_null() {
                        (self.lib.mpv_free)(out as *mut c_void);
                    }
                    Ok(PropertyValue::String(value))
                }
                PropertyFormat::Node => {
                    let mut out = MpvNode {
                        u: MpvNodeValue { int64: 0 },
                        format: MPV_FORMAT_NONE,
                    };
                    Self::check(get(ctx, key, MPV_FORMAT_NODE, out_ptr(&mut out)))?;
                    let node = self.read_node(&out);
                    (self.lib.mpv_free_node_contents)(&mut out);
                    Ok(PropertyValue::Node(node))
                }
            }
        }
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), NativeStatus> {
        let cname = Self::c_string(name)?;
        let (set, ctx, key) = (self.lib.mpv_set_property, self.ctx, cname.as_ptr());
        unsafe {
            match value {
                PropertyValue::Flag(v) => {
                    let mut data: c_int = *v as c_int;
                    Self::check(set(ctx, key, MPV_FORMAT_FLAG, out_ptr(&mut data)))
                }
                PropertyValue::Int64(v) => {
                    let mut data: i64 = *v;
                    Self::check(set(ctx, key, MPV_FORMAT_INT64, out_ptr(&mut data)))
                }
                PropertyValue::Double(v) => {
                    let mut data: c_double = *v;
                    Self::check(set(ctx, key, MPV_FORMAT_DOUBLE, out_ptr(&mut data)))
                }
                PropertyValue::String(v) => {
                    let text = Self::c_string(v)?;
                    let mut data: *const c_char = text.as_ptr();
                    Self::check(set(ctx, key, MPV_FORMAT_STRING, out_ptr(&mut data)))
                }
                // Node trees are read-only in this core
                PropertyValue::Node(_) => Err(status::UNSUPPORTED),
            }
        }
    }

    fn error_string(&self, code: NativeStatus) -> String {
        let text = unsafe { (self.lib.mpv_error_string)(code) };
        let text = unsafe { read_c_str(text) };
        if text.is_empty() {
            format!("mpv error {}", code)
        } else {
            text
        }
    }

    fn destroy(&mut self) {
        if !self.ctx.is_null() {
            unsafe { (self.lib.mpv_terminate_destroy)(self.ctx) };
            self.ctx = ptr::null_mut();
        }
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reports_missing_library_as_typed_error() {
        match MpvEngine::load() {
            Ok(mut engine) => {
                assert!(is_available());
                engine.destroy();
                engine.destroy();
            }
            Err(e) => {
                assert!(!is_available());
                assert!(matches!(e, EngineError::LibraryUnavailable(_)));
            }
        }
    }

    #[test]
    fn test_node_union_matches_c_layout() {
        assert_eq!(std::mem::size_of::<MpvNodeValue>(), 8);
        assert_eq!(std::mem::size_of::<MpvNode>(), 16);
    }
}
