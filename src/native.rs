//! Backend over the vendor's `ELCApi` module, loaded at runtime.
//!
//! The native callbacks carry no user data, so the dispatcher of the single
//! native session lives in a process-wide slot. That slot is also what limits
//! a process to one native session.

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::dispatch::{self, Dispatcher};
use crate::ffi::{self, ELCGazeSample};
use crate::sentinel::Sentinel;
use crate::{EyeLogicError, Result};
use libloading::Library;
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

static ACTIVE: RwLock<Option<Arc<Dispatcher>>> = RwLock::new(None);

// Codes returned when an entry point is used before the module is loaded.
const CONNECT_NOT_INITED: i32 = 1;
const NOT_CONNECTED: i32 = 1;

/// Resolved entry points. `library` is declared last so it unloads after the
/// function pointers are gone.
struct NativeApi {
    init: ffi::InitApiFn,
    destroy: ffi::DestroyApiFn,
    connect: ffi::ConnectFn,
    disconnect: ffi::DisconnectFn,
    is_connected: ffi::IsConnectedFn,
    request_tracking: ffi::RequestTrackingFn,
    unrequest_tracking: ffi::UnrequestTrackingFn,
    calibrate: ffi::CalibrateFn,
    invalid_value: f64,
    _library: Library,
}

impl NativeApi {
    /// # Safety
    /// Runs the module's initialisers; `path` must be the vendor library.
    unsafe fn load(path: &Path) -> Result<Self> {
        let library = Library::new(path)?;

        let invalid_ptr: *const f64 = symbol(&library, ffi::SYM_INVALID_VALUE)?;
        if invalid_ptr.is_null() {
            return Err(EyeLogicError::MissingSymbol(symbol_name(
                ffi::SYM_INVALID_VALUE,
            )));
        }

        Ok(Self {
            init: symbol(&library, ffi::SYM_INIT_API)?,
            destroy: symbol(&library, ffi::SYM_DESTROY_API)?,
            connect: symbol(&library, ffi::SYM_CONNECT)?,
            disconnect: symbol(&library, ffi::SYM_DISCONNECT)?,
            is_connected: symbol(&library, ffi::SYM_IS_CONNECTED)?,
            request_tracking: symbol(&library, ffi::SYM_REQUEST_TRACKING)?,
            unrequest_tracking: symbol(&library, ffi::SYM_UNREQUEST_TRACKING)?,
            calibrate: symbol(&library, ffi::SYM_CALIBRATE)?,
            invalid_value: invalid_ptr.read(),
            _library: library,
        })
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T> {
    library
        .get::<T>(name)
        .map(|sym| *sym)
        .map_err(|_| EyeLogicError::MissingSymbol(symbol_name(name)))
}

fn symbol_name(name: &'static [u8]) -> &'static str {
    let trimmed = name.strip_suffix(b"\0").unwrap_or(name);
    std::str::from_utf8(trimmed).unwrap_or("<non-utf8>")
}

/// Full path of the native module for `config`.
///
/// Defaults to the platform file name of `ELCApi`/`ELCApi32` in the directory
/// of the running executable.
pub fn library_path(config: &ClientConfig) -> PathBuf {
    let name = config
        .library_name
        .as_deref()
        .unwrap_or(ffi::LIBRARY_BASE_NAME);
    let dir = config.library_dir.clone().unwrap_or_else(|| {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    dir.join(libloading::library_filename(name))
}

/// [`Backend`] calling into the vendor library.
pub struct NativeBackend {
    config: ClientConfig,
    api: Option<NativeApi>,
    registered: bool,
}

impl NativeBackend {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            api: None,
            registered: false,
        }
    }

    pub fn library_path(&self) -> PathBuf {
        library_path(&self.config)
    }

    fn unregister(&mut self) {
        if self.registered {
            active_slot_clear();
            self.registered = false;
        }
    }
}

impl Backend for NativeBackend {
    fn load(&mut self) -> Result<Sentinel> {
        if let Some(api) = &self.api {
            return Ok(Sentinel::new(api.invalid_value));
        }

        let path = self.library_path();
        if !path.is_file() {
            return Err(EyeLogicError::LibraryNotFound { path });
        }
        let api = unsafe { NativeApi::load(&path)? };
        log::info!(
            "Loaded EyeLogic library {} (invalid value {})",
            path.display(),
            api.invalid_value
        );
        let sentinel = Sentinel::new(api.invalid_value);
        self.api = Some(api);
        Ok(sentinel)
    }

    fn init(&mut self, client_name: &CStr, dispatcher: Arc<Dispatcher>) -> Result<()> {
        if self.api.is_none() {
            self.load()?;
        }
        {
            let mut active = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
            if active.is_some() {
                return Err(EyeLogicError::SessionAlreadyActive);
            }
            *active = Some(dispatcher);
        }
        self.registered = true;

        let code = match &self.api {
            Some(api) => unsafe {
                (api.init)(
                    client_name.as_ptr(),
                    Some(on_gaze_sample),
                    Some(on_connection_closed),
                    Some(on_device_connected),
                    Some(on_device_disconnected),
                    Some(on_tracking_stopped),
                )
            },
            None => -1,
        };
        if code != 0 {
            log::warn!("elInitApi returned {}", code);
            self.unregister();
            self.api = None;
            return Err(EyeLogicError::InitFailed(code));
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if dispatch::delivering() {
            // Still inside one of the library's callbacks: it can be neither
            // destroyed nor unmapped from here.
            self.unregister();
            if let Some(api) = self.api.take() {
                log::warn!("EyeLogic session released from a handler; library left loaded");
                std::mem::forget(api);
            }
            return;
        }
        if let Some(api) = &self.api {
            if self.registered {
                unsafe { (api.destroy)() };
            }
        }
        self.unregister();
        if self.api.take().is_some() {
            log::info!("EyeLogic library released");
        }
    }

    fn connect(&self) -> i32 {
        match &self.api {
            Some(api) => unsafe { (api.connect)() },
            None => CONNECT_NOT_INITED,
        }
    }

    fn disconnect(&self) {
        if let Some(api) = &self.api {
            unsafe { (api.disconnect)() };
        }
    }

    fn is_connected(&self) -> bool {
        match &self.api {
            Some(api) => unsafe { (api.is_connected)() },
            None => false,
        }
    }

    fn request_tracking(&self, frame_rate_mode: i32) -> i32 {
        match &self.api {
            Some(api) => unsafe { (api.request_tracking)(frame_rate_mode) },
            None => NOT_CONNECTED,
        }
    }

    fn unrequest_tracking(&self) {
        if let Some(api) = &self.api {
            unsafe { (api.unrequest_tracking)() };
        }
    }

    fn calibrate(&self, calibration_mode: i32) -> i32 {
        match &self.api {
            Some(api) => unsafe { (api.calibrate)(calibration_mode) },
            None => NOT_CONNECTED,
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn active_dispatcher() -> Option<Arc<Dispatcher>> {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn active_slot_clear() {
    ACTIVE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

unsafe extern "C" fn on_gaze_sample(sample: *const ELCGazeSample) {
    if sample.is_null() {
        return;
    }
    if let Some(dispatcher) = active_dispatcher() {
        dispatcher.gaze_sample(&*sample);
    }
}

unsafe extern "C" fn on_connection_closed() {
    if let Some(dispatcher) = active_dispatcher() {
        dispatcher.connection_closed();
    }
}

unsafe extern "C" fn on_device_connected(
    device_id: i64,
    name: *const u8,
    name_len: i32,
    token: *const u8,
    token_len: i32,
) {
    if let Some(dispatcher) = active_dispatcher() {
        dispatcher.device_connected(
            device_id,
            ffi::buffer_slice(name, name_len),
            ffi::buffer_slice(token, token_len),
        );
    }
}

unsafe extern "C" fn on_device_disconnected() {
    if let Some(dispatcher) = active_dispatcher() {
        dispatcher.device_disconnected();
    }
}

unsafe extern "C" fn on_tracking_stopped() {
    if let Some(dispatcher) = active_dispatcher() {
        dispatcher.tracking_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_path_uses_config() {
        let cfg = ClientConfig::default()
            .with_library_dir("/opt/eyelogic")
            .with_library_name("ELCApiTest");
        let path = library_path(&cfg);
        assert!(path.starts_with("/opt/eyelogic"));
        let file = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file.contains("ELCApiTest"));
    }

    #[test]
    fn test_library_path_defaults_next_to_executable() {
        let path = library_path(&ClientConfig::default());
        let exe_dir = std::env::current_exe().unwrap();
        assert_eq!(path.parent(), exe_dir.parent());
        let file = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file.contains(ffi::LIBRARY_BASE_NAME));
    }

    #[test]
    fn test_missing_library_is_reported() {
        let dir = std::env::temp_dir().join("eyelogic-no-such-dir");
        let mut backend = NativeBackend::new(ClientConfig::default().with_library_dir(&dir));
        match backend.load() {
            Err(EyeLogicError::LibraryNotFound { path }) => assert!(path.starts_with(&dir)),
            other => panic!("expected LibraryNotFound, got {:?}", other.map(|s| s.value())),
        }
        // Entry points stay inert without a module.
        assert_eq!(backend.connect(), CONNECT_NOT_INITED);
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_symbol_name() {
        assert_eq!(symbol_name(ffi::SYM_CONNECT), "elConnect");
    }
}
