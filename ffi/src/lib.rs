//! C ABI for hosts that embed the query history.
//!
//! Handles returned here are owned by the caller and released with the matching
//! `*_free` function. Strings crossing the boundary are NUL-terminated UTF-8.
//! On failure a function returns null, `false` or [`QhistStatus::Failed`] and,
//! when `error` is non-null, stores an owned message there that the caller frees
//! with [`qhist_string_free`].

use qhist_core::types::{Config, HistoryConfig};
use qhist_search::{CancellationToken, Frequencies, QueryHistory};
use std::ffi::{CStr, CString, c_char};
use std::fmt::Display;
use std::path::PathBuf;
use std::ptr;
use tracing_subscriber::EnvFilter;

/// Opaque history handle.
pub struct QhistHistory(QueryHistory);

/// Outcome of [`qhist_history_add_query`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QhistStatus {
    Ok = 0,
    Failed = 1,
    /// The cancellable was triggered. No error message is produced.
    Cancelled = 2,
}

/// Opaque cancellation handle shared between the caller and an `add_query` call.
pub struct QhistCancellable(CancellationToken);

#[repr(C)]
pub struct QhistFrequency {
    pub hash: *mut c_char,
    pub count: u32,
}

/// Owned array of frequencies. `entries` is null when `len` is 0.
#[repr(C)]
pub struct QhistFrequencies {
    pub entries: *mut QhistFrequency,
    pub len: usize,
}

impl QhistFrequencies {
    fn empty() -> Self {
        Self {
            entries: ptr::null_mut(),
            len: 0,
        }
    }

    fn from_frequencies(frequencies: Frequencies) -> Self {
        let mut rows: Vec<(String, u32)> = frequencies.into_iter().collect();
        rows.sort_by(|(a_hash, a_count), (b_hash, b_count)| {
            b_count.cmp(a_count).then_with(|| a_hash.cmp(b_hash))
        });

        let entries: Box<[QhistFrequency]> = rows
            .into_iter()
            .filter_map(|(hash, count)| {
                let hash = CString::new(hash).ok()?.into_raw();
                Some(QhistFrequency { hash, count })
            })
            .collect();
        if entries.is_empty() {
            return Self::empty();
        }

        let len = entries.len();
        Self {
            entries: Box::into_raw(entries).cast::<QhistFrequency>(),
            len,
        }
    }
}

/// Reads a borrowed C string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn read_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

/// # Safety
/// `error` must be null or valid for a pointer write.
unsafe fn set_error(error: *mut *mut c_char, message: impl Display) {
    if error.is_null() {
        return;
    }
    let message = CString::new(message.to_string().replace('\0', " ")).unwrap_or_default();
    unsafe { *error = message.into_raw() };
}

/// Opens the history stored under `base_path`.
///
/// # Safety
/// `base_path` must be a valid C string; `error` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_history_new(
    base_path: *const c_char,
    error: *mut *mut c_char,
) -> *mut QhistHistory {
    let base_path = match unsafe { read_str(base_path, "base_path") } {
        Ok(path) => PathBuf::from(path),
        Err(message) => {
            unsafe { set_error(error, message) };
            return ptr::null_mut();
        }
    };

    match QueryHistory::open(Config { base_path }) {
        Ok(history) => Box::into_raw(Box::new(QhistHistory(history))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open query history.");
            unsafe { set_error(error, e) };
            ptr::null_mut()
        }
    }
}

/// Tears the history down. Null is ignored.
///
/// # Safety
/// `history` must come from [`qhist_history_new`] and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_history_free(history: *mut QhistHistory) {
    if !history.is_null() {
        drop(unsafe { Box::from_raw(history) });
    }
}

/// Match hash → count for every recorded query starting with `prefix`,
/// ordered by descending count. Release with [`qhist_frequencies_free`].
///
/// # Safety
/// `history` must be a live handle or null; `prefix` a valid C string or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_history_for_prefix(
    history: *const QhistHistory,
    prefix: *const c_char,
) -> QhistFrequencies {
    let Some(history) = (unsafe { history.as_ref() }) else {
        return QhistFrequencies::empty();
    };
    let Ok(prefix) = (unsafe { read_str(prefix, "prefix") }) else {
        return QhistFrequencies::empty();
    };
    QhistFrequencies::from_frequencies(history.0.history_for_prefix(prefix))
}

/// # Safety
/// `frequencies` must come from [`qhist_history_for_prefix`] and be freed once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_frequencies_free(frequencies: QhistFrequencies) {
    if frequencies.entries.is_null() {
        return;
    }
    let entries = unsafe {
        Box::from_raw(ptr::slice_from_raw_parts_mut(
            frequencies.entries,
            frequencies.len,
        ))
    };
    for entry in entries.iter() {
        if !entry.hash.is_null() {
            drop(unsafe { CString::from_raw(entry.hash) });
        }
    }
}

/// Records that `query` resolved to `hash`. Blocks on store I/O.
///
/// `cancellable` may be null. On [`QhistStatus::Failed`] the message goes to `error`.
///
/// # Safety
/// Pointer arguments must be live handles, valid C strings, or null where allowed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_history_add_query(
    history: *const QhistHistory,
    query: *const c_char,
    hash: *const c_char,
    cancellable: *const QhistCancellable,
    error: *mut *mut c_char,
) -> QhistStatus {
    let Some(history) = (unsafe { history.as_ref() }) else {
        unsafe { set_error(error, "history is null") };
        return QhistStatus::Failed;
    };
    let args = unsafe { read_str(query, "query") }
        .and_then(|query| Ok((query, unsafe { read_str(hash, "hash") }?)));
    let (query, hash) = match args {
        Ok(args) => args,
        Err(message) => {
            unsafe { set_error(error, message) };
            return QhistStatus::Failed;
        }
    };

    let cancel = match unsafe { cancellable.as_ref() } {
        Some(cancellable) => cancellable.0.clone(),
        None => CancellationToken::new(),
    };

    match history.0.add_query(query, hash, &cancel) {
        Ok(()) => QhistStatus::Ok,
        Err(e) if e.is_cancelled() => {
            tracing::debug!("Recording cancelled by host.");
            QhistStatus::Cancelled
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to record query.");
            unsafe { set_error(error, e) };
            QhistStatus::Failed
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn qhist_cancellable_new() -> *mut QhistCancellable {
    Box::into_raw(Box::new(QhistCancellable(CancellationToken::new())))
}

/// # Safety
/// `cancellable` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_cancellable_cancel(cancellable: *const QhistCancellable) {
    if let Some(cancellable) = unsafe { cancellable.as_ref() } {
        cancellable.0.cancel();
    }
}

/// # Safety
/// `cancellable` must come from [`qhist_cancellable_new`] and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_cancellable_free(cancellable: *mut QhistCancellable) {
    if !cancellable.is_null() {
        drop(unsafe { Box::from_raw(cancellable) });
    }
}

/// # Safety
/// `s` must be a string handed out by this library, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Installs a stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `logging.log_level` from the history
/// config under `base_path` is used. Fails if a subscriber is already installed.
///
/// # Safety
/// `base_path` must be a valid C string; `error` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qhist_init_logging(
    base_path: *const c_char,
    error: *mut *mut c_char,
) -> bool {
    let result = unsafe { read_str(base_path, "base_path") }.and_then(|base_path| {
        let config = Config {
            base_path: PathBuf::from(base_path),
        };
        let settings = HistoryConfig::load(&config.config_path())
            .map_err(|e| e.to_string())?
            .with_defaults_for_invalid();
        init_logging(&settings.logging.log_level)
    });

    match result {
        Ok(()) => true,
        Err(message) => {
            unsafe { set_error(error, message) };
            false
        }
    }
}

fn init_logging(default_level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| format!("Invalid log filter {default_level:?}: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| e.to_string())
}
