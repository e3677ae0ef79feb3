//! Developer logging with a custom "level 6" and a thread-local sink for deterministic tests.
//! Scan benchmarks (one JSON line per drained partition) go through here so tests can
//! assert on them without installing a global logger.

use std::cell::RefCell;

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Disables the thread-local sink on drop.
pub struct DevSinkGuard;

impl Drop for DevSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Start capturing `dev6!` output on the current thread until the guard drops.
pub fn enable_thread_sink() -> DevSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DevSinkGuard
}

pub fn write_str(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Take everything captured so far on this thread.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

/// Parse captured lines that are JSON bench records for `op`.
pub fn bench_records(op: &str) -> Vec<serde_json::Value> {
    TL_SINK.with(|s| {
        s.borrow()
            .as_ref()
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
                    .filter(|v| v.get("op").and_then(serde_json::Value::as_str) == Some(op))
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Emit a developer log (level 6) and capture it in the thread-local sink if enabled.
#[macro_export]
macro_rules! dev6 {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        $crate::utils::devlog::write_str(&__s);
        log::log!(target: "docscan::dev6", log::Level::Trace, "{}", __s);
    }};
}
