use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value, json};

use medley_contracts::EventSink;

/// Callback receiving rendered progress lines (JSON events and plain info).
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// An observer that sees every structured event as it is emitted.
/// Installed by the pair runner to aggregate `api:*` breadcrumbs.
pub trait EmitTap: Send + Sync {
    fn observe(&self, event: &str, payload: &Map<String, Value>);
}

struct EmitterInner {
    cb: RwLock<Option<ProgressFn>>,
    tap: Mutex<Option<Arc<dyn EmitTap>>>,
    debug: bool,
}

/// Structured event emitter.
///
/// Events go out as single JSON lines of the form
/// `{"event": "...", ...fields}`; `info` lines pass through verbatim.
/// Emitting must never fail the run, so the emitter has no error surface.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("debug", &self.inner.debug).finish()
    }
}

impl Emitter {
    pub fn new(cb: Option<ProgressFn>, debug: bool) -> Emitter {
        Emitter {
            inner: Arc::new(EmitterInner {
                cb: RwLock::new(cb),
                tap: Mutex::new(None),
                debug,
            }),
        }
    }

    /// Swap the progress callback, returning the previous one.
    pub fn set_callback(&self, cb: Option<ProgressFn>) -> Option<ProgressFn> {
        let mut slot = self.inner.cb.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, cb)
    }

    /// Install an event tap for the duration of a run.
    pub fn install_tap(&self, tap: Arc<dyn EmitTap>) {
        *self.inner.tap.lock().unwrap_or_else(|e| e.into_inner()) = Some(tap);
    }

    /// Remove the current tap, if any.
    pub fn remove_tap(&self) {
        *self.inner.tap.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Emit a structured event. Non-object payloads land under `data`.
    pub fn emit(&self, event: &str, payload: Value) {
        let mut fields = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("data".to_string(), other);
                m
            }
        };

        if let Some(tap) = self.inner.tap.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            tap.observe(event, &fields);
        }

        let cb = self.inner.cb.read().unwrap_or_else(|e| e.into_inner());
        let Some(cb) = cb.as_ref() else { return };
        fields.insert("event".to_string(), Value::String(event.to_string()));
        // Serializing a Map<String, Value> cannot fail; keep the line compact.
        if let Ok(line) = serde_json::to_string(&Value::Object(fields)) {
            cb(&line);
        }
    }

    /// Pass a human-readable line straight through to the callback.
    pub fn info(&self, line: &str) {
        let cb = self.inner.cb.read().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = cb.as_ref() {
            cb(line);
        }
    }

    /// Debug breadcrumb, dropped unless debug mode is on.
    pub fn dbg(&self, msg: &str, payload: Value) {
        if !self.inner.debug {
            return;
        }
        let mut fields = json!({ "msg": msg });
        if let (Value::Object(out), Value::Object(extra)) = (&mut fields, payload) {
            out.extend(extra);
        }
        self.emit("debug", fields);
    }

    pub fn debug_enabled(&self) -> bool {
        self.inner.debug
    }
}

impl EventSink for Emitter {
    fn event(&self, name: &str, payload: Value) {
        self.emit(name, payload);
    }
}
