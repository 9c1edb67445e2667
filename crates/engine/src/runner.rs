//! Script lifecycle management.
//!
//! One facade owns one run slot: at most one user script executes at a time,
//! on a dedicated worker thread. `start`/`stop` are meant to be driven from a
//! single control thread (typically a UI); the internal mutex exists because
//! the worker must flag its own crash, not to make the lifecycle a
//! concurrent-safe API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use mlua::{Lua, Table as LuaTable, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use common::Result;

use crate::facade::ScriptEngine;
use crate::script_api::ScriptBot;

/// Name of the entry function every script must define.
pub const ENTRY_FUNCTION: &str = "run";

/// State of the single run slot.
///
/// `Crashed` carries the formatted trace so a caller can tell "still running"
/// from "dead but unstopped". Both states occupy the slot; only an explicit
/// `stop` returns it to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Crashed(String),
}

impl RunState {
    pub fn is_occupied(&self) -> bool {
        !matches!(self, RunState::Idle)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Crashed(_) => write!(f, "crashed"),
        }
    }
}

/// How a script module was obtained relative to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Fresh,
    Reloaded,
    Unchanged,
}

struct LoadedModule {
    name: String,
    source: String,
    /// Resolved containing directory, made importable for `require`.
    dir: Option<PathBuf>,
    provenance: Provenance,
}

struct RunnerInner {
    state: RunState,
    worker: Option<JoinHandle<()>>,
}

/// Owns the run slot, the worker thread and the module cache.
pub struct ScriptRunner {
    /// Cooperative cancellation flag polled by scripts via `bot:is_active()`.
    active: AtomicBool,
    inner: Mutex<RunnerInner>,
    /// Content digests keyed by resolved path, so same-named scripts in
    /// different directories never collide and edits are picked up.
    digests: Mutex<HashMap<PathBuf, String>>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            inner: Mutex::new(RunnerInner {
                state: RunState::Idle,
                worker: None,
            }),
            digests: Mutex::new(HashMap::new()),
        }
    }

    // A crashed worker must not poison the lifecycle lock.
    fn lock_inner(&self) -> MutexGuard<'_, RunnerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RunState {
        self.lock_inner().state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Occupy the slot and spawn the worker. Returns `false` without touching
    /// anything when the slot is already occupied (running or crashed).
    pub(crate) fn start(&self, engine: Arc<ScriptEngine>, path: PathBuf) -> bool {
        let mut inner = self.lock_inner();
        if inner.state.is_occupied() {
            debug!(state = %inner.state, "run slot occupied, start ignored");
            return false;
        }

        self.active.store(true, Ordering::SeqCst);
        inner.state = RunState::Running;

        let spawned = std::thread::Builder::new()
            .name("script-worker".into())
            .spawn(move || run_worker(engine, path));

        match spawned {
            Ok(worker) => {
                inner.worker = Some(worker);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn script worker");
                self.active.store(false, Ordering::SeqCst);
                inner.state = RunState::Idle;
                false
            }
        }
    }

    /// Free the slot. Returns `false` without any thread operation when the
    /// slot is already idle.
    ///
    /// Cancellation is cooperative only: the active flag is cleared and the
    /// worker is joined without a timeout, so this blocks the caller for as
    /// long as the script takes to notice.
    pub(crate) fn stop(&self) -> bool {
        let worker = {
            let mut inner = self.lock_inner();
            if !inner.state.is_occupied() {
                return false;
            }
            self.active.store(false, Ordering::SeqCst);
            inner.worker.take()
        };

        // Join outside the lock: the worker's crash path takes the same lock.
        if let Some(worker) = worker {
            let _ = worker.join();
        }

        self.lock_inner().state = RunState::Idle;
        true
    }

    fn mark_crashed(&self, trace: String) {
        self.lock_inner().state = RunState::Crashed(trace);
    }

    /// Read the script source through the content-digest cache.
    fn load_module(&self, path: &Path) -> Result<LoadedModule> {
        let resolved = path.canonicalize()?;
        let source = std::fs::read_to_string(&resolved)?;
        let digest = hex::encode(Sha256::digest(source.as_bytes()));
        let name = resolved
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("script")
            .to_string();

        let mut digests = self
            .digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let provenance = match digests.get(&resolved) {
            None => Provenance::Fresh,
            Some(previous) if *previous == digest => Provenance::Unchanged,
            Some(_) => Provenance::Reloaded,
        };
        let dir = resolved.parent().map(Path::to_path_buf);
        digests.insert(resolved, digest);

        Ok(LoadedModule {
            name,
            source,
            dir,
            provenance,
        })
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker body: any failure is caught here, logged once with its trace, and
/// flips the slot to `Crashed`. Nothing propagates to the control thread.
fn run_worker(engine: Arc<ScriptEngine>, path: PathBuf) {
    if let Err(trace) = execute_script(&engine, &path) {
        engine.write_log(&format!("Script raised an exception and was aborted\n{trace}"));
        engine.runner.mark_crashed(trace);
    }
}

fn execute_script(engine: &Arc<ScriptEngine>, path: &Path) -> std::result::Result<(), String> {
    let module = engine
        .runner
        .load_module(path)
        .map_err(|e| e.to_string())?;

    match module.provenance {
        Provenance::Fresh => {
            engine.write_log(&format!("Script module {} loaded", module.name));
        }
        Provenance::Reloaded => {
            engine.write_log(&format!("Script module {} reloaded (source changed)", module.name));
        }
        Provenance::Unchanged => {
            engine.write_log(&format!("Script module {} unchanged, reusing cached module", module.name));
        }
    }

    call_entry(engine, &module).map_err(|e| e.to_string())
}

fn call_entry(engine: &Arc<ScriptEngine>, module: &LoadedModule) -> mlua::Result<()> {
    let lua = Lua::new();

    // Make the script's containing directory importable for `require`.
    if let Some(dir) = &module.dir {
        let package: LuaTable = lua.globals().get("package")?;
        let search_path: String = package.get("path")?;
        package.set("path", format!("{}/?.lua;{search_path}", dir.display()))?;
    }

    lua.load(module.source.as_str())
        .set_name(module.name.as_str())
        .exec()?;

    let entry: Value = lua.globals().get(ENTRY_FUNCTION)?;
    let Value::Function(entry) = entry else {
        return Err(mlua::Error::RuntimeError(format!(
            "script '{}' does not define a `{ENTRY_FUNCTION}(bot)` entry function",
            module.name
        )));
    };

    entry.call::<()>(ScriptBot::new(engine.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;

    #[test]
    fn fresh_runner_is_idle_and_inactive() {
        let runner = ScriptRunner::new();
        assert_eq!(runner.state(), RunState::Idle);
        assert!(!runner.is_active());
    }

    #[test]
    fn stop_on_idle_runner_is_a_no_op() {
        let runner = ScriptRunner::new();
        assert!(!runner.stop());
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[test]
    fn module_digest_tracks_content_not_name() {
        let dir = std::env::temp_dir().join(format!("runner-digest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("probe.lua");

        std::fs::write(&path, "function run(bot) end").unwrap();
        let runner = ScriptRunner::new();
        assert_eq!(runner.load_module(&path).unwrap().provenance, Provenance::Fresh);
        assert_eq!(
            runner.load_module(&path).unwrap().provenance,
            Provenance::Unchanged
        );

        std::fs::write(&path, "function run(bot) return 1 end").unwrap();
        let module = runner.load_module(&path).unwrap();
        assert_eq!(module.provenance, Provenance::Reloaded);
        assert_eq!(module.name, "probe");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_script_is_an_io_error() {
        let runner = ScriptRunner::new();
        let result = runner.load_module(Path::new("no-such-script.lua"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
