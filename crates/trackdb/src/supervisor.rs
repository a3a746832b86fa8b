//! Helper programs run on behalf of the catalog: the rescanner and the
//! database upgrader.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

use tracing::{error, info, warn};

use crate::config::CatalogConfig;
use crate::error::{Result, TrackDbError};

pub type RescanCallback = Box<dyn FnOnce(bool) + Send>;

fn debug_flag(debug: bool) -> &'static str {
    if debug {
        "--debug"
    } else {
        "--no-debug"
    }
}

/// The upgrade program, run to completion while the database is not in use.
#[derive(Clone, Debug)]
pub struct UpgradeProgram {
    pub program: PathBuf,
    pub config_path: PathBuf,
    pub debug: bool,
}

impl UpgradeProgram {
    pub fn new(config: &CatalogConfig, config_path: &Path, debug: bool) -> Self {
        Self {
            program: PathBuf::from(&config.upgrade_program),
            config_path: config_path.to_path_buf(),
            debug,
        }
    }

    pub fn run(&self) -> Result<()> {
        info!("Running {:?}", self.program);
        let status = Command::new(&self.program)
            .arg("--config")
            .arg(&self.config_path)
            .arg(debug_flag(self.debug))
            .status()
            .map_err(|err| {
                TrackDbError::UpgradeFailed(format!("cannot run {:?}: {}", self.program, err))
            })?;
        if !status.success() {
            return Err(TrackDbError::UpgradeFailed(format!(
                "{:?} {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

struct Rescan {
    child: Child,
    callbacks: Vec<RescanCallback>,
}

pub struct Supervisor {
    rescan_program: PathBuf,
    config_path: PathBuf,
    debug: bool,
    rescan: Option<Rescan>,
    after_rescan: Vec<Box<dyn Fn() + Send>>,
}

impl Supervisor {
    pub fn new(config: &CatalogConfig, config_path: &Path, debug: bool) -> Self {
        Self {
            rescan_program: PathBuf::from(&config.rescan_program),
            config_path: config_path.to_path_buf(),
            debug,
            rescan: None,
            after_rescan: Vec::new(),
        }
    }

    /// Runs `hook` whenever a rescan finishes, however it ended.
    pub fn on_rescan_finished(&mut self, hook: Box<dyn Fn() + Send>) {
        self.after_rescan.push(hook);
    }

    /// Starts a rescan, with `check` asking it to also drop vanished tracks.
    /// If one is already running `on_done` joins its callbacks and false is
    /// returned.
    pub fn start_rescan(&mut self, check: bool, on_done: Option<RescanCallback>) -> Result<bool> {
        self.poll()?;
        if let Some(rescan) = &mut self.rescan {
            error!("rescan already underway");
            rescan.callbacks.extend(on_done);
            return Ok(false);
        }
        let child = Command::new(&self.rescan_program)
            .arg("--config")
            .arg(&self.config_path)
            .arg(debug_flag(self.debug))
            .arg(if check { "--check" } else { "--no-check" })
            .spawn()?;
        info!("Started rescan (pid {})", child.id());
        self.rescan = Some(Rescan {
            child,
            callbacks: on_done.into_iter().collect(),
        });
        Ok(true)
    }

    /// Asks a running rescan to stop with SIGTERM. The rescanner stops
    /// between tracks; its callbacks report how it exited.
    pub fn cancel_rescan(&mut self) -> Result<bool> {
        self.poll()?;
        let signalled = match &mut self.rescan {
            Some(rescan) => {
                info!("Cancelling rescan (pid {})", rescan.child.id());
                terminate(&mut rescan.child)?;
                true
            }
            None => false,
        };
        self.poll()?;
        Ok(signalled)
    }

    pub fn rescan_underway(&mut self) -> Result<bool> {
        self.poll()?;
        Ok(self.rescan.is_some())
    }

    /// Reaps a finished rescan without blocking and runs its callbacks.
    pub fn poll(&mut self) -> Result<()> {
        let status = match &mut self.rescan {
            Some(rescan) => rescan.child.try_wait()?,
            None => return Ok(()),
        };
        if let Some(status) = status {
            self.finish(status);
        }
        Ok(())
    }

    /// Blocks until a running rescan exits.
    pub fn wait(&mut self) -> Result<()> {
        let status = match &mut self.rescan {
            Some(rescan) => rescan.child.wait()?,
            None => return Ok(()),
        };
        self.finish(status);
        Ok(())
    }

    fn finish(&mut self, status: ExitStatus) {
        let rescan = match self.rescan.take() {
            Some(rescan) => rescan,
            None => return,
        };
        if status.success() {
            info!("Rescan completed");
        } else {
            warn!("Rescan ended: {}", status);
        }
        for hook in &self.after_rescan {
            hook();
        }
        for callback in rescan.callbacks {
            callback(status.success());
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| TrackDbError::Io(std::io::Error::other(format!("bad pid {}", child.id()))))?;
    // SAFETY: `pid` is our unreaped child, so it cannot have been reused.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    child.kill()?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(program: &Path) -> Supervisor {
        let config = CatalogConfig {
            rescan_program: program.to_string_lossy().to_string(),
            ..CatalogConfig::default()
        };
        Supervisor::new(&config, Path::new("/nonexistent/config.yaml"), false)
    }

    #[test]
    fn completed_rescan_runs_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let program = script(
            dir.path(),
            "rescan",
            &format!("echo \"$@\" > {}", args_file.display()),
        );
        let mut supervisor = supervisor(&program);
        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = hooks.clone();
        supervisor.on_rescan_finished(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        assert!(supervisor
            .start_rescan(true, Some(Box::new(move |ok: bool| *seen.lock().unwrap() = Some(ok))))
            .unwrap());
        supervisor.wait().unwrap();

        assert_eq!(*outcome.lock().unwrap(), Some(true));
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert!(!supervisor.rescan_underway().unwrap());
        let args = fs::read_to_string(&args_file).unwrap();
        assert_eq!(args.trim(), "--config /nonexistent/config.yaml --no-debug --check");
    }

    #[test]
    fn second_request_joins_running_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "rescan", "exec sleep 30");
        let mut supervisor = supervisor(&program);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = calls.clone();
        assert!(supervisor
            .start_rescan(false, Some(Box::new(move |ok: bool| first.lock().unwrap().push(ok))))
            .unwrap());
        let second = calls.clone();
        assert!(!supervisor
            .start_rescan(false, Some(Box::new(move |ok: bool| second.lock().unwrap().push(ok))))
            .unwrap());
        assert!(supervisor.rescan_underway().unwrap());

        assert!(supervisor.cancel_rescan().unwrap());
        supervisor.wait().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![false, false]);
        assert!(!supervisor.cancel_rescan().unwrap());
    }

    #[test]
    fn cancel_sends_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let stopped = dir.path().join("stopped");
        let program = script(
            dir.path(),
            "rescan",
            &format!(
                "trap 'echo stopped > {}; exit 0' TERM\ntouch {}\nwhile true; do sleep 0.1; done",
                stopped.display(),
                ready.display()
            ),
        );
        let mut supervisor = supervisor(&program);
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        assert!(supervisor
            .start_rescan(false, Some(Box::new(move |ok: bool| *seen.lock().unwrap() = Some(ok))))
            .unwrap());
        for _ in 0..500 {
            if ready.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(ready.exists());

        assert!(supervisor.cancel_rescan().unwrap());
        supervisor.wait().unwrap();
        assert_eq!(*outcome.lock().unwrap(), Some(true));
        assert_eq!(fs::read_to_string(&stopped).unwrap().trim(), "stopped");
    }

    #[test]
    fn failing_upgrade_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = UpgradeProgram {
            program: script(dir.path(), "upgrade", "exit 3"),
            config_path: dir.path().join("config.yaml"),
            debug: true,
        };
        assert!(matches!(program.run(), Err(TrackDbError::UpgradeFailed(_))));

        let ok = UpgradeProgram {
            program: script(dir.path(), "upgrade-ok", "exit 0"),
            ..program
        };
        assert!(ok.run().is_ok());
    }
}
