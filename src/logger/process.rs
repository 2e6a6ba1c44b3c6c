use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{bail, Context, Result};

use crate::config::LoggerConfig;

use super::{LoggerLauncher, LoggerProcess};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Launches the logger as an OS process.
///
/// The command line is `[interpreter] <program> [args] --session-id <id>
/// --output-file <path>`, with relative paths resolved against the project
/// root. Detached children get their own process group (Unix) or console
/// (Windows) so they outlive the controlling terminal.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    interpreter: Option<String>,
    program: PathBuf,
    args: Vec<String>,
    logs_dir: PathBuf,
    working_dir: PathBuf,
    detach: bool,
}

impl ProcessLauncher {
    pub fn new(config: &LoggerConfig, project_root: &Path) -> Self {
        Self {
            interpreter: config
                .interpreter
                .clone()
                .filter(|value| !value.trim().is_empty()),
            program: resolve(project_root, &config.program),
            args: config.args.clone(),
            logs_dir: resolve(project_root, &config.logs_dir),
            working_dir: project_root.to_path_buf(),
            detach: config.detach,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn build_command(&self, session_id: &str, output_path: &Path) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };

        cmd.args(&self.args)
            .arg("--session-id")
            .arg(session_id)
            .arg("--output-file")
            .arg(output_path)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null());

        if self.detach {
            detach(&mut cmd);
        }

        cmd
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
    cmd.creation_flags(CREATE_NEW_CONSOLE);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

impl LoggerLauncher for ProcessLauncher {
    fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    fn launch(&self, session_id: &str, output_path: &Path) -> Result<Box<dyn LoggerProcess>> {
        // An interpreter starts fine even when the script is missing, so check up front.
        if self.interpreter.is_some() && !self.program.is_file() {
            bail!("logger script {} does not exist", self.program.display());
        }

        let child = self
            .build_command(session_id, output_path)
            .spawn()
            .with_context(|| format!("failed to spawn logger {}", self.program.display()))?;

        log_info!(
            "Logger started for session {} (pid {}), writing to {}",
            session_id,
            child.id(),
            output_path.display()
        );

        Ok(Box::new(ChildLogger { child }))
    }
}

#[derive(Debug)]
struct ChildLogger {
    child: Child,
}

impl LoggerProcess for ChildLogger {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn interrupt(mut self: Box<Self>) -> Result<()> {
        let pid = self.child.id();
        if let Some(status) = self
            .child
            .try_wait()
            .with_context(|| format!("failed to query logger pid {pid}"))?
        {
            bail!("logger pid {pid} already exited ({status})");
        }

        send_interrupt(&mut self.child)?;
        log_info!("Interrupt sent to logger pid {}", pid);

        reap_in_background(self.child);
        Ok(())
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).context("logger pid out of range")?;
    kill(Pid::from_raw(pid), Signal::SIGINT)
        .with_context(|| format!("failed to send SIGINT to logger pid {pid}"))
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) -> Result<()> {
    log_warn!(
        "No cooperative interrupt on this platform; terminating logger pid {}",
        child.id()
    );
    child.kill().context("failed to terminate logger")
}

/// Waits for the exit on a throwaway thread so no zombie is left behind and
/// the caller never blocks.
fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let spawned = thread::Builder::new()
        .name(format!("brainplaner-logger-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => log_info!("Logger pid {} exited ({})", pid, status),
            Err(err) => log_warn!("Failed to wait for logger pid {}: {}", pid, err),
        });

    if let Err(err) = spawned {
        log_error!("Failed to start reaper for logger pid {}: {}", pid, err);
    }
}
