//! Handles `run`: create a container, start its task, and either print
//! the ID (detached) or stay attached until the task exits or the user
//! types the detach sequence.

use std::io::Write;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

use anyhow::{Context as _, Result};
use crossbeam_channel::Receiver;
use libdocker_cli::Run;
use libstevedore::remove::{remove_container, RemoveOptions};
use libstevedore::runtime::{RuntimeError, Services, TaskIo};
use libstevedore::tty::{self, DetachScanner, RawModeGuard};
use libstevedore::{create, task};
use nix::sys::signal::{self, SigHandler, Signal};

use crate::context::Context;

pub fn run(ctx: &Context, cmd: Run) -> Result<i32> {
    let opts = super::create::to_options(
        ctx,
        &cmd.options,
        &cmd.image,
        &cmd.args,
        cmd.detach,
    )?;
    let container = create::create_container(
        &ctx.services,
        &ctx.store,
        &ctx.names,
        &ctx.namespace,
        &opts,
    )?;
    let id = container.id().to_string();

    let io = TaskIo {
        tty: opts.tty,
        stdin: opts.interactive,
        log_uri: container.labels.log_uri.clone(),
        stdout: foreground_writer(cmd.detach, || std::io::stdout()),
        stderr: foreground_writer(cmd.detach, || std::io::stderr()),
    };

    let exit = match task::start_task(&ctx.services, &ctx.namespace, &id, io) {
        Ok(exit) => exit,
        Err(err) => {
            // keep the doomed record inspectable
            if let Err(record_err) =
                create::record_create_error(&ctx.services, &ctx.namespace, &id, &err)
            {
                tracing::warn!(id, ?record_err, "failed to record the start error");
            }
            return Err(err.into());
        }
    };

    if let Some(pidfile) = &container.labels.pid_file {
        let pid = ctx.services.tasks.pid(&ctx.namespace, &id)?;
        std::fs::write(pidfile, pid.to_string())
            .with_context(|| format!("failed to write pid file {}", pidfile.display()))?;
    }

    if cmd.detach {
        println!("{id}");
        return Ok(0);
    }

    forward_signals(ctx.services.clone(), ctx.namespace.clone(), id.clone(), opts.tty)?;

    let stdin_fd = libc::STDIN_FILENO;
    let mut _raw_guard = None;
    let detach_rx = if opts.interactive {
        if opts.tty && tty::is_terminal(stdin_fd) {
            _raw_guard = Some(RawModeGuard::new(stdin_fd)?);
            if let Some((cols, rows)) = tty::window_size(stdin_fd) {
                match ctx.services.tasks.resize_pty(&ctx.namespace, &id, cols, rows) {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Some(watch_stdin(&cmd.detach_keys)?)
    } else {
        None
    };

    match task::wait_foreground(&exit, detach_rx.as_ref())? {
        Some(status) => {
            drop(_raw_guard);
            if opts.remove_on_exit {
                remove_container(
                    &ctx.services,
                    &ctx.store,
                    &ctx.names,
                    &ctx.namespace,
                    &id,
                    RemoveOptions {
                        force: false,
                        volumes: true,
                    },
                )?;
            }
            Ok(status.code)
        }
        // detached: the task keeps running
        None => Ok(0),
    }
}

fn foreground_writer<W, F>(detach: bool, make: F) -> Option<Box<dyn Write + Send>>
where
    W: Write + Send + 'static,
    F: FnOnce() -> W,
{
    if detach {
        None
    } else {
        Some(Box::new(make()))
    }
}

/// Watches stdin for the detach sequence on a dedicated thread. The
/// in-process engine has no stdin stream for the task, so input only
/// feeds the scanner.
fn watch_stdin(detach_keys: &str) -> Result<Receiver<()>> {
    let sequence = tty::parse_detach_keys(detach_keys)?;
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut scanner = DetachScanner::new(sequence);
        let mut stdin = std::io::stdin();
        let mut sink = std::io::sink();
        match tty::pump_stdin(&mut stdin, &mut sink, &mut scanner) {
            Ok(true) => {
                let _ = tx.send(());
            }
            // EOF is not a detach; keep the channel open so the waiter
            // stays on the exit path
            _ => std::mem::forget(tx),
        }
    });
    Ok(rx)
}

static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn queue_signal(sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = sig as u8;
        // async-signal-safe; a full pipe just drops the signal
        unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    }
}

/// Forwards caught signals to the foreground task over a self-pipe.
/// SIGWINCH is not forwarded; with a TTY it triggers a PTY resize
/// instead.
fn forward_signals(
    services: Services,
    namespace: String,
    id: String,
    tty: bool,
) -> Result<()> {
    let (read_fd, write_fd) = nix::unistd::pipe()?;
    SIGNAL_PIPE.store(write_fd, Ordering::Relaxed);

    let handler = SigHandler::Handler(queue_signal);
    for sig in Signal::iterator() {
        // synchronous fault signals keep their default disposition
        if matches!(
            sig,
            Signal::SIGSEGV | Signal::SIGILL | Signal::SIGFPE | Signal::SIGBUS | Signal::SIGABRT
        ) {
            continue;
        }
        if !task::forwardable(sig) && !(tty && sig == Signal::SIGWINCH) {
            continue;
        }
        unsafe { signal::signal(sig, handler) }?;
    }

    thread::spawn(move || {
        let mut byte = [0u8; 1];
        loop {
            match nix::unistd::read(read_fd, &mut byte) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let sig = byte[0] as i32;
            if tty && sig == Signal::SIGWINCH as i32 {
                if let Some((cols, rows)) = tty::window_size(libc::STDIN_FILENO) {
                    let _ = services.tasks.resize_pty(&namespace, &id, cols, rows);
                }
                continue;
            }
            // the task may already be gone; nothing to do then
            let _ = services.tasks.kill(&namespace, &id, sig);
        }
    });
    Ok(())
}
