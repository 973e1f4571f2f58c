//! Reference host process for faultgate.
//!
//! Plays the collaborators around the signal subsystem: the startup
//! sequence, the main thread parked on the shutdown gate, and optional
//! handlers installed before setup. Every line it prints goes through the
//! same unbuffered fault sink as the handlers, so output order on stderr is
//! the order things happened in.

use std::fmt;
use std::io;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use clap::Parser;
use clap::ValueEnum;
use faultgate::install_all;
use faultgate::telemetry::init_tracing;
use faultgate::telemetry::TelemetryConfig;
use faultgate::FaultConfig;
use faultgate::FaultError;
use faultgate::ReplicationFlags;
use faultgate::SignalClass;
use faultgate::SignalContext;
use faultgate::SignalKind;
use faultgate::TracingSink;
use thiserror::Error;
use tracing::Level;

const HOST: &str = "host";
const RAISE_DELAY: Duration = Duration::from_millis(20);
const SECOND_RELEASE_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SignalArg {
    Int,
    Term,
    Segv,
    Abrt,
    Fpe,
    Bus,
    Hup,
}

impl From<SignalArg> for SignalKind {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::Int => SignalKind::Interrupt,
            SignalArg::Term => SignalKind::Terminate,
            SignalArg::Segv => SignalKind::SegmentationFault,
            SignalArg::Abrt => SignalKind::Abort,
            SignalArg::Fpe => SignalKind::FloatingPoint,
            SignalArg::Bus => SignalKind::BusError,
            SignalArg::Hup => SignalKind::Hangup,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "faultgate-host", version, about = "Host process exercising faultgate")]
struct Cli {
    /// Leave startup incomplete, as if the signal arrived during initialization
    #[arg(long)]
    early: bool,

    /// Install handlers of our own before faultgate, to observe chaining
    #[arg(long)]
    host_handler: bool,

    /// Signal to deliver once setup is done
    #[arg(long, value_enum)]
    raise: Option<SignalArg>,

    /// How many times to deliver the signal
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Deliver non-graceful signals on a worker thread instead of main
    #[arg(long)]
    from_thread: bool,

    /// Write to a socket whose peer has closed, with SIGPIPE at its default before setup
    #[arg(long)]
    probe_pipe: bool,

    /// Send fault records through the tracing subscriber instead of the fd sink
    #[arg(long)]
    tracing_sink: bool,
}

#[derive(Debug, Error)]
enum HostError {
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error("Failed to spawn raiser thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Waiting on the shutdown gate failed: {0}")]
    Gate(#[source] io::Error),
}

fn main() {
    let _telemetry = init_tracing(&TelemetryConfig::from_env());

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        if let HostError::Fault(fault) = &e {
            eprintln!("Suggestion: {}", fault.suggestion());
            if fault.is_retryable() {
                eprintln!("(This error may be transient - retry may succeed)");
            }
        }
        std::process::exit(74); // EX_IOERR
    }
}

fn run(cli: Cli) -> Result<(), HostError> {
    if cli.host_handler {
        host::install_handlers();
    }
    if cli.probe_pipe {
        host::restore_default_sigpipe();
    }

    let replication = ReplicationFlags::new();
    let mut builder = SignalContext::builder()
        .with_config(FaultConfig::from_env())
        .with_replication(replication.clone());
    if cli.tracing_sink {
        builder = builder.with_sink(TracingSink);
    }
    let context = builder.build()?;
    let ctx = install_all(context)?;

    if cli.probe_pipe {
        probe_broken_pipe(ctx);
    }

    if !cli.early {
        ctx.mark_startup_complete();
        note(ctx, format_args!("startup complete"));
    }

    let Some(signal) = cli.raise else {
        return Ok(());
    };
    let kind = SignalKind::from(signal);

    if kind.class() == SignalClass::Graceful {
        return park_until_shutdown(ctx, &replication, kind, cli.repeat);
    }

    if cli.from_thread {
        deliver_on_worker(ctx, kind, cli.repeat)?;
    } else {
        for _ in 0..cli.repeat {
            deliver(ctx, kind);
        }
    }
    note(ctx, format_args!("main: still running after {}", kind));
    Ok(())
}

/// Raises `kind` on a freshly spawned thread, so the handler runs on that
/// thread's stack rather than main's.
fn deliver_on_worker(
    ctx: &'static SignalContext,
    kind: SignalKind,
    repeat: usize,
) -> Result<(), HostError> {
    let worker = thread::Builder::new()
        .name("worker".to_string())
        .spawn(move || {
            note(ctx, format_args!("worker: raising {}", kind));
            for _ in 0..repeat {
                deliver(ctx, kind);
            }
        })
        .map_err(HostError::Spawn)?;
    let _ = worker.join();
    Ok(())
}

/// The main thread's side of a graceful shutdown: park on the gate while
/// another thread delivers the signal, then tear down.
fn park_until_shutdown(
    ctx: &'static SignalContext,
    replication: &ReplicationFlags,
    kind: SignalKind,
    repeat: usize,
) -> Result<(), HostError> {
    let raiser = thread::Builder::new()
        .name("raiser".to_string())
        .spawn(move || {
            for _ in 0..repeat {
                thread::sleep(RAISE_DELAY);
                deliver(ctx, kind);
            }
        })
        .map_err(HostError::Spawn)?;

    ctx.gate().wait().map_err(HostError::Gate)?;
    note(ctx, format_args!("main: shutdown gate released"));

    let _ = raiser.join();
    if ctx
        .gate()
        .wait_timeout(SECOND_RELEASE_WINDOW)
        .map_err(HostError::Gate)?
    {
        note(ctx, format_args!("main: shutdown gate released twice"));
    }

    note(
        ctx,
        format_args!(
            "main: replication stopped={} stop_requests={}",
            replication.is_stopped(),
            replication.stop_requests()
        ),
    );
    note(ctx, format_args!("main: teardown complete"));
    ctx.gate().finish();
    Ok(())
}

fn deliver(ctx: &SignalContext, kind: SignalKind) {
    if kind == SignalKind::Abort {
        // abort(3) restores the default action and re-raises if the handler returns.
        unsafe { libc::abort() };
    }
    if let Err(e) = signal_hook::low_level::raise(kind.raw()) {
        note(ctx, format_args!("failed to raise {}: {}", kind, e));
    }
}

fn probe_broken_pipe(ctx: &SignalContext) {
    let (mut writer, reader) = match UnixStream::pair() {
        Ok(pair) => pair,
        Err(e) => {
            note(ctx, format_args!("pipe: socket pair unavailable: {}", e));
            return;
        }
    };
    drop(reader);

    match writer.write(b"probe") {
        Ok(written) => note(ctx, format_args!("pipe: unexpected write of {} bytes", written)),
        Err(e) => note(ctx, format_args!("pipe: write failed: {:?}", e.kind())),
    }
}

fn note(ctx: &SignalContext, message: fmt::Arguments<'_>) {
    ctx.sink().log(Level::INFO, HOST, message);
}

mod host {
    use faultgate::SignalKind;
use faultgate::TracingSink;
    use libc::c_int;
    use libc::c_void;

    const PREFIX: &[u8] = b"host: previous ";
    const SUFFIX: &[u8] = b" handler invoked\n";

    extern "C" fn previous_handler(signo: c_int) {
        let name = SignalKind::from_raw(signo).map_or("unknown", SignalKind::name);
        for part in [PREFIX, name.as_bytes(), SUFFIX] {
            // SAFETY: write(2) to stderr from a live slice.
            unsafe {
                libc::write(
                    libc::STDERR_FILENO,
                    part.as_ptr() as *const c_void,
                    part.len(),
                );
            }
        }
    }

    pub fn install_handlers() {
        for kind in SignalKind::HANDLED {
            // SAFETY: installs a plain handler that only calls write(2).
            unsafe {
                libc::signal(
                    kind.raw(),
                    previous_handler as *const () as libc::sighandler_t,
                );
            }
        }
    }

    pub fn restore_default_sigpipe() {
        // SAFETY: resetting a disposition to its default.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
}
