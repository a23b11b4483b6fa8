//! The single-threaded event loop: accept, readiness dispatch, timers, and
//! signal handling, grounded on `main.cpp`'s event loop (`poll`/`epoll` over
//! listening + client fds) and the lifecycle shape of the teacher's
//! `server/src/lib.rs` `Server::new`/`start`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::SIGINT;
use signal_hook_mio::v0_8::Signals;
use socket2::{Domain, Socket, Type};

use crate::cli::ServerConfig;
use crate::conn::{Conn, ConnLimits, IdleList};
use crate::engine::Database;
use crate::errors::StartupError;
use crate::slab::Slab;

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
/// Slab index `i` maps to `Token(i + TOKEN_OFFSET)` so it never collides
/// with the fixed listener/signal tokens above.
const TOKEN_OFFSET: usize = 2;

/// Tolerance applied when comparing a deadline against `now`, so a timer
/// that fires a fraction of a millisecond early still counts as due.
const SLACK_MICROS: u64 = 1_000;

/// Binds a non-blocking listener with `SO_REUSEADDR` and a `SOMAXCONN`
/// backlog, matching §6's external interface, then hands it to `mio`.
fn bind_listener(host: &str, port: u16) -> Result<TcpListener, StartupError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
        .map_err(|source| StartupError::Bind { addr, source })?;
    socket
        .set_reuse_address(true)
        .map_err(|source| StartupError::Bind { addr, source })?;
    socket
        .bind(&addr.into())
        .map_err(|source| StartupError::Bind { addr, source })?;
    socket
        .listen(default_backlog())
        .map_err(|source| StartupError::Bind { addr, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| StartupError::Bind { addr, source })?;
    Ok(TcpListener::from_std(socket.into()))
}

/// `SOMAXCONN` isn't exposed as a portable constant by `socket2`/`mio`; 1024
/// matches the typical Linux default and is what the kernel caps the
/// backlog at on most platforms regardless of the value requested.
fn default_backlog() -> i32 {
    1024
}

fn now_micros(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

/// Runs the server until `SIGINT` or a fatal I/O error. Never returns `Ok`
/// except on clean shutdown.
pub fn run(config: &ServerConfig) -> Result<(), StartupError> {
    run_reporting(config, |_| {})
}

/// Same as [`run`], but calls `on_bound` with the listener's actual local
/// address right after binding. Lets a test that asked for an OS-assigned
/// port (`port: 0`) learn what port was actually chosen, mirroring how the
/// teacher's `Server::new()`/`local_addr()` split works before `.start()`.
pub(crate) fn run_reporting(
    config: &ServerConfig,
    on_bound: impl FnOnce(SocketAddr),
) -> Result<(), StartupError> {
    let start = Instant::now();
    let mut listener = bind_listener(&config.host, config.port)?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
        on_bound(addr);
    }

    let mut poll = Poll::new().map_err(StartupError::Poll)?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
        .map_err(StartupError::Poll)?;

    let mut signals = Signals::new([SIGINT]).map_err(StartupError::Signal)?;
    poll.registry()
        .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)
        .map_err(StartupError::Signal)?;

    let mut events = Events::with_capacity(1024);
    let mut conns: Slab<Conn<TcpStream>> = Slab::new();
    let mut idle_list = IdleList::new();
    let mut db = Database::new();
    let limits = ConnLimits {
        max_message_size: config.max_message_size,
        max_args: config.max_args,
    };
    let idle_timeout_micros = config.idle_timeout_ms * 1_000;

    let mut stop = false;
    while !stop {
        let timeout = compute_timeout(&idle_list, &conns, &db, now_micros(start), idle_timeout_micros);
        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(StartupError::Poll(e));
        }

        for _ in signals.pending() {
            stop = true;
        }
        if stop {
            break;
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept_all(&mut listener, &poll, &mut conns, &mut idle_list, now_micros(start)),
                SIGNAL_TOKEN => {}
                Token(raw) => {
                    let idx = raw - TOKEN_OFFSET;
                    service_connection(idx, event, &mut conns, &mut idle_list, &poll, &mut db, limits, now_micros(start));
                }
            }
        }

        run_timers(&mut conns, &mut idle_list, &poll, &mut db, now_micros(start), idle_timeout_micros);
    }

    tracing::info!(remaining_connections = conns.len(), "shutting down");
    Ok(())
}

fn accept_all(
    listener: &mut TcpListener,
    poll: &Poll,
    conns: &mut Slab<Conn<TcpStream>>,
    idle_list: &mut IdleList,
    now: u64,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "accepted connection");
                let idx = conns.insert(Conn::new(stream, now));
                let token = Token(idx + TOKEN_OFFSET);
                if let Err(e) = poll
                    .registry()
                    .register(conns.get_mut(idx).stream_mut(), token, Interest::READABLE | Interest::WRITABLE)
                {
                    tracing::warn!(error = %e, "failed to register connection");
                    conns.remove(idx);
                    continue;
                }
                idle_list.push_back(conns, idx, now);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn service_connection(
    idx: usize,
    event: &mio::event::Event,
    conns: &mut Slab<Conn<TcpStream>>,
    idle_list: &mut IdleList,
    poll: &Poll,
    db: &mut Database,
    limits: ConnLimits,
    now: u64,
) {
    let before = conns.get(idx).idle_start();
    let mut keep = true;
    if event.is_readable() {
        keep = conns.get_mut(idx).on_readable(db, limits, now);
    }
    if keep && event.is_writable() {
        keep = conns.get_mut(idx).on_writable(db, limits, now);
    }
    let after = conns.get(idx).idle_start();
    if keep {
        if after != before {
            idle_list.touch(conns, idx, after);
        }
    } else {
        close_connection(idx, conns, idle_list, poll);
    }
}

fn close_connection(idx: usize, conns: &mut Slab<Conn<TcpStream>>, idle_list: &mut IdleList, poll: &Poll) {
    idle_list.unlink(conns, idx);
    let _ = poll.registry().deregister(conns.get_mut(idx).stream_mut());
    conns.remove(idx);
}

fn compute_timeout(
    idle_list: &IdleList,
    conns: &Slab<Conn<TcpStream>>,
    db: &Database,
    now: u64,
    idle_timeout_micros: u64,
) -> Duration {
    let idle_wait = match idle_list.head_idle_start(conns) {
        Some(idle_start) => idle_start.saturating_add(idle_timeout_micros).saturating_sub(now),
        None => idle_timeout_micros,
    };
    let wait = match db.next_deadline() {
        Some(deadline) => idle_wait.min(deadline.saturating_sub(now)),
        None => idle_wait,
    };
    Duration::from_micros(wait)
}

fn run_timers(
    conns: &mut Slab<Conn<TcpStream>>,
    idle_list: &mut IdleList,
    poll: &Poll,
    db: &mut Database,
    now: u64,
    idle_timeout_micros: u64,
) {
    loop {
        let Some(head) = idle_list.head() else { break };
        let idle_start = conns.get(head).idle_start();
        let deadline = idle_start.saturating_add(idle_timeout_micros);
        if now.saturating_add(SLACK_MICROS) < deadline {
            break;
        }
        tracing::debug!(idx = head, "closing idle connection");
        close_connection(head, conns, idle_list, poll);
    }

    let evicted = db.sweep_expired(now);
    if evicted > 0 {
        tracing::debug!(count = evicted, "swept expired entries");
    }
}
