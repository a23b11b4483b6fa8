//! Per-connection request/response state machine and the idle-timeout
//! list, grounded on `main.cpp`'s `Conn`/`state_req`/`state_res` and its
//! global idle `DList`.

use std::io::{self, ErrorKind, Read, Write};

use crate::dispatch;
use crate::engine::Database;
use crate::errors::ProtocolError;
use crate::wire::{parse_request, serialize_response, ParseOutcome};

/// Anything the connection state machine can read from and write to. Real
/// connections use `mio::net::TcpStream`; tests use an in-memory double.
pub(crate) trait Transport: Read + Write {}
impl<T: Read + Write> Transport for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Reading,
    Writing,
    Closed,
}

/// Resolved limits a connection enforces while parsing requests.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnLimits {
    pub(crate) max_message_size: usize,
    pub(crate) max_args: usize,
}

/// One client connection: fixed-role read/write buffers plus the state
/// machine driving them.
pub(crate) struct Conn<T: Transport> {
    stream: T,
    state: ConnState,
    rbuf: Vec<u8>,
    wbuf: Vec<u8>,
    write_pos: usize,
    idle_start: u64,
    idle_prev: Option<usize>,
    idle_next: Option<usize>,
}

impl<T: Transport> Conn<T> {
    pub(crate) fn new(stream: T, now_micros: u64) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
            rbuf: Vec::new(),
            wbuf: Vec::new(),
            write_pos: 0,
            idle_start: now_micros,
            idle_prev: None,
            idle_next: None,
        }
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn idle_start(&self) -> u64 {
        self.idle_start
    }

    /// The underlying transport, for registering/deregistering with a
    /// readiness notifier. The connection state machine never needs this
    /// itself — only the event loop that owns the notifier does.
    pub(crate) fn stream_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    /// Drains the socket and processes as many complete requests as are
    /// now buffered. Returns `false` once the connection should be torn
    /// down.
    pub(crate) fn on_readable(
        &mut self,
        db: &mut Database,
        limits: ConnLimits,
        now_micros: u64,
    ) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        let mut tmp = [0u8; 4096];
        loop {
            let remaining = buffer_cap(limits).saturating_sub(self.rbuf.len());
            if remaining == 0 {
                // Read buffer is full; wait for process_buffered to drain a
                // frame out of it before pulling any more off the socket.
                break;
            }
            let want = remaining.min(tmp.len());
            match self.stream.read(&mut tmp[..want]) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    break;
                }
                Ok(n) => {
                    self.rbuf.extend_from_slice(&tmp[..n]);
                    self.idle_start = now_micros;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.state = ConnState::Closed;
                    break;
                }
            }
        }
        if self.state != ConnState::Closed {
            self.process_buffered(db, limits, now_micros);
        }
        self.state != ConnState::Closed
    }

    /// Resumes flushing a pending response and, once drained, resumes
    /// parsing any requests left in the read buffer.
    pub(crate) fn on_writable(
        &mut self,
        db: &mut Database,
        limits: ConnLimits,
        now_micros: u64,
    ) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        self.try_flush(now_micros);
        if self.state == ConnState::Reading {
            self.process_buffered(db, limits, now_micros);
        }
        self.state != ConnState::Closed
    }

    fn process_buffered(&mut self, db: &mut Database, limits: ConnLimits, now_micros: u64) {
        while self.state == ConnState::Reading {
            match parse_request(&self.rbuf, limits.max_message_size, limits.max_args) {
                Ok(ParseOutcome::Incomplete) => break,
                Err(protocol_error) => {
                    tracing::warn!(
                        reason = describe_protocol_error(protocol_error),
                        "closing connection: protocol error"
                    );
                    self.state = ConnState::Closed;
                    break;
                }
                Ok(ParseOutcome::Complete { args, consumed }) => {
                    let response = dispatch::execute(db, &args, now_micros);
                    self.rbuf.drain(0..consumed);
                    let frame = serialize_response(&response);
                    debug_assert!(
                        self.wbuf.len() + frame.len() <= buffer_cap(limits),
                        "response frame exceeds the connection write buffer capacity"
                    );
                    self.wbuf.extend_from_slice(&frame);
                    self.state = ConnState::Writing;
                    self.try_flush(now_micros);
                }
            }
        }
    }

    fn try_flush(&mut self, now_micros: u64) {
        loop {
            if self.write_pos >= self.wbuf.len() {
                self.wbuf.clear();
                self.write_pos = 0;
                self.state = ConnState::Reading;
                self.idle_start = now_micros;
                return;
            }
            match self.stream.write(&self.wbuf[self.write_pos..]) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return;
                }
                Ok(n) => {
                    self.write_pos += n;
                    self.idle_start = now_micros;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.state = ConnState::Closed;
                    return;
                }
            }
        }
    }
}

/// Fixed capacity of a connection's read/write buffers: a 4-byte length
/// prefix plus the configured max message body, mirroring the original's
/// `uint8_t rbuf[4 + k_max_msg]`/`wbuf[4 + k_max_msg]` arrays.
fn buffer_cap(limits: ConnLimits) -> usize {
    4 + limits.max_message_size
}

/// Distinguishes a frame-level parse failure from ordinary EOF/would-block,
/// used only for logging at the call site.
pub(crate) fn describe_protocol_error(err: ProtocolError) -> &'static str {
    match err {
        ProtocolError::FrameTooBig => "frame too big",
        ProtocolError::MalformedArgs => "malformed arguments",
        ProtocolError::TrailingBytes => "trailing bytes",
        ProtocolError::TooManyArgs => "too many arguments",
    }
}

/// Implemented by whatever the idle list threads through — here, `Conn`,
/// addressed by its slot in the server's connection slab.
pub(crate) trait IdleLink {
    fn idle_prev(&self) -> Option<usize>;
    fn set_idle_prev(&mut self, v: Option<usize>);
    fn idle_next(&self) -> Option<usize>;
    fn set_idle_next(&mut self, v: Option<usize>);
    fn touch_idle_start(&mut self, now_micros: u64);
    fn idle_start_value(&self) -> u64;
}

impl<T: Transport> IdleLink for Conn<T> {
    fn idle_prev(&self) -> Option<usize> {
        self.idle_prev
    }
    fn set_idle_prev(&mut self, v: Option<usize>) {
        self.idle_prev = v;
    }
    fn idle_next(&self) -> Option<usize> {
        self.idle_next
    }
    fn set_idle_next(&mut self, v: Option<usize>) {
        self.idle_next = v;
    }
    fn touch_idle_start(&mut self, now_micros: u64) {
        self.idle_start = now_micros;
    }
    fn idle_start_value(&self) -> u64 {
        self.idle_start
    }
}

/// Doubly-linked idle-timeout queue over a caller-owned slab of
/// connections. The head is always the least-recently-active connection.
#[derive(Default)]
pub(crate) struct IdleList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl IdleList {
    pub(crate) fn new() -> Self {
        Self { head: None, tail: None }
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn push_back<N: IdleLink>(
        &mut self,
        slab: &mut crate::slab::Slab<N>,
        idx: usize,
        now_micros: u64,
    ) {
        slab.get_mut(idx).touch_idle_start(now_micros);
        slab.get_mut(idx).set_idle_prev(self.tail);
        slab.get_mut(idx).set_idle_next(None);
        if let Some(tail) = self.tail {
            slab.get_mut(tail).set_idle_next(Some(idx));
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }

    pub(crate) fn unlink<N: IdleLink>(&mut self, slab: &mut crate::slab::Slab<N>, idx: usize) {
        let prev = slab.get(idx).idle_prev();
        let next = slab.get(idx).idle_next();
        match prev {
            Some(p) => slab.get_mut(p).set_idle_next(next),
            None => self.head = next,
        }
        match next {
            Some(n) => slab.get_mut(n).set_idle_prev(prev),
            None => self.tail = prev,
        }
        slab.get_mut(idx).set_idle_prev(None);
        slab.get_mut(idx).set_idle_next(None);
    }

    pub(crate) fn touch<N: IdleLink>(
        &mut self,
        slab: &mut crate::slab::Slab<N>,
        idx: usize,
        now_micros: u64,
    ) {
        self.unlink(slab, idx);
        self.push_back(slab, idx, now_micros);
    }

    pub(crate) fn head_idle_start<N: IdleLink>(&self, slab: &crate::slab::Slab<N>) -> Option<u64> {
        self.head.map(|idx| slab.get(idx).idle_start_value())
    }
}
