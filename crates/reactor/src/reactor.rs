use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};

use crate::error::ReactorError;
use crate::interest::{Interest, Readiness};

/// A `Callback` receives the event set that fired for its fd. It must
/// not block; re-queue long work via [`Reactor::add_action`].
pub type Callback = Box<dyn FnMut(Readiness) + 'static>;

/// A deferred closure queued from within a callback, run before the
/// next readiness wait. This is the recommended idiom for a callback
/// that needs to register/unregister/modify fds, since doing so
/// directly while iterating the just-fired event batch would mutate
/// the reactor out from under itself.
pub type Action = Box<dyn FnOnce(&mut Reactor) + 'static>;

/// Process-wide "keep running" flag shared between the reactor's outer
/// loop and whatever else (signal handler, manager thread) needs to
/// request shutdown.
#[derive(Debug, Default)]
pub struct RunFlag(AtomicBool);

impl RunFlag {
    pub fn new(running: bool) -> Self {
        RunFlag(AtomicBool::new(running))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Registration {
    fd: RawFd,
    interest: Interest,
    callback: Callback,
}

/// The readiness reactor itself (component A, §4.1).
pub struct Reactor {
    poll: Poll,
    events: Events,
    registrations: HashMap<Token, Registration>,
    actions: Vec<Action>,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            registrations: HashMap::new(),
            actions: Vec::new(),
        })
    }

    /// A readable fd that becomes ready whenever any fd registered with
    /// this reactor has work. `mio::Poll` is itself backed by an epoll
    /// (or kqueue) fd, so a parent reactor can register this fd as one
    /// of its own interests to compose reactors without flattening them
    /// into one (§4.1, §9 "Reactor composition").
    pub fn poll_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }

    pub fn register(
        &mut self,
        fd: RawFd,
        interest: Interest,
        callback: impl FnMut(Readiness) + 'static,
    ) -> Result<(), ReactorError> {
        let token = Token(fd as usize);
        if self.registrations.contains_key(&token) {
            tracing::warn!(fd, "attempted to register an fd that is already registered");
            return Err(ReactorError::AlreadyRegistered(fd));
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest.to_mio())?;
        self.registrations.insert(
            token,
            Registration {
                fd,
                interest,
                callback: Box::new(callback),
            },
        );
        Ok(())
    }

    pub fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<(), ReactorError> {
        let token = Token(fd as usize);
        let reg = self
            .registrations
            .get_mut(&token)
            .ok_or(ReactorError::NotRegistered(fd))?;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), token, interest.to_mio())?;
        reg.interest = interest;
        Ok(())
    }

    pub fn unregister(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        let token = Token(fd as usize);
        let mut reg = self
            .registrations
            .remove(&token)
            .ok_or(ReactorError::NotRegistered(fd))?;
        self.poll.registry().deregister(&mut SourceFd(&reg.fd))?;
        Ok(())
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registrations.contains_key(&Token(fd as usize))
    }

    /// Queues a closure to run before the next readiness wait. Ordering
    /// guarantee: actions queued during dispatch of a wait run before
    /// the next wait (§4.1).
    pub fn add_action(&mut self, action: impl FnOnce(&mut Reactor) + 'static) {
        self.actions.push(Box::new(action));
    }

    /// One readiness wait (bounded by `timeout`, `None` blocks
    /// indefinitely), dispatch in arrival order, then drain the action
    /// queue.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<(), ReactorError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // An interrupted blocking wait (e.g. a process signal) is
            // treated as a zero-event wake-up, per §5.
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                tracing::trace!("readiness wait interrupted, treating as zero-event wake-up");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let fired: Vec<(Token, Readiness)> = self
            .events
            .iter()
            .map(|ev| (ev.token(), Readiness::from(ev)))
            .collect();

        for (token, readiness) in fired {
            if let Some(reg) = self.registrations.get_mut(&token) {
                (reg.callback)(readiness);
            }
        }

        self.drain_actions();
        Ok(())
    }

    fn drain_actions(&mut self) {
        while !self.actions.is_empty() {
            let batch = std::mem::take(&mut self.actions);
            for action in batch {
                action(self);
            }
        }
    }

    /// Loops [`Self::run_once`] until `flag` clears. Uses a bounded
    /// poll timeout rather than an infinite one so the flag is
    /// re-evaluated even when nothing is registered or nothing is
    /// ready (e.g. during `S1 Idle`, §4.7).
    pub fn run(&mut self, flag: &RunFlag) -> Result<(), ReactorError> {
        const POLL_TIMEOUT: Duration = Duration::from_millis(200);
        while flag.is_running() {
            self.run_once(Some(POLL_TIMEOUT))?;
        }
        Ok(())
    }

    /// Current interest set for a registered fd, if any. Used by
    /// callbacks that need to add/remove write-interest as their
    /// outbound queue fills/drains (§4.1).
    pub fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        self.registrations.get(&Token(fd as usize)).map(|r| r.interest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;
    use std::sync::{Arc, Mutex};

    #[test]
    fn registering_same_fd_twice_fails() {
        let mut reactor = Reactor::new().unwrap();
        let (a, _b) = UnixDatagram::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let fd = a.as_raw_fd();
        reactor.register(fd, Interest::read(), |_| {}).unwrap();
        let err = reactor.register(fd, Interest::read(), |_| {}).unwrap_err();
        assert!(matches!(err, ReactorError::AlreadyRegistered(_)));
        std::mem::forget(a); // token lifetime is scoped to this test
    }

    #[test]
    fn unregistering_unknown_fd_fails() {
        let mut reactor = Reactor::new().unwrap();
        let err = reactor.unregister(9999).unwrap_err();
        assert!(matches!(err, ReactorError::NotRegistered(9999)));
    }

    #[test]
    fn dispatches_readable_event_and_drains_actions() {
        let mut reactor = Reactor::new().unwrap();
        let (a, b) = UnixDatagram::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.send(b"hi").unwrap();

        let fired = Arc::new(Mutex::new(false));
        let fired2 = Arc::clone(&fired);
        let action_ran = Arc::new(Mutex::new(false));
        let action_ran2 = Arc::clone(&action_ran);

        reactor
            .register(a.as_raw_fd(), Interest::read(), move |r| {
                if r.readable {
                    *fired2.lock().unwrap() = true;
                }
            })
            .unwrap();

        reactor.add_action(move |_reactor| {
            *action_ran2.lock().unwrap() = true;
        });

        reactor.run_once(Some(Duration::from_millis(100))).unwrap();

        assert!(*fired.lock().unwrap());
        assert!(*action_ran.lock().unwrap());
    }

    #[test]
    fn poll_fd_is_a_valid_raw_fd() {
        let reactor = Reactor::new().unwrap();
        assert!(reactor.poll_fd() >= 0);
    }
}
