/// The set of events a registration wants to be notified about.
///
/// `mio::Interest` only models readable/writable; priority, error, and
/// hangup are always reported by the OS regardless of what was
/// requested, so they are carried here purely for the caller's
/// bookkeeping (e.g. to decide whether to keep write-interest armed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const fn read() -> Self {
        Interest {
            read: true,
            write: false,
        }
    }

    pub const fn write() -> Self {
        Interest {
            read: false,
            write: true,
        }
    }

    pub const fn read_write() -> Self {
        Interest {
            read: true,
            write: true,
        }
    }

    pub(crate) fn to_mio(self) -> mio::Interest {
        match (self.read, self.write) {
            (true, true) => mio::Interest::READABLE.add(mio::Interest::WRITABLE),
            (true, false) => mio::Interest::READABLE,
            (false, true) => mio::Interest::WRITABLE,
            (false, false) => mio::Interest::READABLE,
        }
    }
}

/// The event set that actually fired, handed to a callback on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub priority: bool,
    pub error: bool,
    pub hup: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(ev: &mio::event::Event) -> Self {
        Readiness {
            readable: ev.is_readable(),
            writable: ev.is_writable(),
            priority: ev.is_priority(),
            error: ev.is_error(),
            hup: ev.is_read_closed() || ev.is_write_closed(),
        }
    }
}
