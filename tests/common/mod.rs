//! Shared test plumbing: an in-memory datagram network with loss-free,
//! in-order local delivery, addressed by small integers.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use citadel_lobby::NonBlockingSocket;

pub type Addr = u8;

/// Routes transport logs into the test harness's captured output. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub const SERVER_ADDR: Addr = 1;
pub const CLIENT_ADDR: Addr = 2;
pub const GAME_ADDR: Addr = 3;

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<Addr, VecDeque<(Addr, Vec<u8>)>>,
}

/// The shared medium every [`LoopSocket`] plugs into.
#[derive(Debug, Clone, Default)]
pub struct LoopNetwork {
    inner: Rc<RefCell<Inner>>,
}

impl LoopNetwork {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Opens a socket bound to `addr`.
    pub fn open(&self, addr: Addr) -> LoopSocket {
        LoopSocket {
            inner: Rc::clone(&self.inner),
            addr,
        }
    }
}

/// One endpoint on the loop network. Datagrams sent to an address nobody
/// has opened are silently dropped, like real UDP.
#[derive(Debug)]
pub struct LoopSocket {
    inner: Rc<RefCell<Inner>>,
    addr: Addr,
}

impl NonBlockingSocket<Addr> for LoopSocket {
    fn send_to(&mut self, buf: &[u8], addr: &Addr) {
        self.inner
            .borrow_mut()
            .queues
            .entry(*addr)
            .or_default()
            .push_back((self.addr, buf.to_vec()));
    }

    fn receive_all(&mut self) -> Vec<(Addr, Vec<u8>)> {
        self.inner
            .borrow_mut()
            .queues
            .entry(self.addr)
            .or_default()
            .drain(..)
            .collect()
    }
}
