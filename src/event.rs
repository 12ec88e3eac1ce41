// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hand-off of bus and endpoint events from interrupt context to the task
//! that runs the core.
//!
//! Drivers call the producer methods from their ISR. Every event takes one
//! record out of a pool shared by all devices; when the pool is empty the
//! event is dropped. The task drains a device's queue through
//! `UsbdContext::process`.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::QtyCfg;
use crate::error::Result;
use crate::proto::UsbSetupPacket;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    Reset,
    Suspend,
    Resume,
    Conn,
    Disconn,
    /// The controller negotiated high speed during reset.
    HighSpeed,
    /// Raw SETUP bytes, copied out of the controller when it raised the
    /// event.
    Setup([u8; UsbSetupPacket::LEN]),
    /// A transfer on `addr` finished, successfully or not.
    Ep { addr: u8, result: Result<()> },
}

struct Ring {
    free: usize,
    queues: Vec<VecDeque<CoreEvent>>,
}

pub struct EventQueue {
    inner: Mutex<RefCell<Ring>>,
}

impl EventQueue {
    /// Creates a queue for `qty.dev_qty` devices sharing a pool of
    /// `qty.event_pool_len()` records. Storage is allocated here so that
    /// posting never allocates.
    pub fn new(qty: &QtyCfg) -> Self {
        let pool = qty.event_pool_len();
        let queues = (0..qty.dev_qty).map(|_| VecDeque::with_capacity(pool)).collect();
        Self {
            inner: Mutex::new(RefCell::new(Ring { free: pool, queues })),
        }
    }

    fn put(&self, dev_nbr: u8, ev: CoreEvent) {
        let queued = critical_section::with(|cs| {
            let mut ring = self.inner.borrow_ref_mut(cs);
            if ring.free == 0 {
                return false;
            }
            match ring.queues.get_mut(usize::from(dev_nbr)) {
                Some(q) => q.push_back(ev),
                None => return false,
            }
            ring.free -= 1;
            true
        });
        if !queued {
            log::warn!("dev {}: dropped {:?}", dev_nbr, ev);
        }
    }

    /// Takes the oldest event of `dev_nbr` and returns its record to the
    /// pool.
    pub(crate) fn get(&self, dev_nbr: u8) -> Option<CoreEvent> {
        critical_section::with(|cs| {
            let mut ring = self.inner.borrow_ref_mut(cs);
            let ev = ring.queues.get_mut(usize::from(dev_nbr))?.pop_front()?;
            ring.free += 1;
            Some(ev)
        })
    }

    /// Events waiting for `dev_nbr`.
    pub fn pending(&self, dev_nbr: u8) -> usize {
        critical_section::with(|cs| {
            let ring = self.inner.borrow_ref(cs);
            ring.queues.get(usize::from(dev_nbr)).map_or(0, |q| q.len())
        })
    }

    pub fn conn(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::Conn);
    }

    pub fn disconn(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::Disconn);
    }

    pub fn high_speed(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::HighSpeed);
    }

    pub fn reset(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::Reset);
    }

    pub fn suspend(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::Suspend);
    }

    pub fn resume(&self, dev_nbr: u8) {
        self.put(dev_nbr, CoreEvent::Resume);
    }

    pub fn setup(&self, dev_nbr: u8, raw: &[u8; UsbSetupPacket::LEN]) {
        self.put(dev_nbr, CoreEvent::Setup(*raw));
    }

    /// Reports the end of a transfer on `ep_addr`. The result reaches the
    /// driver's `xfer_done` from task context.
    pub fn ep(&self, dev_nbr: u8, ep_addr: u8, result: Result<()>) {
        self.put(dev_nbr, CoreEvent::Ep { addr: ep_addr, result });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn qty(dev_qty: u8) -> QtyCfg {
        QtyCfg {
            dev_qty,
            config_qty: 1,
            if_qty: 1,
            if_alt_qty: 1,
            if_grp_qty: 0,
            ep_desc_qty: 1,
            str_qty: 0,
            ep_open_qty: 2,
            urb_extra_qty: 0,
        }
    }

    #[test]
    fn events_come_out_in_order_per_device() {
        let q = EventQueue::new(&qty(2));
        q.reset(0);
        q.conn(1);
        q.setup(0, &[0x80, 6, 0, 1, 0, 0, 18, 0]);
        q.ep(0, 0x81, Err(Error::Aborted));
        assert_eq!(q.pending(0), 3);
        assert_eq!(q.get(0), Some(CoreEvent::Reset));
        assert_eq!(q.get(0), Some(CoreEvent::Setup([0x80, 6, 0, 1, 0, 0, 18, 0])));
        assert_eq!(
            q.get(0),
            Some(CoreEvent::Ep { addr: 0x81, result: Err(Error::Aborted) })
        );
        assert_eq!(q.get(0), None);
        assert_eq!(q.get(1), Some(CoreEvent::Conn));
    }

    #[test]
    fn exhausted_pool_drops_events_until_one_is_taken() {
        let q = EventQueue::new(&qty(1));
        let pool = qty(1).event_pool_len();
        for _ in 0..pool {
            q.suspend(0);
        }
        q.resume(0);
        assert_eq!(q.pending(0), pool);

        assert_eq!(q.get(0), Some(CoreEvent::Suspend));
        q.resume(0);
        assert_eq!(q.pending(0), pool);
        let last = core::iter::from_fn(|| q.get(0)).last();
        assert_eq!(last, Some(CoreEvent::Resume));
    }

    #[test]
    fn unknown_device_is_ignored() {
        let q = EventQueue::new(&qty(1));
        q.reset(3);
        assert_eq!(q.pending(3), 0);
        assert_eq!(q.get(3), None);
    }
}
