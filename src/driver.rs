// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The contract between the core and a device controller driver.
//!
//! The core never touches hardware. It asks the driver to open, stall, and
//! move data through endpoints, and the driver reports bus activity back by
//! pushing events into an `EventQueue` from its interrupt handler.

use bitflags::bitflags;

use crate::error::Result;

bitflags! {
    /// What a physical endpoint can be used for. An endpoint slot is a
    /// candidate for a request if its flags contain every flag asked for.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EpCaps: u8 {
        const CTRL = 1;
        const ISOC = 1 << 1;
        const BULK = 1 << 2;
        const INTR = 1 << 3;
        const DIR_OUT = 1 << 4;
        const DIR_IN = 1 << 5;
    }
}

/// One entry of the driver's physical endpoint table.
#[derive(Copy, Clone, Debug)]
pub struct EpCapability {
    pub caps: EpCaps,
    /// Endpoint number this slot answers to on the bus.
    pub nbr: u8,
    /// Largest packet the hardware can buffer for this slot.
    pub max_pkt_size: u16,
}

impl EpCapability {
    pub const fn new(caps: EpCaps, nbr: u8, max_pkt_size: u16) -> Self {
        Self { caps, nbr, max_pkt_size }
    }
}

/// A device controller driver.
///
/// Transfer calls block the caller until the transfer completes, fails, or
/// `timeout_ms` runs out. They're only ever made from the core task or from
/// class drivers running on it.
pub trait Driver {
    /// Physical endpoints, in allocation order. The allocator stops at the
    /// first entry with empty capabilities, and looks at no more than 32.
    fn ep_table(&self) -> &[EpCapability];

    /// Whether the controller can run at high speed.
    fn high_speed(&self) -> bool {
        false
    }

    fn init(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Called when SET_ADDRESS arrives, before its status stage. Returning
    /// `false` stalls the request.
    fn addr_set(&mut self, _addr: u8) -> bool {
        true
    }

    /// Called once the status stage of SET_ADDRESS is done, which is when the
    /// controller should start answering to `addr`.
    fn addr_en(&mut self, _addr: u8) {}

    /// SET_CONFIGURATION with a nonzero value. Returning `false` stalls.
    fn cfg_set(&mut self, _cfg_val: u8) -> bool {
        true
    }

    fn cfg_clr(&mut self, _cfg_val: u8) {}

    /// Current (micro)frame number, if the hardware exposes it.
    fn frame_nbr_get(&self) -> Option<u16> {
        None
    }

    /// Opens an endpoint. `ep_type` is the transfer type bits of the
    /// attributes, `max_pkt_size` has the transaction bits masked off, and
    /// `transactions` is the number of transactions per (micro)frame, 1 to 3.
    fn ep_open(&mut self, ep_addr: u8, ep_type: u8, max_pkt_size: u16, transactions: u8) -> Result<()>;
    fn ep_close(&mut self, ep_addr: u8);

    /// Cancels whatever transfer is in progress on `ep_addr`.
    fn ep_abort(&mut self, ep_addr: u8) -> bool;

    /// Sends `buf` on an IN endpoint and returns the count sent.
    fn ep_tx(&mut self, ep_addr: u8, buf: &[u8], timeout_ms: u32) -> Result<usize>;
    fn ep_tx_zlp(&mut self, ep_addr: u8, timeout_ms: u32) -> Result<()>;

    /// Receives into `buf` from an OUT endpoint and returns the count
    /// received.
    fn ep_rx(&mut self, ep_addr: u8, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;
    fn ep_rx_zlp(&mut self, ep_addr: u8, timeout_ms: u32) -> Result<()>;

    /// Sets or clears the STALL handshake. Returns `false` if the hardware
    /// refused.
    fn ep_stall(&mut self, ep_addr: u8, state: bool) -> bool;

    /// An endpoint completion event reached the core task. Drivers that
    /// finish transfers asynchronously pick the result up here.
    fn xfer_done(&mut self, _ep_addr: u8, _result: Result<()>) {}
}

/// Application hooks for bus activity, called from the core task after the
/// core has applied the state change.
pub trait BusEvents {
    fn reset(&self, _dev_nbr: u8) {}
    fn suspend(&self, _dev_nbr: u8) {}
    fn resume(&self, _dev_nbr: u8) {}
    fn conn(&self, _dev_nbr: u8) {}
    fn disconn(&self, _dev_nbr: u8) {}
    fn cfg_set(&self, _dev_nbr: u8, _cfg_val: u8) {}
    fn cfg_clr(&self, _dev_nbr: u8, _cfg_val: u8) {}
}
