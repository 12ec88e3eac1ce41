// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint bookkeeping and control transfers over a `Driver`.
//!
//! `DevIo` is the part of a device that talks to hardware: the driver, which
//! endpoints are open or halted, and the scratch buffer descriptors are
//! assembled in before they go out on EP0. Class drivers see a narrower view
//! of it through `Ctrl` while they handle a request.

use alloc::boxed::Box;

use crate::config::DeviceState;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::proto::{
    ep_addr_to_phy, UsbTransferType, EP_ADDR_CTRL_IN, EP_ADDR_CTRL_OUT, EP_MAX_PKT_SIZE_MASK,
    EP_MAX_PKT_TRANS_MASK, EP_TYPE_MASK,
};

/// Size of the buffer descriptors are staged in. When a descriptor is longer
/// it goes out in chunks of this size.
pub const DESC_BUF_LEN: usize = 64;

/// Open and halted endpoints, one bit per physical endpoint.
#[derive(Copy, Clone, Debug, Default)]
struct EpState {
    open: u32,
    stalled: u32,
    max_pkt: [u16; 2],
}

impl EpState {
    fn bit(ep_addr: u8) -> u32 {
        1 << u32::from(ep_addr_to_phy(ep_addr) & 0x1F)
    }

    fn is_open(&self, ep_addr: u8) -> bool {
        self.open & Self::bit(ep_addr) != 0
    }

    fn is_stalled(&self, ep_addr: u8) -> bool {
        self.stalled & Self::bit(ep_addr) != 0
    }

    fn open_cnt(&self) -> u32 {
        self.open.count_ones()
    }
}

pub(crate) struct DevIo {
    pub(crate) drv: Box<dyn Driver>,
    eps: EpState,
    ep_open_qty: u8,
    pub(crate) buf: [u8; DESC_BUF_LEN],
}

impl DevIo {
    pub(crate) fn new(drv: Box<dyn Driver>, ep_open_qty: u8) -> Self {
        Self {
            drv,
            eps: EpState::default(),
            ep_open_qty,
            buf: [0; DESC_BUF_LEN],
        }
    }

    pub(crate) fn ep_is_open(&self, ep_addr: u8) -> bool {
        self.eps.is_open(ep_addr)
    }

    /// Opens an endpoint in the driver. `max_pkt_size` is the descriptor
    /// value, transaction bits included.
    pub(crate) fn ep_open(&mut self, ep_addr: u8, attrib: u8, max_pkt_size: u16) -> Result<()> {
        if self.eps.is_open(ep_addr) {
            return Err(Error::EpInvalid);
        }
        if self.eps.open_cnt() >= u32::from(self.ep_open_qty) {
            return Err(Error::EpNoneAvail);
        }
        let transactions = ((max_pkt_size & EP_MAX_PKT_TRANS_MASK) >> 11) as u8 + 1;
        self.drv.ep_open(
            ep_addr,
            attrib & EP_TYPE_MASK,
            max_pkt_size & EP_MAX_PKT_SIZE_MASK,
            transactions,
        )?;
        let bit = EpState::bit(ep_addr);
        self.eps.open |= bit;
        self.eps.stalled &= !bit;
        if ep_addr & 0x0F == 0 {
            self.eps.max_pkt[usize::from(ep_addr >> 7)] = max_pkt_size & EP_MAX_PKT_SIZE_MASK;
        }
        log::trace!("ep {:#04x} open, max pkt {}", ep_addr, max_pkt_size);
        Ok(())
    }

    /// Aborts and closes an endpoint. Closing one that isn't open does
    /// nothing.
    pub(crate) fn ep_close(&mut self, ep_addr: u8) {
        if !self.eps.is_open(ep_addr) {
            return;
        }
        self.drv.ep_abort(ep_addr);
        self.drv.ep_close(ep_addr);
        let bit = EpState::bit(ep_addr);
        self.eps.open &= !bit;
        self.eps.stalled &= !bit;
        log::trace!("ep {:#04x} closed", ep_addr);
    }

    /// Sets or clears the halt condition on an open endpoint.
    pub(crate) fn ep_stall(&mut self, ep_addr: u8, set: bool) -> Result<()> {
        if !self.eps.is_open(ep_addr) {
            return Err(Error::InvalidEpState);
        }
        let bit = EpState::bit(ep_addr);
        if set {
            if self.eps.is_stalled(ep_addr) {
                return Ok(());
            }
            self.drv.ep_abort(ep_addr);
            if !self.drv.ep_stall(ep_addr, true) {
                return Err(Error::Xfer);
            }
            self.eps.stalled |= bit;
        } else {
            // Clearing is passed on even when no halt is recorded, so the
            // data toggle gets reset.
            if !self.drv.ep_stall(ep_addr, false) {
                return Err(Error::Xfer);
            }
            self.eps.stalled &= !bit;
        }
        Ok(())
    }

    pub(crate) fn ep_is_stalled(&self, ep_addr: u8) -> Result<bool> {
        if !self.eps.is_open(ep_addr) {
            return Err(Error::EpInvalid);
        }
        Ok(self.eps.is_stalled(ep_addr))
    }

    pub(crate) fn ctrl_open(&mut self, max_pkt_size: u16) -> Result<()> {
        let attrib = UsbTransferType::Control as u8;
        self.ep_open(EP_ADDR_CTRL_IN, attrib, max_pkt_size)?;
        if let Err(e) = self.ep_open(EP_ADDR_CTRL_OUT, attrib, max_pkt_size) {
            self.ep_close(EP_ADDR_CTRL_IN);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn ctrl_close(&mut self) {
        self.ep_close(EP_ADDR_CTRL_IN);
        self.ep_close(EP_ADDR_CTRL_OUT);
    }

    /// Protocol stall on both halves of EP0. The hardware drops it on the
    /// next SETUP, so it isn't recorded as a halt.
    pub(crate) fn ctrl_stall(&mut self) {
        self.drv.ep_stall(EP_ADDR_CTRL_OUT, true);
        self.drv.ep_stall(EP_ADDR_CTRL_IN, true);
    }

    fn ctrl_check(&self, state: DeviceState, ep_addr: u8) -> Result<()> {
        if !state.is_enumerating() {
            return Err(Error::InvalidDevState);
        }
        if !self.eps.is_open(ep_addr) {
            return Err(Error::InvalidEpState);
        }
        Ok(())
    }

    /// Data stage IN. With `end` set, a transfer that is a whole number of
    /// packets is followed by a zero-length packet so the host sees it end.
    pub(crate) fn ctrl_tx(
        &mut self,
        state: DeviceState,
        buf: &[u8],
        end: bool,
        timeout_ms: u32,
    ) -> Result<usize> {
        self.ctrl_check(state, EP_ADDR_CTRL_IN)?;
        if buf.is_empty() {
            return Err(Error::InvalidArg);
        }
        let n = self.drv.ep_tx(EP_ADDR_CTRL_IN, buf, timeout_ms)?;
        let max_pkt = usize::from(self.eps.max_pkt[1]);
        if end && max_pkt != 0 && buf.len() % max_pkt == 0 {
            self.drv.ep_tx_zlp(EP_ADDR_CTRL_IN, timeout_ms)?;
        }
        Ok(n)
    }

    /// Staged version of `ctrl_tx` for the first `len` bytes of `self.buf`.
    pub(crate) fn ctrl_tx_buf(
        &mut self,
        state: DeviceState,
        len: usize,
        end: bool,
        timeout_ms: u32,
    ) -> Result<usize> {
        self.ctrl_check(state, EP_ADDR_CTRL_IN)?;
        if len == 0 {
            return Err(Error::InvalidArg);
        }
        let len = len.min(DESC_BUF_LEN);
        let n = self.drv.ep_tx(EP_ADDR_CTRL_IN, &self.buf[..len], timeout_ms)?;
        let max_pkt = usize::from(self.eps.max_pkt[1]);
        if end && max_pkt != 0 && len % max_pkt == 0 {
            self.drv.ep_tx_zlp(EP_ADDR_CTRL_IN, timeout_ms)?;
        }
        Ok(n)
    }

    pub(crate) fn ctrl_rx(&mut self, state: DeviceState, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        self.ctrl_check(state, EP_ADDR_CTRL_OUT)?;
        if buf.is_empty() {
            return Err(Error::InvalidArg);
        }
        self.drv.ep_rx(EP_ADDR_CTRL_OUT, buf, timeout_ms)
    }

    /// Status stage of a control read: the host sends a zero-length OUT.
    pub(crate) fn ctrl_rx_status(&mut self, state: DeviceState, timeout_ms: u32) -> Result<()> {
        self.ctrl_check(state, EP_ADDR_CTRL_OUT)?;
        self.drv.ep_rx_zlp(EP_ADDR_CTRL_OUT, timeout_ms)
    }

    /// Status stage of a control write or no-data request.
    pub(crate) fn ctrl_tx_status(&mut self, state: DeviceState, timeout_ms: u32) -> Result<()> {
        self.ctrl_check(state, EP_ADDR_CTRL_IN)?;
        self.drv.ep_tx_zlp(EP_ADDR_CTRL_IN, timeout_ms)
    }
}

/// EP0 as seen by a class or vendor request handler.
///
/// The core runs the status stage after the handler returns, so handlers
/// only move data.
pub struct Ctrl<'a> {
    io: &'a mut DevIo,
    state: DeviceState,
    timeout_ms: u32,
}

impl<'a> Ctrl<'a> {
    pub(crate) fn new(io: &'a mut DevIo, state: DeviceState, timeout_ms: u32) -> Self {
        Self { io, state, timeout_ms }
    }

    /// Sends the data stage of a device-to-host request. Pass `end` when
    /// `buf` is all there is to send.
    pub fn tx(&mut self, buf: &[u8], end: bool) -> Result<usize> {
        self.io.ctrl_tx(self.state, buf, end, self.timeout_ms)
    }

    /// Receives the data stage of a host-to-device request.
    pub fn rx(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.io.ctrl_rx(self.state, buf, self.timeout_ms)
    }

    /// Halts or un-halts one of the interface's endpoints.
    pub fn ep_stall(&mut self, ep_addr: u8, set: bool) -> Result<()> {
        self.io.ep_stall(ep_addr, set)
    }

    pub fn ep_is_stalled(&self, ep_addr: u8) -> Result<bool> {
        self.io.ep_is_stalled(ep_addr)
    }
}
