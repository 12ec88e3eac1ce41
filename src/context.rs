// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device core context: device lifecycle, queries, and the task that
//! applies queued events.
//!
//! Everything here runs in task context. Interrupt handlers only ever touch
//! the `EventQueue`.

use alloc::vec::Vec;

use crate::config::{DeviceState, QtyCfg, Speed, MS_OS_EN, STD_REQ_TIMEOUT_DFLT_MS, STR_EN};
use crate::desc::{self, DescWriter};
use crate::error::{Error, Result};
use crate::event::{CoreEvent, EventQueue};
use crate::proto::UsbSetupPacket;
use crate::stdreq;
use crate::tables::{Device, Tables};

/// Owns every device and the pools their topology lives in.
pub struct UsbdContext {
    pub(crate) qty: QtyCfg,
    pub(crate) std_req_timeout_ms: u32,
    pub(crate) devs: Vec<Device>,
    pub(crate) t: Tables,
}

/// Looks up a device by number. Takes the device list rather than the
/// context so the pools stay borrowable alongside it.
pub(crate) fn dev_get(devs: &mut [Device], dev_nbr: u8) -> Result<&mut Device> {
    devs.get_mut(usize::from(dev_nbr)).ok_or(Error::NotFound)
}

impl UsbdContext {
    /// Validates `qty` and sizes every table from it.
    pub fn new(qty: QtyCfg) -> Result<Self> {
        qty.validate()?;
        Ok(Self {
            qty,
            std_req_timeout_ms: STD_REQ_TIMEOUT_DFLT_MS,
            devs: Vec::with_capacity(usize::from(qty.dev_qty)),
            t: Tables::new(&qty),
        })
    }

    /// How long a standard request's data or status stage may take.
    pub fn std_req_timeout_set(&mut self, timeout_ms: u32) {
        self.std_req_timeout_ms = timeout_ms;
    }

    fn dev(&self, dev_nbr: u8) -> Result<&Device> {
        self.devs.get(usize::from(dev_nbr)).ok_or(Error::NotFound)
    }

    /// Initializes the driver on first use, then starts it. The device
    /// appears on the bus once the driver reports a connection.
    pub fn dev_start(&mut self, dev_nbr: u8) -> Result<()> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        let init = match dev.info.state {
            DeviceState::None => true,
            DeviceState::Init => false,
            _ => return Err(Error::InvalidDevState),
        };
        if init {
            dev.io.drv.init()?;
        }
        dev.io.drv.start()?;
        if init {
            dev.info.state = DeviceState::Init;
        }
        log::debug!("dev {}: started", dev_nbr);
        Ok(())
    }

    pub fn dev_stop(&mut self, dev_nbr: u8) -> Result<()> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        if dev.info.state == DeviceState::None {
            return Err(Error::InvalidDevState);
        }
        stdreq::config_close(dev, &mut self.t);
        dev.io.drv.stop()?;
        dev.info.state = DeviceState::Init;
        dev.info.state_prev = DeviceState::Init;
        dev.info.conn = false;
        log::debug!("dev {}: stopped", dev_nbr);
        Ok(())
    }

    pub fn dev_state_get(&self, dev_nbr: u8) -> Result<DeviceState> {
        Ok(self.dev(dev_nbr)?.info.state)
    }

    /// Bus speed. Meaningless until the driver is initialized.
    pub fn dev_spd_get(&self, dev_nbr: u8) -> Result<Speed> {
        let dev = self.dev(dev_nbr)?;
        if dev.info.state == DeviceState::None {
            return Err(Error::InvalidDevState);
        }
        Ok(dev.info.spd)
    }

    /// Whether the device currently runs from its own supply, as reported
    /// by GET_STATUS.
    pub fn dev_self_pwr_set(&mut self, dev_nbr: u8, self_pwr: bool) -> Result<()> {
        dev_get(&mut self.devs, dev_nbr)?.info.self_pwr = self_pwr;
        Ok(())
    }

    /// Enables the Microsoft OS descriptors, answered to vendor requests
    /// carrying `vendor_code`.
    pub fn dev_set_ms_vendor_code(&mut self, dev_nbr: u8, vendor_code: u8) -> Result<()> {
        if !MS_OS_EN {
            return Err(Error::NotSupported);
        }
        dev_get(&mut self.devs, dev_nbr)?.info.ms_vendor_code = Some(vendor_code);
        Ok(())
    }

    /// Last (micro)frame number seen by the controller.
    pub fn dev_frame_nbr_get(&self, dev_nbr: u8) -> Result<u16> {
        self.dev(dev_nbr)?.io.drv.frame_nbr_get().ok_or(Error::NotSupported)
    }

    /// One past the highest physical endpoint any configuration uses.
    pub fn ep_max_phy_nbr_get(&self, dev_nbr: u8) -> Result<u8> {
        Ok(self.dev(dev_nbr)?.info.ep_max_phy_nbr)
    }

    /// Registers a string for a class-specific descriptor. Its index is
    /// then available from `str_ix_get`.
    pub fn str_add(&mut self, dev_nbr: u8, s: &'static str) -> Result<()> {
        if !STR_EN {
            return Err(Error::NotSupported);
        }
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        if !dev.info.state.is_building() {
            return Err(Error::InvalidDevState);
        }
        dev.info.str_add(Some(s))
    }

    /// String descriptor index of `s`, 0 if it was never added.
    pub fn str_ix_get(&self, dev_nbr: u8, s: &str) -> Result<u8> {
        Ok(self.dev(dev_nbr)?.info.str_ix(Some(s)))
    }

    /// Checks a descriptor query. The descriptor is built at its full
    /// length, so a `buf` too short to hold it fails with `Alloc`.
    fn desc_query(&self, dev_nbr: u8, buf: &[u8]) -> Result<&Device> {
        let dev = self.dev(dev_nbr)?;
        if buf.is_empty() {
            return Err(Error::InvalidArg);
        }
        if dev.info.state != DeviceState::None {
            return Err(Error::InvalidDevState);
        }
        Ok(dev)
    }

    /// Builds the device descriptor into `buf`, for class drivers that need
    /// it before the device starts. Returns the length written.
    pub fn desc_dev_get(&self, dev_nbr: u8, buf: &mut [u8]) -> Result<usize> {
        let dev = self.desc_query(dev_nbr, buf)?;
        desc::dev_desc(&mut DescWriter::buf(buf), &dev.info, &self.t, u16::MAX)
    }

    /// Builds configuration `cfg_ix` (zero-based, current speed) with all its
    /// interface and endpoint descriptors.
    pub fn desc_config_get(&self, dev_nbr: u8, buf: &mut [u8], cfg_ix: u8) -> Result<usize> {
        let dev = self.desc_query(dev_nbr, buf)?;
        desc::config_desc(&mut DescWriter::buf(buf), &dev.info, &self.t, cfg_ix, false, u16::MAX)
    }

    pub fn desc_str_get(&self, dev_nbr: u8, buf: &mut [u8], str_ix: u8) -> Result<usize> {
        let dev = self.desc_query(dev_nbr, buf)?;
        desc::str_desc(&mut DescWriter::buf(buf), &dev.info, str_ix, u16::MAX)
    }

    /// Applies the oldest queued event of `dev_nbr`. Returns whether there
    /// was one.
    pub fn process(&mut self, q: &EventQueue, dev_nbr: u8) -> Result<bool> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        match q.get(dev_nbr) {
            Some(ev) => {
                event_process(dev, &mut self.t, self.std_req_timeout_ms, ev);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies queued events until the queue of `dev_nbr` is empty, and
    /// returns how many there were.
    pub fn process_all(&mut self, q: &EventQueue, dev_nbr: u8) -> Result<usize> {
        let mut n = 0;
        while self.process(q, dev_nbr)? {
            n += 1;
        }
        Ok(n)
    }
}

/// Leaves the suspended state for the one it interrupted.
fn state_restore(dev: &mut Device) {
    if dev.info.state == DeviceState::Suspended {
        dev.info.state = dev.info.state_prev;
    }
}

fn event_process(dev: &mut Device, t: &mut Tables, timeout_ms: u32, ev: CoreEvent) {
    let nbr = dev.info.nbr;
    match ev {
        CoreEvent::Reset => {
            log::debug!("dev {}: bus reset", nbr);
            if !dev.info.conn {
                dev.info.conn = true;
                if let Some(bus) = dev.bus.clone() {
                    bus.conn(nbr);
                }
            }
            dev.io.ctrl_close();
            stdreq::config_close(dev, t);
            if let Err(e) = dev.io.ctrl_open(u16::from(dev.info.ep0_max)) {
                log::warn!("dev {}: ep0 open failed: {}", nbr, e);
            }
            dev.info.addr = 0;
            dev.info.remote_wakeup = false;
            dev.info.state = DeviceState::Default;
            dev.info.spd = Speed::Full;
            if let Some(bus) = dev.bus.clone() {
                bus.reset(nbr);
            }
        }
        CoreEvent::Suspend => {
            log::debug!("dev {}: suspend", nbr);
            // A second suspend must not overwrite the state to return to.
            if dev.info.state != DeviceState::Suspended {
                dev.info.state_prev = dev.info.state;
            }
            dev.info.state = DeviceState::Suspended;
            if let Some(bus) = dev.bus.clone() {
                bus.suspend(nbr);
            }
        }
        CoreEvent::Resume => {
            log::debug!("dev {}: resume", nbr);
            state_restore(dev);
            if let Some(bus) = dev.bus.clone() {
                bus.resume(nbr);
            }
        }
        CoreEvent::Conn => {
            log::debug!("dev {}: connect", nbr);
            dev.info.state = DeviceState::Attached;
            dev.info.conn = true;
            if let Some(bus) = dev.bus.clone() {
                bus.conn(nbr);
            }
        }
        CoreEvent::Disconn => {
            log::debug!("dev {}: disconnect", nbr);
            dev.io.ctrl_close();
            stdreq::config_close(dev, t);
            dev.info.addr = 0;
            dev.info.state = DeviceState::Init;
            dev.info.cfg_cur = None;
            dev.info.conn = false;
            if let Some(bus) = dev.bus.clone() {
                bus.disconn(nbr);
            }
        }
        CoreEvent::HighSpeed => {
            log::debug!("dev {}: high speed", nbr);
            if crate::config::HS_EN {
                dev.info.spd = Speed::High;
                state_restore(dev);
            }
        }
        CoreEvent::Setup(raw) => {
            state_restore(dev);
            stdreq::handle(dev, t, timeout_ms, &UsbSetupPacket::parse(&raw));
        }
        CoreEvent::Ep { addr, result } => {
            state_restore(dev);
            dev.io.drv.xfer_done(addr, result);
        }
    }
}
