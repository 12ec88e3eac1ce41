// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Records the device tree is built from, and the fixed pools they live in.
//!
//! Each kind of record has one pool shared by every device, sized once from
//! `QtyCfg`. Parents refer to children by `Ix`, never by reference, and
//! records are never freed.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

use crate::class::{ClassArg, ClassDriver};
use crate::config::{DevCfg, DeviceState, QtyCfg, Speed, STR_EN};
use crate::ctrl::DevIo;
use crate::driver::BusEvents;
use crate::error::{Error, Result};
use crate::proto::EP_MAX_PHY_NBR;

/// Set in a configuration number when it names a high-speed configuration.
pub const CONFIG_NBR_SPD_BIT: u8 = 0x80;

/// Handle to a record in an `Arena<T>`.
pub(crate) struct Ix<T> {
    ix: u16,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Ix<T> {
    fn new(ix: usize) -> Self {
        Self { ix: ix as u16, _kind: PhantomData }
    }
}

// Derives would demand `T: Copy`.
impl<T> Clone for Ix<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ix<T> {}

impl<T> PartialEq for Ix<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ix == other.ix
    }
}

impl<T> Eq for Ix<T> {}

impl<T> fmt::Debug for Ix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ix({})", self.ix)
    }
}

/// A pool that hands out records until it reaches its capacity.
pub(crate) struct Arena<T> {
    items: Vec<T>,
    cap: usize,
}

impl<T> Arena<T> {
    pub(crate) fn with_capacity(cap: u8) -> Self {
        let cap = usize::from(cap);
        Self { items: Vec::with_capacity(cap), cap }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    pub(crate) fn alloc(&mut self, item: T) -> Result<Ix<T>> {
        if self.is_full() {
            return Err(Error::NoMoreResources);
        }
        self.items.push(item);
        Ok(Ix::new(self.items.len() - 1))
    }
}

impl<T> Index<Ix<T>> for Arena<T> {
    type Output = T;

    fn index(&self, ix: Ix<T>) -> &T {
        &self.items[usize::from(ix.ix)]
    }
}

impl<T> IndexMut<Ix<T>> for Arena<T> {
    fn index_mut(&mut self, ix: Ix<T>) -> &mut T {
        &mut self.items[usize::from(ix.ix)]
    }
}

pub(crate) struct Config {
    /// `DEV_ATTRIB_*` flags.
    pub attrib: u8,
    /// In mA.
    pub max_pwr: u16,
    pub name: Option<&'static str>,
    pub ifs: Vec<Ix<Interface>>,
    pub grps: Vec<Ix<IfGroup>>,
    /// Physical endpoint slots used anywhere in this configuration.
    pub ep_alloc_map: u32,
    /// Number of the same configuration at the other speed.
    pub other_speed: Option<u8>,
}

pub(crate) struct Interface {
    pub class_code: u8,
    pub class_sub_code: u8,
    pub class_protocol_code: u8,
    pub class: Rc<dyn ClassDriver>,
    pub if_arg: ClassArg,
    /// Union of the maps of every alternate setting.
    pub ep_alloc_map: u32,
    pub alt_cur: u8,
    pub alts: Vec<Ix<AltSetting>>,
    pub grp: Option<u8>,
}

pub(crate) struct AltSetting {
    pub alt_arg: ClassArg,
    pub ep_alloc_map: u32,
    /// In the order they were added, which is the descriptor order.
    pub eps: Vec<Ix<EpInfo>>,
    pub name: Option<&'static str>,
}

pub(crate) struct IfGroup {
    pub class_code: u8,
    pub class_sub_code: u8,
    pub class_protocol_code: u8,
    pub if_start: u8,
    pub if_cnt: u8,
    pub name: Option<&'static str>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct EpInfo {
    pub addr: u8,
    pub attrib: u8,
    /// `wMaxPacketSize`, transaction bits included.
    pub max_pkt: u16,
    /// `bInterval`, already encoded.
    pub interval: u8,
    pub sync_addr: u8,
    pub sync_refresh: u8,
}

/// Every pool but the devices themselves.
pub(crate) struct Tables {
    pub cfgs: Arena<Config>,
    pub ifs: Arena<Interface>,
    pub alts: Arena<AltSetting>,
    pub grps: Arena<IfGroup>,
    pub eps: Arena<EpInfo>,
}

impl Tables {
    pub(crate) fn new(qty: &QtyCfg) -> Self {
        Self {
            cfgs: Arena::with_capacity(qty.config_qty),
            ifs: Arena::with_capacity(qty.if_qty),
            alts: Arena::with_capacity(qty.if_alt_qty),
            grps: Arena::with_capacity(qty.if_grp_qty),
            eps: Arena::with_capacity(qty.ep_desc_qty),
        }
    }

    pub(crate) fn interface(&self, cfg: Ix<Config>, if_nbr: u8) -> Option<Ix<Interface>> {
        self.cfgs[cfg].ifs.get(usize::from(if_nbr)).copied()
    }

    pub(crate) fn alt(&self, iface: Ix<Interface>, alt_nbr: u8) -> Option<Ix<AltSetting>> {
        self.ifs[iface].alts.get(usize::from(alt_nbr)).copied()
    }

    pub(crate) fn alt_ep(&self, alt: Ix<AltSetting>, ep_addr: u8) -> Option<Ix<EpInfo>> {
        self.alts[alt].eps.iter().copied().find(|&ep| self.eps[ep].addr == ep_addr)
    }
}

/// Everything about a device except its hardware side.
pub(crate) struct DevInfo {
    pub nbr: u8,
    pub cfg: DevCfg,
    pub state: DeviceState,
    /// Where to go back to when a suspend ends.
    pub state_prev: DeviceState,
    pub conn: bool,
    pub spd: Speed,
    pub hs_capable: bool,
    pub addr: u8,
    pub self_pwr: bool,
    pub remote_wakeup: bool,
    /// Full number (speed bit included) of the active configuration.
    pub cfg_cur: Option<u8>,
    pub ms_vendor_code: Option<u8>,
    pub ep0_max: u8,
    /// One past the highest physical endpoint handed out.
    pub ep_max_phy_nbr: u8,
    /// Slots taken by the control endpoint pair.
    pub ctrl_map: u32,
    /// Interface that owns each open physical endpoint.
    pub ep_if_tbl: [Option<u8>; EP_MAX_PHY_NBR],
    pub cfgs_fs: Vec<Ix<Config>>,
    pub cfgs_hs: Vec<Ix<Config>>,
    pub strs: Vec<&'static str>,
    pub str_qty: u8,
}

impl DevInfo {
    pub(crate) fn new(nbr: u8, cfg: DevCfg, str_qty: u8) -> Self {
        Self {
            nbr,
            cfg,
            state: DeviceState::None,
            state_prev: DeviceState::None,
            conn: false,
            spd: Speed::Full,
            hs_capable: false,
            addr: 0,
            self_pwr: false,
            remote_wakeup: false,
            cfg_cur: None,
            ms_vendor_code: None,
            ep0_max: 0,
            ep_max_phy_nbr: 0,
            ctrl_map: 0,
            ep_if_tbl: [None; EP_MAX_PHY_NBR],
            cfgs_fs: Vec::new(),
            cfgs_hs: Vec::new(),
            strs: Vec::new(),
            str_qty,
        }
    }

    /// Speed bit for configurations of the current bus speed.
    pub(crate) fn spd_bit(&self) -> u8 {
        if self.spd == Speed::High {
            CONFIG_NBR_SPD_BIT
        } else {
            0
        }
    }

    pub(crate) fn configs(&self, spd_bit: u8) -> &[Ix<Config>] {
        if spd_bit & CONFIG_NBR_SPD_BIT != 0 {
            &self.cfgs_hs
        } else {
            &self.cfgs_fs
        }
    }

    pub(crate) fn config(&self, cfg_nbr: u8) -> Option<Ix<Config>> {
        let ix = usize::from(cfg_nbr & !CONFIG_NBR_SPD_BIT);
        self.configs(cfg_nbr).get(ix).copied()
    }

    /// Registers a string. Adding the same text twice keeps one entry.
    pub(crate) fn str_add(&mut self, s: Option<&'static str>) -> Result<()> {
        let s = match s {
            Some(s) if STR_EN => s,
            _ => return Ok(()),
        };
        if self.strs.iter().any(|&have| have == s) {
            return Ok(());
        }
        if self.strs.len() >= usize::from(self.str_qty) {
            return Err(Error::Alloc);
        }
        self.strs.push(s);
        Ok(())
    }

    /// String descriptor index for `s`, or 0 when there's none.
    pub(crate) fn str_ix(&self, s: Option<&str>) -> u8 {
        let s = match s {
            Some(s) if STR_EN => s,
            _ => return 0,
        };
        match self.strs.iter().position(|&have| have == s) {
            Some(ix) => ix as u8 + 1,
            None => 0,
        }
    }

    /// Looks up by zero-based table position.
    pub(crate) fn str_get(&self, pos: u8) -> Option<&'static str> {
        self.strs.get(usize::from(pos)).copied()
    }
}

pub(crate) struct Device {
    pub info: DevInfo,
    pub io: DevIo,
    pub bus: Option<Rc<dyn BusEvents>>,
}
