// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building a device's configurations, interfaces and endpoints.
//!
//! All of this happens once, before the device is started; every operation
//! fails with `InvalidDevState` afterwards. A failure part way through an
//! operation leaves whatever was already recorded in place.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::class::{ClassArg, ClassDriver};
use crate::config::{DevCfg, Speed, HS_EN, MAX_BUS_PWR_LIMIT_MA, NBR_TOT};
use crate::context::{dev_get, UsbdContext};
use crate::ctrl::DevIo;
use crate::driver::{BusEvents, Driver};
use crate::ep_alloc::{ep_alloc, interval_exp, interval_frames};
use crate::error::{Error, Result};
use crate::proto::{
    ep_addr_to_phy, UsbDir, UsbTransferType, CLASS_CODE_AUDIO, EP_MAX_PKT_SIZE_MASK, EP_MAX_PKT_TRANS_MASK,
    EP_SYNC_ADAPTIVE, EP_SYNC_ASYNC, EP_SYNC_MASK, EP_SYNC_NONE, EP_USAGE_DATA, EP_USAGE_FEEDBACK,
    EP_USAGE_MASK,
};
use crate::tables::{
    AltSetting, Config, DevInfo, Device, EpInfo, IfGroup, Interface, Ix, Tables, CONFIG_NBR_SPD_BIT,
};

/// Class, subclass and protocol of an interface or interface group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClassCodes {
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

impl ClassCodes {
    pub const fn new(class: u8, sub_class: u8, protocol: u8) -> Self {
        Self { class, sub_class, protocol }
    }
}

/// Largest `bRefresh` exponent of a feedback endpoint.
const SYNC_REFRESH_MAX: u8 = 9;

fn building(info: &DevInfo) -> Result<()> {
    if info.state.is_building() {
        Ok(())
    } else {
        Err(Error::InvalidDevState)
    }
}

/// Configuration, interface, and alternate setting an endpoint is added to.
fn ep_parents(
    info: &DevInfo,
    t: &Tables,
    cfg_nbr: u8,
    if_nbr: u8,
    alt_nbr: u8,
) -> Result<(Ix<Config>, Ix<Interface>, Ix<AltSetting>)> {
    let cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
    let iface = t.interface(cfg, if_nbr).ok_or(Error::InvalidArg)?;
    let alt = t.alt(iface, alt_nbr).ok_or(Error::InvalidArg)?;
    Ok((cfg, iface, alt))
}

/// Audio 1.0 interface holding an isochronous endpoint that's being wired
/// up for synchronization.
fn audio_alt(info: &DevInfo, t: &Tables, cfg_nbr: u8, if_nbr: u8, alt_nbr: u8) -> Result<Ix<AltSetting>> {
    let cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
    let iface = t.interface(cfg, if_nbr).ok_or(Error::InvalidArg)?;
    let i = &t.ifs[iface];
    if i.class_code != CLASS_CODE_AUDIO || i.class_protocol_code != 0 {
        return Err(Error::InvalidArg);
    }
    t.alt(iface, alt_nbr).ok_or(Error::InvalidArg)
}

impl UsbdContext {
    /// Adds a device driven by `drv` and claims its control endpoints.
    /// Returns the device number, counting from 0 in the order devices are
    /// added.
    pub fn dev_add(
        &mut self,
        drv: Box<dyn Driver>,
        dev_cfg: DevCfg,
        bus: Option<Rc<dyn BusEvents>>,
    ) -> Result<u8> {
        if self.devs.len() >= usize::from(self.qty.dev_qty) {
            return Err(Error::NoMoreResources);
        }
        let nbr = self.devs.len() as u8;
        let hs = HS_EN && drv.high_speed();
        let table = drv.ep_table();
        let mut map = 0;
        let out = ep_alloc(table, hs, UsbTransferType::Control, UsbDir::Out, 0, 0, &mut map)
            .map_err(|_| Error::EpNoneAvail)?;
        let inp = ep_alloc(table, hs, UsbTransferType::Control, UsbDir::In, 0, 0, &mut map)
            .map_err(|_| Error::EpNoneAvail)?;

        let mut info = DevInfo::new(nbr, dev_cfg, self.qty.str_qty);
        info.hs_capable = hs;
        info.ep0_max = inp.max_pkt as u8;
        info.ctrl_map = map;
        info.ep_max_phy_nbr = ep_addr_to_phy(out.addr).max(ep_addr_to_phy(inp.addr)) + 1;
        info.str_add(dev_cfg.manufacturer)?;
        info.str_add(dev_cfg.product)?;
        info.str_add(dev_cfg.serial_nbr)?;

        log::debug!("dev {}: added, ep0 max pkt {}, hs {}", nbr, info.ep0_max, hs);
        self.devs.push(Device {
            info,
            io: DevIo::new(drv, self.qty.ep_open_qty),
            bus,
        });
        Ok(nbr)
    }

    /// Adds a configuration for one bus speed. `attrib` takes the
    /// `DEV_ATTRIB_*` flags and `max_pwr` is in mA. The returned number
    /// carries `CONFIG_NBR_SPD_BIT` for high-speed configurations.
    pub fn config_add(
        &mut self,
        dev_nbr: u8,
        attrib: u8,
        max_pwr: u16,
        spd: Speed,
        name: Option<&'static str>,
    ) -> Result<u8> {
        if max_pwr > MAX_BUS_PWR_LIMIT_MA {
            return Err(Error::InvalidArg);
        }
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        let info = &mut dev.info;
        building(info)?;
        let spd_bit = match spd {
            Speed::High if HS_EN && info.hs_capable => CONFIG_NBR_SPD_BIT,
            Speed::High => return Err(Error::InvalidArg),
            _ => 0,
        };
        let nbr = info.configs(spd_bit).len();
        if nbr >= usize::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }
        let cfg = self.t.cfgs.alloc(Config {
            attrib,
            max_pwr,
            name,
            ifs: Vec::new(),
            grps: Vec::new(),
            ep_alloc_map: info.ctrl_map,
            other_speed: None,
        })?;
        if spd_bit != 0 {
            info.cfgs_hs.push(cfg);
        } else {
            info.cfgs_fs.push(cfg);
        }
        info.str_add(name)?;
        Ok(nbr as u8 | spd_bit)
    }

    /// Declares `cfg_other` as what `cfg_nbr` becomes at the other speed.
    /// This feeds the other-speed configuration descriptor.
    pub fn config_other_speed(&mut self, dev_nbr: u8, cfg_nbr: u8, cfg_other: u8) -> Result<()> {
        if !HS_EN {
            return Err(Error::NotSupported);
        }
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        building(&dev.info)?;
        if (cfg_nbr ^ cfg_other) & CONFIG_NBR_SPD_BIT == 0 {
            return Err(Error::InvalidArg);
        }
        let cfg = dev.info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
        let other = dev.info.config(cfg_other).ok_or(Error::InvalidArg)?;
        if self.t.cfgs[cfg].other_speed.is_some() || self.t.cfgs[other].other_speed.is_some() {
            return Err(Error::InvalidArg);
        }
        self.t.cfgs[cfg].other_speed = Some(cfg_other);
        self.t.cfgs[other].other_speed = Some(cfg_nbr);
        Ok(())
    }

    /// Adds an interface, with its default alternate setting, owned by
    /// `class`. `if_arg` and `alt_arg` come back in every class callback.
    #[allow(clippy::too_many_arguments)]
    pub fn if_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        class: Rc<dyn ClassDriver>,
        if_arg: ClassArg,
        alt_arg: ClassArg,
        codes: ClassCodes,
        name: Option<&'static str>,
    ) -> Result<u8> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        let info = &mut dev.info;
        building(info)?;
        let cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
        let if_nbr = self.t.cfgs[cfg].ifs.len();
        if if_nbr >= usize::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }
        if self.t.ifs.is_full() || self.t.alts.is_full() {
            return Err(Error::NoMoreResources);
        }
        let alt = self.t.alts.alloc(AltSetting {
            alt_arg,
            ep_alloc_map: info.ctrl_map,
            eps: Vec::new(),
            name,
        })?;
        let mut alts = Vec::new();
        alts.push(alt);
        let iface = self.t.ifs.alloc(Interface {
            class_code: codes.class,
            class_sub_code: codes.sub_class,
            class_protocol_code: codes.protocol,
            class,
            if_arg,
            ep_alloc_map: info.ctrl_map,
            alt_cur: 0,
            alts,
            grp: None,
        })?;
        self.t.cfgs[cfg].ifs.push(iface);
        info.str_add(name)?;
        Ok(if_nbr as u8)
    }

    /// Adds an alternate setting to an interface and returns its number.
    pub fn if_alt_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_arg: ClassArg,
        name: Option<&'static str>,
    ) -> Result<u8> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        let info = &mut dev.info;
        building(info)?;
        let cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
        let iface = self.t.interface(cfg, if_nbr).ok_or(Error::InvalidArg)?;
        let alt_nbr = self.t.ifs[iface].alts.len();
        if alt_nbr >= usize::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }
        let alt = self.t.alts.alloc(AltSetting {
            alt_arg,
            ep_alloc_map: info.ctrl_map,
            eps: Vec::new(),
            name,
        })?;
        self.t.ifs[iface].alts.push(alt);
        info.str_add(name)?;
        Ok(alt_nbr as u8)
    }

    /// Groups `if_cnt` consecutive interfaces from `if_start` into one
    /// function, announced by an interface association descriptor.
    ///
    /// If the name can't be registered the interfaces stay grouped.
    pub fn if_grp(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        codes: ClassCodes,
        if_start: u8,
        if_cnt: u8,
        name: Option<&'static str>,
    ) -> Result<u8> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        let info = &mut dev.info;
        building(info)?;
        if if_cnt == 0 || u16::from(if_start) + u16::from(if_cnt) > u16::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }
        let cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
        let mut members = Vec::with_capacity(usize::from(if_cnt));
        for if_nbr in if_start..if_start + if_cnt {
            let iface = self.t.interface(cfg, if_nbr).ok_or(Error::InvalidArg)?;
            if self.t.ifs[iface].grp.is_some() {
                return Err(Error::AlreadyExists);
            }
            members.push(iface);
        }
        let grp_nbr = self.t.cfgs[cfg].grps.len();
        if grp_nbr >= usize::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }
        let grp = self.t.grps.alloc(IfGroup {
            class_code: codes.class,
            class_sub_code: codes.sub_class,
            class_protocol_code: codes.protocol,
            if_start,
            if_cnt,
            name,
        })?;
        self.t.cfgs[cfg].grps.push(grp);
        for iface in members {
            self.t.ifs[iface].grp = Some(grp_nbr as u8);
        }
        info.str_add(name)?;
        Ok(grp_nbr as u8)
    }

    /// Adds a bulk endpoint. `max_pkt` 0 takes the largest the controller
    /// offers. Returns the endpoint address.
    pub fn bulk_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        dir: UsbDir,
        max_pkt: u16,
    ) -> Result<u8> {
        let ok = if cfg_nbr & CONFIG_NBR_SPD_BIT != 0 {
            max_pkt == 0 || max_pkt == 512
        } else {
            matches!(max_pkt, 0 | 8 | 16 | 32 | 64)
        };
        if !ok {
            return Err(Error::InvalidArg);
        }
        self.ep_add(dev_nbr, cfg_nbr, if_nbr, alt_nbr, UsbTransferType::Bulk as u8, dir, max_pkt, 0)
    }

    /// Adds an interrupt endpoint polled every `interval` frames at full
    /// speed, or every `interval` microframes (a power of two) at high
    /// speed.
    #[allow(clippy::too_many_arguments)]
    pub fn intr_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        dir: UsbDir,
        max_pkt: u16,
        interval: u16,
    ) -> Result<u8> {
        if interval == 0 {
            return Err(Error::InvalidArg);
        }
        let b_interval = if cfg_nbr & CONFIG_NBR_SPD_BIT != 0 {
            if (alt_nbr == 0 && max_pkt > 64) || max_pkt > 1024 {
                return Err(Error::InvalidArg);
            }
            interval_exp(interval)?
        } else {
            if max_pkt > 64 {
                return Err(Error::InvalidArg);
            }
            interval_frames(interval)?
        };
        self.ep_add(
            dev_nbr,
            cfg_nbr,
            if_nbr,
            alt_nbr,
            UsbTransferType::Interrupt as u8,
            dir,
            max_pkt,
            b_interval,
        )
    }

    /// Adds an isochronous endpoint. `attrib` holds the synchronization and
    /// usage bits. `transactions` per microframe above 1 is only possible
    /// at high speed. A default setting's isochronous endpoints must
    /// reserve no bandwidth, so they are added with `max_pkt` 0.
    #[allow(clippy::too_many_arguments)]
    pub fn isoc_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        attrib: u8,
        dir: UsbDir,
        max_pkt: u16,
        transactions: u8,
        interval: u16,
    ) -> Result<u8> {
        if alt_nbr == 0 && max_pkt > 0 {
            return Err(Error::InvalidArg);
        }
        if attrib & !(EP_SYNC_MASK | EP_USAGE_MASK) != 0 {
            return Err(Error::InvalidArg);
        }
        let ok = if cfg_nbr & CONFIG_NBR_SPD_BIT != 0 {
            match transactions {
                1 => max_pkt <= 1024,
                2 => (513..=1024).contains(&max_pkt),
                3 => (683..=1024).contains(&max_pkt),
                _ => false,
            }
        } else {
            max_pkt <= 1023 && transactions == 1
        };
        if !ok {
            return Err(Error::InvalidArg);
        }
        if attrib & EP_USAGE_MASK == EP_USAGE_FEEDBACK && attrib & EP_SYNC_MASK != EP_SYNC_NONE {
            return Err(Error::InvalidArg);
        }
        let b_interval = interval_exp(interval)?;
        let pkt = (u16::from(transactions - 1) << 11) | max_pkt;
        self.ep_add(
            dev_nbr,
            cfg_nbr,
            if_nbr,
            alt_nbr,
            UsbTransferType::Isochronous as u8 | attrib,
            dir,
            pkt,
            b_interval,
        )
    }

    /// Sets how often, as a power of two exponent, the feedback endpoint
    /// `synch_ep_addr` of an audio 1.0 interface reports the rate.
    pub fn isoc_sync_refresh_set(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        synch_ep_addr: u8,
        sync_refresh: u8,
    ) -> Result<()> {
        if sync_refresh == 0 || sync_refresh > SYNC_REFRESH_MAX {
            return Err(Error::InvalidArg);
        }
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        building(&dev.info)?;
        let alt = audio_alt(&dev.info, &self.t, cfg_nbr, if_nbr, alt_nbr)?;
        let ep = self.t.alt_ep(alt, synch_ep_addr).ok_or(Error::EpInvalid)?;
        let e = &mut self.t.eps[ep];
        if UsbTransferType::of_attrib(e.attrib) != UsbTransferType::Isochronous
            || e.attrib & EP_SYNC_MASK != EP_SYNC_NONE
            || e.attrib & EP_USAGE_MASK != EP_USAGE_FEEDBACK
            || e.sync_addr != 0
        {
            return Err(Error::EpInvalid);
        }
        e.sync_refresh = sync_refresh;
        Ok(())
    }

    /// Names `sync_addr` as the feedback endpoint of isochronous data
    /// endpoint `data_ep_addr`. An asynchronous data endpoint must be OUT
    /// and an adaptive one IN.
    pub fn isoc_sync_addr_set(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        data_ep_addr: u8,
        sync_addr: u8,
    ) -> Result<()> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        building(&dev.info)?;
        let alt = audio_alt(&dev.info, &self.t, cfg_nbr, if_nbr, alt_nbr)?;
        let ep = self.t.alt_ep(alt, data_ep_addr).ok_or(Error::EpInvalid)?;
        if self.t.alt_ep(alt, sync_addr).is_none() {
            return Err(Error::InvalidArg);
        }
        let e = &mut self.t.eps[ep];
        let dir = UsbDir::of_endpoint_addr(e.addr);
        let sync_ok = match e.attrib & EP_SYNC_MASK {
            EP_SYNC_ASYNC => dir == UsbDir::Out,
            EP_SYNC_ADAPTIVE => dir == UsbDir::In,
            _ => false,
        };
        if UsbTransferType::of_attrib(e.attrib) != UsbTransferType::Isochronous
            || !sync_ok
            || e.attrib & EP_USAGE_MASK != EP_USAGE_DATA
            || e.sync_refresh != 0
        {
            return Err(Error::EpInvalid);
        }
        e.sync_addr = sync_addr;
        Ok(())
    }

    /// Records an endpoint in an alternate setting after finding a physical
    /// endpoint for it. Slots used by other interfaces of the configuration
    /// are off limits; slots used by sibling alternate settings of the same
    /// interface are not, since only one setting is active at a time.
    #[allow(clippy::too_many_arguments)]
    fn ep_add(
        &mut self,
        dev_nbr: u8,
        cfg_nbr: u8,
        if_nbr: u8,
        alt_nbr: u8,
        attrib: u8,
        dir: UsbDir,
        max_pkt: u16,
        interval: u8,
    ) -> Result<u8> {
        let dev = dev_get(&mut self.devs, dev_nbr)?;
        building(&dev.info)?;
        let t = &mut self.t;
        let (cfg, iface, alt) = ep_parents(&dev.info, t, cfg_nbr, if_nbr, alt_nbr)?;
        if t.eps.is_full() {
            return Err(Error::NoMoreResources);
        }
        if t.alts[alt].eps.len() >= usize::from(NBR_TOT) {
            return Err(Error::InvalidArg);
        }

        let hs = cfg_nbr & CONFIG_NBR_SPD_BIT != 0;
        let taken = (t.cfgs[cfg].ep_alloc_map & !t.ifs[iface].ep_alloc_map) | t.alts[alt].ep_alloc_map;
        let mut map = taken;
        let got = ep_alloc(
            dev.io.drv.ep_table(),
            hs,
            UsbTransferType::of_attrib(attrib),
            dir,
            max_pkt & EP_MAX_PKT_SIZE_MASK,
            alt_nbr,
            &mut map,
        )
        .map_err(|_| Error::EpNoneAvail)?;
        let new_bits = map & !taken;

        let ep = t.eps.alloc(EpInfo {
            addr: got.addr,
            attrib,
            max_pkt: got.max_pkt | (max_pkt & EP_MAX_PKT_TRANS_MASK),
            interval,
            sync_addr: 0,
            sync_refresh: 0,
        })?;
        dev.info.ep_max_phy_nbr = dev.info.ep_max_phy_nbr.max(ep_addr_to_phy(got.addr) + 1);

        t.alts[alt].ep_alloc_map |= new_bits;
        t.ifs[iface].ep_alloc_map |= t.alts[alt].ep_alloc_map;
        t.cfgs[cfg].ep_alloc_map |= t.ifs[iface].ep_alloc_map;
        t.alts[alt].eps.push(ep);

        log::trace!(
            "dev {}: cfg {:#04x} if {} alt {}: ep {:#04x} max pkt {}",
            dev_nbr,
            cfg_nbr,
            if_nbr,
            alt_nbr,
            got.addr,
            got.max_pkt
        );
        Ok(got.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QtyCfg;
    use crate::desc::DEV_ATTRIB_SELF_POWERED;
    use crate::test_support::{dev_cfg, fs_table, hs_table, qty, MockClass, MockDriver};

    const VENDOR: ClassCodes = ClassCodes::new(0xFF, 0, 0);
    const AUDIO_STREAMING: ClassCodes = ClassCodes::new(CLASS_CODE_AUDIO, 2, 0);

    fn fs_dev() -> (UsbdContext, u8) {
        let mut ctx = UsbdContext::new(qty()).unwrap();
        let (drv, _h) = MockDriver::new(fs_table());
        let dev = ctx.dev_add(Box::new(drv), dev_cfg(), None).unwrap();
        (ctx, dev)
    }

    fn if_add(ctx: &mut UsbdContext, dev: u8, cfg: u8, codes: ClassCodes) -> Result<u8> {
        let (class, _calls) = MockClass::new();
        ctx.if_add(dev, cfg, class, 0, 0, codes, None)
    }

    #[test]
    fn dev_add_claims_control_pair() {
        let (ctx, dev) = fs_dev();
        assert_eq!(dev, 0);
        assert_eq!(ctx.ep_max_phy_nbr_get(dev), Ok(2));
        assert_eq!(ctx.devs[0].info.ep0_max, 64);
        assert_eq!(ctx.devs[0].info.ctrl_map, 0b11);
    }

    #[test]
    fn dev_add_stops_at_device_quantity() {
        let (mut ctx, _) = fs_dev();
        let (drv, _h) = MockDriver::new(fs_table());
        assert_eq!(ctx.dev_add(Box::new(drv), dev_cfg(), None), Ok(1));
        let (drv, _h) = MockDriver::new(fs_table());
        assert_eq!(ctx.dev_add(Box::new(drv), dev_cfg(), None), Err(Error::NoMoreResources));
    }

    #[test]
    fn dev_add_needs_control_endpoints() {
        let mut ctx = UsbdContext::new(qty()).unwrap();
        let (drv, _h) = MockDriver::new(fs_table()[2..].to_vec());
        assert_eq!(ctx.dev_add(Box::new(drv), dev_cfg(), None), Err(Error::EpNoneAvail));
    }

    #[test]
    fn single_bulk_endpoint_configuration() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        assert_eq!(cfg, 0);
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        assert_eq!(iface, 0);
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 64), Ok(0x81));

        let mut buf = [0u8; 64];
        assert_eq!(ctx.desc_config_get(dev, &mut buf, 0), Ok(25));
        assert_eq!(
            &buf[..25],
            &[
                9, 2, 25, 0, 1, 1, 0, 0x80, 50, //
                9, 4, 0, 0, 1, 0xFF, 0, 0, 0, //
                7, 5, 0x81, 0x02, 64, 0, 0,
            ]
        );
    }

    #[test]
    fn endpoints_of_one_interface_never_share_a_slot() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let i0 = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        let i1 = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        let a = ctx.bulk_add(dev, cfg, i0, 0, UsbDir::In, 0).unwrap();
        let b = ctx.bulk_add(dev, cfg, i1, 0, UsbDir::In, 0).unwrap();
        assert_ne!(a, b);

        // Alternate settings of one interface may reuse a slot.
        let alt = ctx.if_alt_add(dev, cfg, i0, 1, None).unwrap();
        assert_eq!(alt, 1);
        assert_eq!(ctx.bulk_add(dev, cfg, i0, alt, UsbDir::In, 0), Ok(a));
    }

    #[test]
    fn power_limit_and_speed_are_checked() {
        let (mut ctx, dev) = fs_dev();
        assert_eq!(ctx.config_add(dev, 0, 501, Speed::Full, None), Err(Error::InvalidArg));
        assert_eq!(ctx.config_add(dev, 0, 500, Speed::Full, None), Ok(0));
        assert_eq!(ctx.config_add(dev, 0, 100, Speed::High, None), Err(Error::InvalidArg));
    }

    #[test]
    fn building_stops_once_started() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, DEV_ATTRIB_SELF_POWERED, 0, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        ctx.dev_start(dev).unwrap();
        // Still buildable in INIT.
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::Out, 64), Ok(0x01));

        ctx.devs[0].info.state = crate::config::DeviceState::Default;
        assert_eq!(ctx.config_add(dev, 0, 100, Speed::Full, None), Err(Error::InvalidDevState));
        assert_eq!(if_add(&mut ctx, dev, cfg, VENDOR), Err(Error::InvalidDevState));
        assert_eq!(ctx.if_alt_add(dev, cfg, iface, 0, None), Err(Error::InvalidDevState));
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 64), Err(Error::InvalidDevState));
    }

    #[test]
    fn missing_parents_are_invalid() {
        let (mut ctx, dev) = fs_dev();
        assert_eq!(if_add(&mut ctx, dev, 0, VENDOR), Err(Error::InvalidArg));
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        assert_eq!(ctx.if_alt_add(dev, cfg, 0, 0, None), Err(Error::InvalidArg));
        assert_eq!(ctx.bulk_add(dev, cfg, 0, 0, UsbDir::In, 64), Err(Error::InvalidArg));
        assert_eq!(ctx.config_add(9, 0, 100, Speed::Full, None), Err(Error::NotFound));
    }

    #[test]
    fn bulk_sizes_follow_speed() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 512), Err(Error::InvalidArg));
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 48), Err(Error::InvalidArg));
    }

    #[test]
    fn interrupt_interval_encoding() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        assert_eq!(ctx.intr_add(dev, cfg, iface, 0, UsbDir::In, 8, 0), Err(Error::InvalidArg));
        assert_eq!(ctx.intr_add(dev, cfg, iface, 0, UsbDir::In, 8, 255), Err(Error::InvalidArg));
        assert_eq!(ctx.intr_add(dev, cfg, iface, 0, UsbDir::In, 65, 10), Err(Error::InvalidArg));
        let addr = ctx.intr_add(dev, cfg, iface, 0, UsbDir::In, 8, 10).unwrap();

        let c = ctx.devs[0].info.config(cfg).unwrap();
        let alt = ctx.t.alt(ctx.t.interface(c, iface).unwrap(), 0).unwrap();
        let e = ctx.t.eps[ctx.t.alt_ep(alt, addr).unwrap()];
        assert_eq!((e.interval, e.max_pkt, e.attrib), (10, 8, 0x03));
    }

    #[test]
    fn endpoint_pool_exhaustion() {
        let mut ctx = UsbdContext::new(QtyCfg { ep_desc_qty: 1, ..qty() }).unwrap();
        let (drv, _h) = MockDriver::new(fs_table());
        let dev = ctx.dev_add(Box::new(drv), dev_cfg(), None).unwrap();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 64).unwrap();
        assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::Out, 64), Err(Error::NoMoreResources));
    }

    #[test]
    fn group_marks_interfaces_and_refuses_overlap() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        for _ in 0..3 {
            if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        }
        let misc = ClassCodes::new(0x02, 0x02, 0x01);
        assert_eq!(ctx.if_grp(dev, cfg, misc, 0, 2, None), Ok(0));
        assert_eq!(ctx.if_grp(dev, cfg, misc, 1, 2, None), Err(Error::AlreadyExists));
        assert_eq!(ctx.if_grp(dev, cfg, misc, 2, 2, None), Err(Error::InvalidArg));
        assert_eq!(ctx.if_grp(dev, cfg, misc, 2, 0, None), Err(Error::InvalidArg));

        let mut buf = [0u8; 128];
        let len = ctx.desc_config_get(dev, &mut buf, 0).unwrap();
        // Header, one IAD, three interfaces.
        assert_eq!(len, 9 + 8 + 3 * 9);
        assert_eq!(&buf[9..17], &[8, 0x0B, 0, 2, 0x02, 0x02, 0x01, 0]);

        let mut dev_desc = [0u8; 18];
        ctx.desc_dev_get(dev, &mut dev_desc).unwrap();
        assert_eq!(&dev_desc[4..7], &[0xEF, 0x02, 0x01]);
    }

    #[cfg(feature = "strings")]
    #[test]
    fn group_left_tagged_when_its_name_does_not_fit() {
        let q = QtyCfg { str_qty: 2, ..qty() };
        let mut ctx = UsbdContext::new(q).unwrap();
        let (drv, _h) = MockDriver::new(fs_table());
        // Manufacturer and product fill the string table.
        let dev = ctx.dev_add(Box::new(drv), dev_cfg(), None).unwrap();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        let misc = ClassCodes::new(0x02, 0x02, 0x01);
        assert_eq!(ctx.if_grp(dev, cfg, misc, 0, 2, Some("Function")), Err(Error::Alloc));
        assert_eq!(ctx.if_grp(dev, cfg, misc, 0, 1, None), Err(Error::AlreadyExists));
    }

    #[test]
    fn isochronous_rules() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, AUDIO_STREAMING).unwrap();
        let alt = ctx.if_alt_add(dev, cfg, iface, 1, None).unwrap();

        assert_eq!(
            ctx.isoc_add(dev, cfg, iface, 0, EP_SYNC_ASYNC, UsbDir::Out, 192, 1, 1),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            ctx.isoc_add(dev, cfg, iface, alt, 0x40, UsbDir::Out, 192, 1, 1),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            ctx.isoc_add(dev, cfg, iface, alt, EP_SYNC_ASYNC, UsbDir::Out, 192, 2, 1),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            ctx.isoc_add(dev, cfg, iface, alt, EP_SYNC_ASYNC | EP_USAGE_FEEDBACK, UsbDir::In, 3, 1, 1),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            ctx.isoc_add(dev, cfg, iface, alt, EP_SYNC_ASYNC, UsbDir::Out, 192, 1, 3),
            Err(Error::InvalidArg)
        );

        let data = ctx.isoc_add(dev, cfg, iface, alt, EP_SYNC_ASYNC, UsbDir::Out, 192, 1, 1).unwrap();
        let fb = ctx.isoc_add(dev, cfg, iface, alt, EP_USAGE_FEEDBACK, UsbDir::In, 3, 1, 1).unwrap();
        assert_eq!(data, 0x01);
        assert_eq!(fb, 0x81);

        assert_eq!(ctx.isoc_sync_refresh_set(dev, cfg, iface, alt, fb, 0), Err(Error::InvalidArg));
        assert_eq!(ctx.isoc_sync_refresh_set(dev, cfg, iface, alt, data, 3), Err(Error::EpInvalid));
        ctx.isoc_sync_refresh_set(dev, cfg, iface, alt, fb, 3).unwrap();
        assert_eq!(ctx.isoc_sync_addr_set(dev, cfg, iface, alt, data, 0x82), Err(Error::InvalidArg));
        assert_eq!(ctx.isoc_sync_addr_set(dev, cfg, iface, alt, fb, data), Err(Error::EpInvalid));
        ctx.isoc_sync_addr_set(dev, cfg, iface, alt, data, fb).unwrap();

        let mut buf = [0u8; 128];
        let len = ctx.desc_config_get(dev, &mut buf, 0).unwrap();
        // Header, two settings, two 9-byte audio endpoint descriptors.
        assert_eq!(len, 9 + 9 + 9 + 9 + 9);
        assert_eq!(&buf[27..36], &[9, 5, 0x01, 0x05, 192, 0, 1, 0, 0x81]);
        assert_eq!(&buf[36..45], &[9, 5, 0x81, 0x11, 3, 0, 1, 3, 0]);
    }

    #[test]
    fn sync_wiring_needs_an_audio_interface() {
        let (mut ctx, dev) = fs_dev();
        let cfg = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
        let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
        let alt = ctx.if_alt_add(dev, cfg, iface, 1, None).unwrap();
        let fb = ctx.isoc_add(dev, cfg, iface, alt, EP_USAGE_FEEDBACK, UsbDir::In, 3, 1, 1).unwrap();
        assert_eq!(ctx.isoc_sync_refresh_set(dev, cfg, iface, alt, fb, 3), Err(Error::InvalidArg));
    }

    #[cfg(feature = "high-speed")]
    mod high_speed {
        use alloc::vec;

        use super::*;

        fn hs_dev() -> (UsbdContext, u8) {
            let mut ctx = UsbdContext::new(qty()).unwrap();
            let (drv, _h) = MockDriver::high_speed(hs_table());
            let dev = ctx.dev_add(Box::new(drv), dev_cfg(), None).unwrap();
            (ctx, dev)
        }

        #[test]
        fn high_speed_configuration_numbers_carry_the_speed_bit() {
            let (mut ctx, dev) = hs_dev();
            assert_eq!(ctx.config_add(dev, 0, 100, Speed::Full, None), Ok(0));
            assert_eq!(ctx.config_add(dev, 0, 100, Speed::High, None), Ok(0x80));
            assert_eq!(ctx.config_add(dev, 0, 100, Speed::High, None), Ok(0x81));
        }

        #[test]
        fn other_speed_links_both_ways_once() {
            let (mut ctx, dev) = hs_dev();
            let fs = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
            let hs = ctx.config_add(dev, 0, 100, Speed::High, None).unwrap();
            let fs2 = ctx.config_add(dev, 0, 100, Speed::Full, None).unwrap();
            assert_eq!(ctx.config_other_speed(dev, fs, fs2), Err(Error::InvalidArg));
            assert_eq!(ctx.config_other_speed(dev, fs, 0x85), Err(Error::InvalidArg));
            ctx.config_other_speed(dev, fs, hs).unwrap();
            assert_eq!(ctx.config_other_speed(dev, fs2, hs), Err(Error::InvalidArg));

            let c = ctx.devs[0].info.config(hs).unwrap();
            assert_eq!(ctx.t.cfgs[c].other_speed, Some(fs));
        }

        #[test]
        fn high_speed_endpoint_limits() {
            let (mut ctx, dev) = hs_dev();
            let cfg = ctx.config_add(dev, 0, 100, Speed::High, None).unwrap();
            let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
            let alt = ctx.if_alt_add(dev, cfg, iface, 1, None).unwrap();
            assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 64), Err(Error::InvalidArg));
            assert_eq!(ctx.bulk_add(dev, cfg, iface, 0, UsbDir::In, 512), Ok(0x81));
            assert_eq!(ctx.intr_add(dev, cfg, iface, 0, UsbDir::In, 128, 8), Err(Error::InvalidArg));
            assert_eq!(ctx.intr_add(dev, cfg, iface, alt, UsbDir::In, 128, 6), Err(Error::InvalidArg));
            let addr = ctx.intr_add(dev, cfg, iface, alt, UsbDir::In, 128, 8).unwrap();

            let c = ctx.devs[0].info.config(cfg).unwrap();
            let a = ctx.t.alt(ctx.t.interface(c, iface).unwrap(), alt).unwrap();
            let e = ctx.t.eps[ctx.t.alt_ep(a, addr).unwrap()];
            assert_eq!((e.interval, e.max_pkt), (4, 128));
        }

        #[test]
        fn high_bandwidth_isochronous() {
            let (mut ctx, dev) = hs_dev();
            let cfg = ctx.config_add(dev, 0, 100, Speed::High, None).unwrap();
            let iface = if_add(&mut ctx, dev, cfg, VENDOR).unwrap();
            let alt = ctx.if_alt_add(dev, cfg, iface, 1, None).unwrap();
            assert_eq!(
                ctx.isoc_add(dev, cfg, iface, alt, 0, UsbDir::In, 512, 2, 1),
                Err(Error::InvalidArg)
            );
            assert_eq!(
                ctx.isoc_add(dev, cfg, iface, alt, 0, UsbDir::In, 600, 3, 1),
                Err(Error::InvalidArg)
            );
            let addr = ctx.isoc_add(dev, cfg, iface, alt, 0, UsbDir::In, 1024, 3, 1).unwrap();
            let c = ctx.devs[0].info.config(cfg).unwrap();
            let a = ctx.t.alt(ctx.t.interface(c, iface).unwrap(), alt).unwrap();
            let e = ctx.t.eps[ctx.t.alt_ep(a, addr).unwrap()];
            assert_eq!(e.max_pkt, 0x1000 | 1024);

            let mut buf = vec![0u8; 64];
            let len = ctx.desc_config_get(dev, &mut buf, 0);
            // Descriptor queries answer for the current speed, which is full
            // speed until the bus says otherwise.
            assert_eq!(len, Err(Error::InvalidArg));
        }
    }
}
