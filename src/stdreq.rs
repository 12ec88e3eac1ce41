// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Control requests arriving on EP0.
//!
//! `handle` decodes a SETUP packet, works out who answers it, runs the data
//! stage, and then either completes the status stage or stalls EP0. Requests
//! aimed at an interface or one of its endpoints go to the class driver that
//! owns it. Configurations and alternate settings are opened and closed here
//! on the host's say-so.

use num_traits::FromPrimitive;
use zerocopy::AsBytes;

use crate::config::{DeviceState, HS_EN, MS_OS_EN};
use crate::ctrl::Ctrl;
use crate::desc::{
    self, DescWriter, DEV_ATTRIB_REMOTE_WAKEUP, DEV_ATTRIB_SELF_POWERED, MS_OS_FEATURE_COMPAT_ID,
    MS_OS_FEATURE_EXT_PROPERTIES,
};
use crate::error::{Error, Result};
use crate::proto::{
    ep_addr_to_phy, UsbDescType, UsbDir, UsbRecipient, UsbReqType, UsbSetupPacket, UsbSetupRequest,
    EP_NBR_MASK, FEATURE_SEL_DEVICE_REMOTE_WAKEUP, FEATURE_SEL_ENDPOINT_HALT,
};
use crate::tables::{AltSetting, Config, Device, Interface, Ix, Tables, CONFIG_NBR_SPD_BIT};

/// GET_STATUS bits, device recipient.
const STATUS_SELF_POWERED: u8 = 0x01;
const STATUS_REMOTE_WAKEUP: u8 = 0x02;
/// GET_STATUS bit, endpoint recipient.
const STATUS_HALT: u8 = 0x01;

/// Answers one SETUP packet, status stage included.
pub(crate) fn handle(dev: &mut Device, t: &mut Tables, timeout_ms: u32, setup: &UsbSetupPacket) {
    let nbr = dev.info.nbr;
    let req_type = setup.req_type();
    let recipient = setup.recipient();
    log::trace!("dev {}: setup {:02x?} {:?} {:?}", nbr, setup.as_bytes(), req_type, recipient);

    let ms_code = MS_OS_EN && dev.info.ms_vendor_code == Some(setup.request);
    let valid = match (req_type, recipient) {
        (UsbReqType::Standard, Some(UsbRecipient::Device)) => dev_req(dev, t, timeout_ms, setup),
        (UsbReqType::Standard, Some(UsbRecipient::Interface)) => if_req(dev, t, timeout_ms, setup),
        (UsbReqType::Standard, Some(UsbRecipient::Endpoint)) => ep_req(dev, t, timeout_ms, setup),
        (UsbReqType::Class, Some(UsbRecipient::Interface | UsbRecipient::Endpoint)) => {
            class_req(dev, t, timeout_ms, setup)
        }
        (UsbReqType::Vendor, Some(UsbRecipient::Interface)) if ms_code => ms_req(dev, t, timeout_ms, setup, false),
        (UsbReqType::Vendor, Some(UsbRecipient::Interface | UsbRecipient::Endpoint)) => {
            vendor_req(dev, t, timeout_ms, setup)
        }
        (UsbReqType::Vendor, Some(UsbRecipient::Device)) if ms_code => ms_req(dev, t, timeout_ms, setup, true),
        _ => false,
    };

    if !valid {
        log::debug!("dev {}: stall {:02x?}", nbr, setup.as_bytes());
        dev.io.ctrl_stall();
        return;
    }

    let state = dev.info.state;
    let status = match setup.direction() {
        UsbDir::In => dev.io.ctrl_rx_status(state, timeout_ms),
        UsbDir::Out => dev.io.ctrl_tx_status(state, timeout_ms),
    };
    if let Err(e) = status {
        log::warn!("dev {}: status stage failed: {}", nbr, e);
    }
    // The new address only takes effect once the host has seen the status
    // stage at the old one.
    if req_type == UsbReqType::Standard
        && recipient == Some(UsbRecipient::Device)
        && setup.standard_request() == Some(UsbSetupRequest::SetAddress)
    {
        dev.io.drv.addr_en(dev.info.addr);
    }
}

/// Short data stage of a device-to-host request, cut to `wLength`.
fn tx(dev: &mut Device, setup: &UsbSetupPacket, timeout_ms: u32, data: &[u8]) -> bool {
    let n = data.len().min(usize::from(setup.length.get()));
    dev.io.ctrl_tx(dev.info.state, &data[..n], false, timeout_ms).is_ok()
}

fn cfg_cur(dev: &Device) -> Option<(u8, Ix<Config>)> {
    let nbr = dev.info.cfg_cur?;
    Some((nbr, dev.info.config(nbr)?))
}

fn dev_req(dev: &mut Device, t: &mut Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let dir_in = setup.direction() == UsbDir::In;
    let value = setup.value.get();
    let index = setup.index.get();
    let length = setup.length.get();

    match setup.standard_request() {
        Some(UsbSetupRequest::GetDescriptor) if dir_in => desc_get(dev, t, timeout_ms, setup),
        Some(UsbSetupRequest::SetAddress) if !dir_in => {
            if value > 127 || index != 0 || length != 0 {
                return false;
            }
            addr_set(dev, value as u8)
        }
        Some(UsbSetupRequest::SetConfiguration) if !dir_in => {
            if value & 0xFF00 != 0 || index != 0 || length != 0 {
                return false;
            }
            cfg_set(dev, t, value as u8)
        }
        Some(UsbSetupRequest::GetConfiguration) if dir_in => {
            if length != 1 || index != 0 || value != 0 {
                return false;
            }
            let cfg_val = match (dev.info.state, dev.info.cfg_cur) {
                (DeviceState::Addressed, _) => 0,
                (DeviceState::Configured, Some(nbr)) => (nbr & !CONFIG_NBR_SPD_BIT) + 1,
                _ => return false,
            };
            tx(dev, setup, timeout_ms, &[cfg_val])
        }
        Some(UsbSetupRequest::GetStatus) if dir_in => {
            if length != 2 || index != 0 || value != 0 {
                return false;
            }
            let self_pwr = match dev.info.state {
                DeviceState::Addressed => dev.info.self_pwr,
                DeviceState::Configured => match cfg_cur(dev) {
                    Some((_, cfg)) => t.cfgs[cfg].attrib & DEV_ATTRIB_SELF_POWERED != 0,
                    None => false,
                },
                _ => return false,
            };
            let mut status = 0;
            if self_pwr {
                status |= STATUS_SELF_POWERED;
            }
            if dev.info.remote_wakeup {
                status |= STATUS_REMOTE_WAKEUP;
            }
            tx(dev, setup, timeout_ms, &[status, 0])
        }
        Some(req @ (UsbSetupRequest::SetFeature | UsbSetupRequest::ClearFeature)) if !dir_in => {
            if length != 0 || index != 0 || dev.info.state != DeviceState::Configured {
                return false;
            }
            let cfg = match cfg_cur(dev) {
                Some((_, cfg)) => cfg,
                None => return false,
            };
            // Other selectors, test mode included, are accepted and ignored.
            if value == FEATURE_SEL_DEVICE_REMOTE_WAKEUP && t.cfgs[cfg].attrib & DEV_ATTRIB_REMOTE_WAKEUP != 0 {
                dev.info.remote_wakeup = req == UsbSetupRequest::SetFeature;
            }
            true
        }
        _ => false,
    }
}

fn desc_get(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let value = setup.value.get();
    let desc_ix = value as u8;
    let req_len = setup.length.get();
    let info = &dev.info;
    let hs = HS_EN && info.hs_capable;
    let mut w = DescWriter::ctrl(&mut dev.io, info.state, timeout_ms);
    let res = match UsbDescType::from_u8((value >> 8) as u8) {
        Some(UsbDescType::Device) => desc::dev_desc(&mut w, info, t, req_len),
        Some(UsbDescType::Config) => desc::config_desc(&mut w, info, t, desc_ix, false, req_len),
        Some(UsbDescType::String) => desc::str_desc(&mut w, info, desc_ix, req_len),
        Some(UsbDescType::DeviceQualifier) if hs => desc::qualifier_desc(&mut w, info, t, req_len),
        Some(UsbDescType::OtherSpeedConfig) if hs => desc::config_desc(&mut w, info, t, desc_ix, true, req_len),
        _ => Err(Error::InvalidArg),
    };
    match res {
        Ok(n) => {
            log::trace!("dev {}: descriptor {:#06x}, {} bytes", info.nbr, value, n);
            true
        }
        Err(e) => {
            log::debug!("dev {}: descriptor {:#06x}: {}", info.nbr, value, e);
            false
        }
    }
}

fn addr_set(dev: &mut Device, addr: u8) -> bool {
    match (dev.info.state, addr) {
        (DeviceState::Default, 0) => return false,
        (DeviceState::Default, _) | (DeviceState::Addressed, _) => {}
        (state, _) => {
            log::debug!("dev {}: SET_ADDRESS in {:?}", dev.info.nbr, state);
            return false;
        }
    }
    if !dev.io.drv.addr_set(addr) {
        log::debug!("dev {}: driver refused address {}", dev.info.nbr, addr);
        return false;
    }
    dev.info.addr = addr;
    dev.info.state = if addr == 0 {
        DeviceState::Default
    } else {
        DeviceState::Addressed
    };
    true
}

fn cfg_set(dev: &mut Device, t: &mut Tables, cfg_val: u8) -> bool {
    if usize::from(cfg_val) > dev.info.configs(dev.info.spd_bit()).len() {
        return false;
    }
    let res = match (dev.info.state, cfg_val) {
        (DeviceState::Addressed, 0) => Ok(()),
        (DeviceState::Addressed, _) => config_open(dev, t, cfg_val - 1),
        (DeviceState::Configured, 0) => {
            config_close(dev, t);
            Ok(())
        }
        (DeviceState::Configured, _) if dev.info.cfg_cur == Some((cfg_val - 1) | dev.info.spd_bit()) => Ok(()),
        (DeviceState::Configured, _) => {
            config_close(dev, t);
            config_open(dev, t, cfg_val - 1)
        }
        _ => Err(Error::InvalidDevState),
    };
    match res {
        Ok(()) => true,
        Err(e) => {
            log::debug!("dev {}: SET_CONFIGURATION({}): {}", dev.info.nbr, cfg_val, e);
            false
        }
    }
}

/// Opens every endpoint of an alternate setting and records `if_nbr` as
/// their owner. On failure whatever was opened is closed again.
fn alt_open(dev: &mut Device, t: &Tables, if_nbr: u8, alt: Ix<AltSetting>) -> Result<()> {
    for &ep in t.alts[alt].eps.iter() {
        let e = &t.eps[ep];
        dev.info.ep_if_tbl[usize::from(ep_addr_to_phy(e.addr))] = Some(if_nbr);
        if let Err(err) = dev.io.ep_open(e.addr, e.attrib, e.max_pkt) {
            log::debug!("dev {}: ep {:#04x} open failed: {}", dev.info.nbr, e.addr, err);
            alt_close(dev, t, alt);
            return Err(err);
        }
    }
    Ok(())
}

fn alt_close(dev: &mut Device, t: &Tables, alt: Ix<AltSetting>) {
    for &ep in t.alts[alt].eps.iter() {
        let addr = t.eps[ep].addr;
        dev.info.ep_if_tbl[usize::from(ep_addr_to_phy(addr))] = None;
        dev.io.ep_close(addr);
    }
}

/// Closes the current setting of the first `if_cnt` interfaces of `cfg` and
/// puts each back on setting 0.
fn alts_close(dev: &mut Device, t: &mut Tables, cfg: Ix<Config>, if_cnt: usize) {
    for n in 0..if_cnt {
        let iface = t.cfgs[cfg].ifs[n];
        if let Some(alt) = t.alt(iface, t.ifs[iface].alt_cur) {
            alt_close(dev, t, alt);
        }
        t.ifs[iface].alt_cur = 0;
    }
}

/// Makes configuration `cfg_ix` of the current speed active.
fn config_open(dev: &mut Device, t: &mut Tables, cfg_ix: u8) -> Result<()> {
    let nbr = dev.info.nbr;
    let cfg_nbr = cfg_ix | dev.info.spd_bit();
    let cfg = dev.info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
    let if_cnt = t.cfgs[cfg].ifs.len();

    for n in 0..if_cnt {
        let iface = t.cfgs[cfg].ifs[n];
        let res = match t.alt(iface, t.ifs[iface].alt_cur) {
            Some(alt) => alt_open(dev, t, n as u8, alt),
            None => Err(Error::InvalidArg),
        };
        if let Err(e) = res {
            alts_close(dev, t, cfg, n);
            return Err(e);
        }
    }

    dev.info.cfg_cur = Some(cfg_nbr);
    if !dev.io.drv.cfg_set(cfg_ix + 1) {
        alts_close(dev, t, cfg, if_cnt);
        dev.info.cfg_cur = None;
        return Err(Error::Xfer);
    }
    dev.info.state = DeviceState::Configured;

    for &iface in t.cfgs[cfg].ifs.iter() {
        let i = &t.ifs[iface];
        i.class.conn(nbr, cfg_ix, i.if_arg);
    }
    if let Some(bus) = dev.bus.clone() {
        bus.cfg_set(nbr, cfg_ix + 1);
    }
    log::debug!("dev {}: configuration {} active", nbr, cfg_ix + 1);
    Ok(())
}

/// Deactivates the current configuration, if any, and leaves the device
/// addressed.
pub(crate) fn config_close(dev: &mut Device, t: &mut Tables) {
    let (cfg_nbr, cfg) = match cfg_cur(dev) {
        Some(cur) => cur,
        None => {
            dev.info.cfg_cur = None;
            return;
        }
    };
    let nbr = dev.info.nbr;
    let cfg_ix = cfg_nbr & !CONFIG_NBR_SPD_BIT;

    if let Some(bus) = dev.bus.clone() {
        bus.cfg_clr(nbr, cfg_ix + 1);
    }
    for &iface in t.cfgs[cfg].ifs.iter() {
        let i = &t.ifs[iface];
        i.class.disconn(nbr, cfg_ix, i.if_arg);
    }
    dev.info.state = DeviceState::Addressed;

    let if_cnt = t.cfgs[cfg].ifs.len();
    alts_close(dev, t, cfg, if_cnt);
    dev.io.drv.cfg_clr(cfg_ix + 1);
    dev.info.cfg_cur = None;
    log::debug!("dev {}: configuration {} closed", nbr, cfg_ix + 1);
}

fn if_req(dev: &mut Device, t: &mut Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let (cfg_nbr, cfg) = match cfg_cur(dev) {
        Some(cur) => cur,
        None => return false,
    };
    let if_nbr = setup.index.get() as u8;
    let iface = match t.interface(cfg, if_nbr) {
        Some(iface) => iface,
        None => return false,
    };
    let dir_in = setup.direction() == UsbDir::In;
    let configured = dev.info.state == DeviceState::Configured;

    match setup.standard_request() {
        Some(UsbSetupRequest::GetStatus) if dir_in && configured => tx(dev, setup, timeout_ms, &[0, 0]),
        Some(UsbSetupRequest::SetFeature | UsbSetupRequest::ClearFeature) if !dir_in => configured,
        Some(UsbSetupRequest::GetInterface) if dir_in && configured => {
            let alt_cur = t.ifs[iface].alt_cur;
            tx(dev, setup, timeout_ms, &[alt_cur])
        }
        Some(UsbSetupRequest::SetInterface) if !dir_in && configured => {
            alt_set(dev, t, cfg_nbr, if_nbr, iface, setup.value.get() as u8)
        }
        Some(
            UsbSetupRequest::GetStatus
            | UsbSetupRequest::SetFeature
            | UsbSetupRequest::ClearFeature
            | UsbSetupRequest::GetInterface
            | UsbSetupRequest::SetInterface,
        ) => false,
        // GET_DESCRIPTOR and anything else the core doesn't know about.
        _ => if_class_req(dev, t, timeout_ms, setup, iface),
    }
}

/// Hands a standard interface request to the class, with a descriptor
/// writer for the data stage.
fn if_class_req(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket, iface: Ix<Interface>) -> bool {
    let i = &t.ifs[iface];
    let mut w = DescWriter::ctrl(&mut dev.io, dev.info.state, timeout_ms);
    w.start(setup.length.get());
    if !i.class.if_req(dev.info.nbr, setup, i.if_arg, &mut w) {
        return false;
    }
    match w.finish() {
        Ok(_) => true,
        Err(e) => {
            log::debug!("dev {}: interface request data stage: {}", dev.info.nbr, e);
            false
        }
    }
}

fn alt_set(dev: &mut Device, t: &mut Tables, cfg_nbr: u8, if_nbr: u8, iface: Ix<Interface>, alt_nbr: u8) -> bool {
    let new = match t.alt(iface, alt_nbr) {
        Some(alt) => alt,
        None => return false,
    };
    let cur_nbr = t.ifs[iface].alt_cur;
    if cur_nbr == alt_nbr {
        return true;
    }
    let cur = match t.alt(iface, cur_nbr) {
        Some(alt) => alt,
        None => return false,
    };

    alt_close(dev, t, cur);
    if alt_open(dev, t, if_nbr, new).is_err() {
        if let Err(e) = alt_open(dev, t, if_nbr, cur) {
            log::warn!("dev {}: if {} alt {} reopen failed: {}", dev.info.nbr, if_nbr, cur_nbr, e);
        }
        return false;
    }
    t.ifs[iface].alt_cur = alt_nbr;
    log::debug!("dev {}: if {} alt {}", dev.info.nbr, if_nbr, alt_nbr);

    let r = desc::if_ref(&dev.info, t, cfg_nbr, if_nbr, iface, alt_nbr);
    t.ifs[iface].class.alt_setting_update(&r);
    true
}

fn ep_req(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let ep_addr = setup.index.get() as u8;
    let is_ep0 = ep_addr & EP_NBR_MASK == 0;
    match (dev.info.state, is_ep0) {
        (DeviceState::Addressed, true) | (DeviceState::Configured, _) => {}
        _ => return false,
    }
    let dir_in = setup.direction() == UsbDir::In;

    match setup.standard_request() {
        Some(req @ (UsbSetupRequest::SetFeature | UsbSetupRequest::ClearFeature)) if !dir_in => {
            if setup.value.get() & 0xFF != FEATURE_SEL_ENDPOINT_HALT {
                return false;
            }
            if let Err(e) = dev.io.ep_stall(ep_addr, req == UsbSetupRequest::SetFeature) {
                log::debug!("dev {}: ep {:#04x} halt: {}", dev.info.nbr, ep_addr, e);
                return false;
            }
            if dev.info.state == DeviceState::Configured {
                ep_state_notify(dev, t, ep_addr);
            }
            true
        }
        Some(UsbSetupRequest::GetStatus) if dir_in => match dev.io.ep_is_stalled(ep_addr) {
            Ok(halted) => {
                let status = if halted { STATUS_HALT } else { 0 };
                tx(dev, setup, timeout_ms, &[status, 0])
            }
            Err(_) => false,
        },
        _ => false,
    }
}

/// Tells the class owning `ep_addr` that its halt state changed.
fn ep_state_notify(dev: &Device, t: &Tables, ep_addr: u8) {
    let if_nbr = match dev.info.ep_if_tbl[usize::from(ep_addr_to_phy(ep_addr))] {
        Some(if_nbr) => if_nbr,
        None => return,
    };
    if let Some((cfg_nbr, cfg)) = cfg_cur(dev) {
        if let Some(iface) = t.interface(cfg, if_nbr) {
            let r = desc::if_ref(&dev.info, t, cfg_nbr, if_nbr, iface, t.ifs[iface].alt_cur);
            t.ifs[iface].class.ep_state_update(&r, ep_addr);
        }
    }
}

/// Interface a class or vendor request is for: the interface number in
/// `wIndex`, or the owner of the endpoint in `wIndex`.
fn req_owner(dev: &Device, t: &Tables, setup: &UsbSetupPacket) -> Option<Ix<Interface>> {
    let (_, cfg) = cfg_cur(dev)?;
    let ix = setup.index.get() as u8;
    let if_nbr = match setup.recipient()? {
        UsbRecipient::Interface => ix,
        UsbRecipient::Endpoint => dev.info.ep_if_tbl[usize::from(ep_addr_to_phy(ix))]?,
        _ => return None,
    };
    t.interface(cfg, if_nbr)
}

fn class_req(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let iface = match req_owner(dev, t, setup) {
        Some(iface) => iface,
        None => return false,
    };
    let i = &t.ifs[iface];
    let mut ctrl = Ctrl::new(&mut dev.io, dev.info.state, timeout_ms);
    i.class.class_req(dev.info.nbr, setup, i.if_arg, &mut ctrl)
}

fn vendor_req(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket) -> bool {
    let iface = match req_owner(dev, t, setup) {
        Some(iface) => iface,
        None => return false,
    };
    let i = &t.ifs[iface];
    let mut ctrl = Ctrl::new(&mut dev.io, dev.info.state, timeout_ms);
    i.class.vendor_req(dev.info.nbr, setup, i.if_arg, &mut ctrl)
}

/// Microsoft OS feature descriptors. The feature is in `wIndex` and the
/// interface in the low byte of `wValue`. Compatible IDs are only served to
/// the device recipient.
fn ms_req(dev: &mut Device, t: &Tables, timeout_ms: u32, setup: &UsbSetupPacket, dev_recipient: bool) -> bool {
    if setup.direction() != UsbDir::In {
        return false;
    }
    let if_nbr = setup.value.get() as u8;
    let req_len = setup.length.get();
    let info = &dev.info;
    let mut w = DescWriter::ctrl(&mut dev.io, info.state, timeout_ms);
    let res = match setup.index.get() {
        MS_OS_FEATURE_COMPAT_ID if dev_recipient => desc::ms_compat_id_desc(&mut w, info, t, if_nbr, req_len),
        MS_OS_FEATURE_EXT_PROPERTIES => desc::ms_ext_prop_desc(&mut w, info, t, if_nbr, req_len),
        _ => Err(Error::InvalidArg),
    };
    match res {
        Ok(_) => true,
        Err(e) => {
            log::debug!("dev {}: MS OS feature {}: {}", info.nbr, setup.index.get(), e);
            false
        }
    }
}
