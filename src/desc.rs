// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor generation.
//!
//! Descriptors are never stored. Each request walks the device tree and
//! streams the bytes through a `DescWriter`, which either stages them in the
//! device's EP0 buffer and sends each full buffer as it goes, or fills a
//! caller-provided slice. Either way writing stops silently once the host's
//! `wLength` is reached, which is how descriptors get truncated.

use byteorder::LittleEndian;
use zerocopy::{AsBytes, U16};

use crate::class::{IfRef, MsExtProperty};
use crate::config::{DeviceState, HS_EN, MS_OS_EN, STR_EN};
use crate::ctrl::{DevIo, DESC_BUF_LEN};
use crate::error::{Error, Result};
use crate::proto::{
    UsbAudioEndpointDescriptor, UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor,
    UsbDeviceQualifierDescriptor, UsbEndpointDescriptor, UsbIfAssocDescriptor, UsbInterfaceDescriptor,
    UsbTransferType, BCD_USB_2_0, CLASS_CODE_AUDIO, CLASS_CODE_MISCELLANEOUS, CLASS_CODE_USE_IF_DESC,
    CONFIG_DESC_REMOTE_WAKEUP, CONFIG_DESC_RSVD_SET, CONFIG_DESC_SELF_POWERED, DESC_LEN_CFG, DESC_LEN_DEV,
    DESC_LEN_DEV_QUAL, DESC_LEN_EP, DESC_LEN_EP_AUDIO, DESC_LEN_IAD, DESC_LEN_IF, PROTOCOL_CODE_USE_IAD,
    SUBCLASS_CODE_USE_COMMON_CLASS,
};
use crate::tables::{Config, DevInfo, EpInfo, Interface, Ix, Tables, CONFIG_NBR_SPD_BIT};

/// `attrib` flags of a configuration.
pub const DEV_ATTRIB_SELF_POWERED: u8 = 0x01;
pub const DEV_ATTRIB_REMOTE_WAKEUP: u8 = 0x02;

/// String index Windows probes for the Microsoft OS string descriptor.
pub const MS_OS_STR_IX: u8 = 0xEE;
const MS_OS_STR_LEN: u8 = 18;
const MS_OS_SIGNATURE: &[u8; 7] = b"MSFT100";
const MS_OS_DESC_VER_1_0: u16 = 0x0100;
pub const MS_OS_FEATURE_COMPAT_ID: u16 = 4;
pub const MS_OS_FEATURE_EXT_PROPERTIES: u16 = 5;
const MS_OS_COMPAT_ID_HDR_LEN: u32 = 16;
const MS_OS_COMPAT_ID_SECTION_LEN: u32 = 24;
const MS_OS_EXT_PROP_HDR_LEN: u32 = 10;
/// Fixed part of a property section: size, type, name length, data length.
const MS_OS_EXT_PROP_SECTION_FIXED_LEN: u32 = 14;

enum Sink<'a> {
    /// Answering a request: full buffers go out on EP0.
    Ctrl {
        io: &'a mut DevIo,
        state: DeviceState,
        timeout_ms: u32,
    },
    /// Building into memory for a class driver.
    Buf(&'a mut [u8]),
}

/// Streams descriptor bytes, at most as many as were asked for.
///
/// The first failure sticks: later writes do nothing and `finish` reports
/// it.
pub struct DescWriter<'a> {
    sink: Sink<'a>,
    ix: usize,
    remaining: u16,
    sent: usize,
    err: Option<Error>,
}

impl<'a> DescWriter<'a> {
    pub(crate) fn ctrl(io: &'a mut DevIo, state: DeviceState, timeout_ms: u32) -> Self {
        Self {
            sink: Sink::Ctrl { io, state, timeout_ms },
            ix: 0,
            remaining: 0,
            sent: 0,
            err: None,
        }
    }

    pub(crate) fn buf(buf: &'a mut [u8]) -> Self {
        Self {
            sink: Sink::Buf(buf),
            ix: 0,
            remaining: 0,
            sent: 0,
            err: None,
        }
    }

    /// Begins a descriptor that may be up to `req_len` bytes long.
    pub(crate) fn start(&mut self, req_len: u16) {
        self.ix = 0;
        self.sent = 0;
        self.remaining = req_len;
    }

    fn cap(&self) -> usize {
        match &self.sink {
            Sink::Ctrl { .. } => DESC_BUF_LEN,
            Sink::Buf(buf) => buf.len(),
        }
    }

    pub fn wr08(&mut self, val: u8) {
        self.wr(&[val]);
    }

    pub fn wr16(&mut self, val: u16) {
        self.wr(&val.to_le_bytes());
    }

    pub fn wr24(&mut self, val: u32) {
        self.wr(&val.to_le_bytes()[..3]);
    }

    pub fn wr32(&mut self, val: u32) {
        self.wr(&val.to_le_bytes());
    }

    pub fn wr(&mut self, mut data: &[u8]) {
        if self.err.is_some() {
            return;
        }
        while self.remaining != 0 && !data.is_empty() {
            let cap = self.cap();
            if self.ix >= cap {
                match &mut self.sink {
                    Sink::Ctrl { io, state, timeout_ms } => {
                        match io.ctrl_tx_buf(*state, DESC_BUF_LEN, false, *timeout_ms) {
                            Ok(_) => {
                                self.sent += self.ix;
                                self.ix = 0;
                            }
                            Err(e) => {
                                self.err = Some(e);
                                return;
                            }
                        }
                    }
                    Sink::Buf(_) => {
                        self.remaining = 0;
                        self.err = Some(Error::Alloc);
                        return;
                    }
                }
                continue;
            }
            let n = (cap - self.ix).min(data.len()).min(usize::from(self.remaining));
            let dst = match &mut self.sink {
                Sink::Ctrl { io, .. } => &mut io.buf[..],
                Sink::Buf(buf) => &mut buf[..],
            };
            dst[self.ix..self.ix + n].copy_from_slice(&data[..n]);
            self.ix += n;
            self.remaining -= n as u16;
            data = &data[n..];
        }
    }

    /// Pending error, if any write has failed.
    pub fn error(&self) -> Option<Error> {
        self.err
    }

    /// Sends what's left in the buffer and returns the descriptor length
    /// produced. A descriptor shorter than requested that ends on a packet
    /// boundary is terminated with a zero-length packet.
    pub(crate) fn finish(&mut self) -> Result<usize> {
        if let Some(e) = self.err {
            return Err(e);
        }
        if let Sink::Ctrl { io, state, timeout_ms } = &mut self.sink {
            if self.ix > 0 {
                let short = self.remaining > 0;
                if let Err(e) = io.ctrl_tx_buf(*state, self.ix, short, *timeout_ms) {
                    self.err = Some(e);
                    return Err(e);
                }
            }
        }
        Ok(self.sent + self.ix)
    }
}

fn any_grp(info: &DevInfo, t: &Tables, spd_bit: u8) -> bool {
    info.configs(spd_bit).iter().any(|&c| !t.cfgs[c].grps.is_empty())
}

fn dev_class(info: &DevInfo, t: &Tables, spd_bit: u8) -> (u8, u8, u8) {
    if any_grp(info, t, spd_bit) {
        (CLASS_CODE_MISCELLANEOUS, SUBCLASS_CODE_USE_COMMON_CLASS, PROTOCOL_CODE_USE_IAD)
    } else {
        (CLASS_CODE_USE_IF_DESC, 0, 0)
    }
}

pub(crate) fn dev_desc(w: &mut DescWriter<'_>, info: &DevInfo, t: &Tables, req_len: u16) -> Result<usize> {
    let spd_bit = info.spd_bit();
    let (class, sub, proto) = dev_class(info, t, spd_bit);
    let desc = UsbDeviceDescriptor {
        length: DESC_LEN_DEV,
        descriptor_type: UsbDescType::Device,
        bcd_usb: U16::new(BCD_USB_2_0),
        device_class: class,
        device_subclass: sub,
        device_protocol: proto,
        max_packet_size0: info.ep0_max,
        vendor: U16::new(info.cfg.vendor_id),
        product: U16::new(info.cfg.product_id),
        bcd_device: U16::new(info.cfg.device_bcd),
        manufacturer_s: info.str_ix(info.cfg.manufacturer),
        product_s: info.str_ix(info.cfg.product),
        serial_s: info.str_ix(info.cfg.serial_nbr),
        num_configurations: info.configs(spd_bit).len() as u8,
    };
    w.start(req_len);
    w.wr(desc.as_bytes());
    w.finish()
}

/// The device descriptor as it would read at the other speed.
pub(crate) fn qualifier_desc(w: &mut DescWriter<'_>, info: &DevInfo, t: &Tables, req_len: u16) -> Result<usize> {
    if !HS_EN || !info.hs_capable {
        return Err(Error::InvalidArg);
    }
    let other_bit = info.spd_bit() ^ CONFIG_NBR_SPD_BIT;
    let (class, sub, proto) = dev_class(info, t, other_bit);
    let desc = UsbDeviceQualifierDescriptor {
        length: DESC_LEN_DEV_QUAL,
        descriptor_type: UsbDescType::DeviceQualifier,
        bcd_usb: U16::new(BCD_USB_2_0),
        device_class: class,
        device_subclass: sub,
        device_protocol: proto,
        max_packet_size0: info.ep0_max,
        num_configurations: info.configs(other_bit).len() as u8,
        reserved: 0,
    };
    w.start(req_len);
    w.wr(desc.as_bytes());
    w.finish()
}

/// Audio 1.0 isochronous and interrupt endpoints carry two extra fields.
fn audio_ep(iface: &Interface, ep: &EpInfo) -> bool {
    iface.class_code == CLASS_CODE_AUDIO
        && iface.class_protocol_code == 0
        && matches!(
            UsbTransferType::of_attrib(ep.attrib),
            UsbTransferType::Isochronous | UsbTransferType::Interrupt
        )
}

pub(crate) fn if_ref(info: &DevInfo, t: &Tables, cfg_nbr: u8, if_nbr: u8, iface: Ix<Interface>, alt_nbr: u8) -> IfRef {
    let i = &t.ifs[iface];
    IfRef {
        dev_nbr: info.nbr,
        cfg_nbr,
        if_nbr,
        alt_nbr,
        if_arg: i.if_arg,
        alt_arg: t.alts[i.alts[usize::from(alt_nbr)]].alt_arg,
    }
}

/// Sum of everything `config_desc` will write for `cfg`.
pub(crate) fn config_desc_len(info: &DevInfo, t: &Tables, cfg: Ix<Config>, cfg_nbr: u8) -> u16 {
    let c = &t.cfgs[cfg];
    let mut len = u32::from(DESC_LEN_CFG);
    let mut grp_cur = None;
    for (if_nbr, &iface) in c.ifs.iter().enumerate() {
        let i = &t.ifs[iface];
        if i.grp.is_some() && i.grp != grp_cur {
            len += u32::from(DESC_LEN_IAD);
            grp_cur = i.grp;
        }
        for (alt_nbr, &alt) in i.alts.iter().enumerate() {
            let r = if_ref(info, t, cfg_nbr, if_nbr as u8, iface, alt_nbr as u8);
            len += u32::from(DESC_LEN_IF);
            if let Some(d) = i.class.if_descriptors() {
                len += u32::from(d.if_desc_size(&r));
            }
            for &ep in t.alts[alt].eps.iter() {
                let e = &t.eps[ep];
                len += u32::from(DESC_LEN_EP);
                if audio_ep(i, e) {
                    len += u32::from(DESC_LEN_EP_AUDIO - DESC_LEN_EP);
                }
                if let Some(d) = i.class.ep_descriptors() {
                    len += u32::from(d.ep_desc_size(&r, e.addr));
                }
            }
        }
    }
    len as u16
}

/// Configuration descriptor `cfg_ix` of the current speed, or with `other`
/// set, the configuration linked to it at the other speed.
pub(crate) fn config_desc(
    w: &mut DescWriter<'_>,
    info: &DevInfo,
    t: &Tables,
    cfg_ix: u8,
    other: bool,
    req_len: u16,
) -> Result<usize> {
    if cfg_ix & CONFIG_NBR_SPD_BIT != 0 {
        return Err(Error::InvalidArg);
    }
    let mut cfg_nbr = cfg_ix | info.spd_bit();
    let mut cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
    if other {
        if !HS_EN {
            return Err(Error::InvalidArg);
        }
        cfg_nbr = t.cfgs[cfg].other_speed.ok_or(Error::InvalidArg)?;
        cfg = info.config(cfg_nbr).ok_or(Error::InvalidArg)?;
    }
    let c = &t.cfgs[cfg];

    let mut attrib = CONFIG_DESC_RSVD_SET;
    if c.attrib & DEV_ATTRIB_SELF_POWERED != 0 {
        attrib |= CONFIG_DESC_SELF_POWERED;
    }
    if c.attrib & DEV_ATTRIB_REMOTE_WAKEUP != 0 {
        attrib |= CONFIG_DESC_REMOTE_WAKEUP;
    }
    let hdr = UsbConfigurationDescriptor {
        length: DESC_LEN_CFG,
        descriptor_type: if other {
            UsbDescType::OtherSpeedConfig
        } else {
            UsbDescType::Config
        },
        total_length: U16::new(config_desc_len(info, t, cfg, cfg_nbr)),
        num_interfaces: c.ifs.len() as u8,
        configuration_value: cfg_ix + 1,
        configuration_s: info.str_ix(c.name),
        attributes: attrib,
        max_power: ((c.max_pwr + 1) / 2) as u8,
    };
    w.start(req_len);
    w.wr(hdr.as_bytes());

    let mut grp_cur = None;
    for (if_nbr, &iface) in c.ifs.iter().enumerate() {
        let if_nbr = if_nbr as u8;
        let i = &t.ifs[iface];
        if let Some(g) = i.grp {
            if grp_cur != Some(g) {
                let grp = &t.grps[c.grps[usize::from(g)]];
                let iad = UsbIfAssocDescriptor {
                    length: DESC_LEN_IAD,
                    descriptor_type: UsbDescType::IfAssociation,
                    first_interface: grp.if_start,
                    interface_count: grp.if_cnt,
                    function_class: grp.class_code,
                    function_subclass: grp.class_sub_code,
                    function_protocol: grp.class_protocol_code,
                    function_s: info.str_ix(grp.name),
                };
                w.wr(iad.as_bytes());
                grp_cur = Some(g);
            }
        }

        for (alt_nbr, &alt) in i.alts.iter().enumerate() {
            let a = &t.alts[alt];
            let r = if_ref(info, t, cfg_nbr, if_nbr, iface, alt_nbr as u8);
            let ifd = UsbInterfaceDescriptor {
                length: DESC_LEN_IF,
                descriptor_type: UsbDescType::Interface,
                interface_number: if_nbr,
                alternate_setting: alt_nbr as u8,
                num_endpoints: a.eps.len() as u8,
                interface_class: i.class_code,
                interface_subclass: i.class_sub_code,
                interface_protocol: i.class_protocol_code,
                interface_s: info.str_ix(a.name),
            };
            w.wr(ifd.as_bytes());
            if let Some(d) = i.class.if_descriptors() {
                d.if_desc(&r, w);
            }

            for &ep in a.eps.iter() {
                let e = &t.eps[ep];
                if audio_ep(i, e) {
                    let epd = UsbAudioEndpointDescriptor {
                        length: DESC_LEN_EP_AUDIO,
                        descriptor_type: UsbDescType::Endpoint,
                        endpoint_address: e.addr,
                        attributes: e.attrib,
                        max_packet_size: U16::<LittleEndian>::new(e.max_pkt),
                        interval: e.interval,
                        refresh: e.sync_refresh,
                        synch_address: e.sync_addr,
                    };
                    w.wr(epd.as_bytes());
                } else {
                    let epd = UsbEndpointDescriptor {
                        length: DESC_LEN_EP,
                        descriptor_type: UsbDescType::Endpoint,
                        endpoint_address: e.addr,
                        attributes: e.attrib,
                        max_packet_size: U16::<LittleEndian>::new(e.max_pkt),
                        interval: e.interval,
                    };
                    w.wr(epd.as_bytes());
                }
                if let Some(d) = i.class.ep_descriptors() {
                    d.ep_desc(&r, e.addr, w);
                }
            }
        }
    }
    w.finish()
}

/// String descriptor `ix`. Index 0 is the language ID list. Text that would
/// overflow the 8-bit length field is cut at the largest even length.
pub(crate) fn str_desc(w: &mut DescWriter<'_>, info: &DevInfo, ix: u8, req_len: u16) -> Result<usize> {
    if !STR_EN {
        return Err(Error::NotSupported);
    }
    w.start(req_len);
    match ix {
        0 => {
            w.wr08(4);
            w.wr08(UsbDescType::String as u8);
            w.wr16(info.cfg.lang_id);
        }
        MS_OS_STR_IX if MS_OS_EN && info.ms_vendor_code.is_some() => {
            w.wr08(MS_OS_STR_LEN);
            w.wr08(UsbDescType::String as u8);
            for &c in MS_OS_SIGNATURE.iter() {
                w.wr16(u16::from(c));
            }
            w.wr08(info.ms_vendor_code.unwrap_or(0));
            w.wr08(0);
        }
        _ => {
            let s = info.str_get(ix - 1).ok_or(Error::NotFound)?;
            let units = s.encode_utf16().count();
            let len = (2 * units + 2).min(usize::from(u8::MAX)) & !1;
            w.wr08(len as u8);
            w.wr08(UsbDescType::String as u8);
            for u in s.encode_utf16().take((len - 2) / 2) {
                w.wr16(u);
            }
        }
    }
    w.finish()
}

/// Microsoft OS 1.0 Compatible ID descriptor, feature 4. `if_nbr` 0 covers
/// every interface of the first configuration; any other value only that
/// interface.
pub(crate) fn ms_compat_id_desc(
    w: &mut DescWriter<'_>,
    info: &DevInfo,
    t: &Tables,
    if_nbr: u8,
    req_len: u16,
) -> Result<usize> {
    let cfg = info.config(info.spd_bit()).ok_or(Error::InvalidArg)?;
    let ifs = &t.cfgs[cfg].ifs;
    let range = if if_nbr == 0 {
        0..ifs.len()
    } else {
        usize::from(if_nbr)..usize::from(if_nbr) + 1
    };
    if range.end > ifs.len() {
        return Err(Error::InvalidArg);
    }

    let compat = |n: usize| {
        let i = &t.ifs[ifs[n]];
        i.class.ms_compat_id(info.nbr, i.if_arg)
    };
    let section_cnt = range.clone().filter(|&n| compat(n).is_some()).count() as u32;
    let desc_len = MS_OS_COMPAT_ID_HDR_LEN + MS_OS_COMPAT_ID_SECTION_LEN * section_cnt;

    w.start(req_len.min(desc_len as u16));
    w.wr32(desc_len);
    w.wr16(MS_OS_DESC_VER_1_0);
    w.wr16(MS_OS_FEATURE_COMPAT_ID);
    w.wr08(section_cnt as u8);
    w.wr(&[0; 7]);
    if req_len != MS_OS_COMPAT_ID_HDR_LEN as u16 {
        for n in range {
            if let Some((id, sub)) = compat(n) {
                w.wr08(n as u8);
                w.wr08(0x01);
                w.wr(&id.id());
                w.wr(&sub.id());
                w.wr(&[0; 6]);
            }
        }
    }
    w.finish()
}

fn ext_prop_len(p: &MsExtProperty) -> u32 {
    MS_OS_EXT_PROP_SECTION_FIXED_LEN + p.name.len() as u32 + p.data.len() as u32
}

/// Microsoft OS 1.0 Extended Properties descriptor, feature 5, for
/// interface `if_nbr` of the first configuration.
pub(crate) fn ms_ext_prop_desc(
    w: &mut DescWriter<'_>,
    info: &DevInfo,
    t: &Tables,
    if_nbr: u8,
    req_len: u16,
) -> Result<usize> {
    let cfg = info.config(info.spd_bit()).ok_or(Error::InvalidArg)?;
    let iface = t.interface(cfg, if_nbr).ok_or(Error::InvalidArg)?;
    let i = &t.ifs[iface];
    let props = i.class.ms_ext_properties(info.nbr, i.if_arg);
    let desc_len = MS_OS_EXT_PROP_HDR_LEN + props.iter().map(ext_prop_len).sum::<u32>();

    w.start(req_len.min(desc_len as u16));
    w.wr32(desc_len);
    w.wr16(MS_OS_DESC_VER_1_0);
    w.wr16(MS_OS_FEATURE_EXT_PROPERTIES);
    w.wr16(props.len() as u16);
    if req_len != MS_OS_EXT_PROP_HDR_LEN as u16 {
        for p in props {
            w.wr32(ext_prop_len(p));
            w.wr32(p.prop_type);
            w.wr16(p.name.len() as u16);
            w.wr(p.name);
            w.wr32(p.data.len() as u32);
            w.wr(p.data);
        }
    }
    w.finish()
}
