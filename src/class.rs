// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the core expects from the class drivers that own its interfaces.
//!
//! Every hook has a default that does nothing or declines the request, so a
//! class only implements what it cares about. Class-specific descriptors come
//! in pairs (the bytes and their size) and are provided through a separate
//! trait, so a class can't supply one without the other.

use crate::ctrl::Ctrl;
use crate::desc::DescWriter;
use crate::proto::UsbSetupPacket;

/// Opaque per-interface or per-setting value the class registered with the
/// core, handed back on every callback.
pub type ClassArg = usize;

/// Identifies the interface setting a callback is about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IfRef {
    pub dev_nbr: u8,
    /// Configuration number with the speed bit.
    pub cfg_nbr: u8,
    pub if_nbr: u8,
    pub alt_nbr: u8,
    pub if_arg: ClassArg,
    pub alt_arg: ClassArg,
}

/// Class-specific interface descriptors, written right after the standard
/// interface descriptor of each alternate setting.
pub trait IfDescriptors {
    fn if_desc(&self, r: &IfRef, w: &mut DescWriter<'_>);
    /// Must match what `if_desc` writes for the same setting.
    fn if_desc_size(&self, r: &IfRef) -> u16;
}

/// Class-specific endpoint descriptors, written right after each standard
/// endpoint descriptor.
pub trait EpDescriptors {
    fn ep_desc(&self, r: &IfRef, ep_addr: u8, w: &mut DescWriter<'_>);
    fn ep_desc_size(&self, r: &IfRef, ep_addr: u8) -> u16;
}

pub trait ClassDriver {
    /// The configuration holding this interface became active.
    fn conn(&self, _dev_nbr: u8, _cfg_nbr: u8, _if_arg: ClassArg) {}

    fn disconn(&self, _dev_nbr: u8, _cfg_nbr: u8, _if_arg: ClassArg) {}

    /// The host picked another alternate setting; its endpoints are open.
    fn alt_setting_update(&self, _r: &IfRef) {}

    /// An endpoint of the interface was halted or un-halted by the host.
    fn ep_state_update(&self, _r: &IfRef, _ep_addr: u8) {}

    fn if_descriptors(&self) -> Option<&dyn IfDescriptors> {
        None
    }

    fn ep_descriptors(&self) -> Option<&dyn EpDescriptors> {
        None
    }

    /// Standard requests addressed to the interface that the core doesn't
    /// handle itself, such as GET_DESCRIPTOR for a HID report. Returns
    /// whether the request was accepted.
    fn if_req(&self, _dev_nbr: u8, _setup: &UsbSetupPacket, _if_arg: ClassArg, _w: &mut DescWriter<'_>) -> bool {
        false
    }

    fn class_req(&self, _dev_nbr: u8, _setup: &UsbSetupPacket, _if_arg: ClassArg, _ctrl: &mut Ctrl<'_>) -> bool {
        false
    }

    fn vendor_req(&self, _dev_nbr: u8, _setup: &UsbSetupPacket, _if_arg: ClassArg, _ctrl: &mut Ctrl<'_>) -> bool {
        false
    }

    /// Compatible ID this interface reports in the Microsoft OS descriptor.
    fn ms_compat_id(&self, _dev_nbr: u8, _if_arg: ClassArg) -> Option<(MsCompatId, MsSubCompatId)> {
        None
    }

    fn ms_ext_properties(&self, _dev_nbr: u8, _if_arg: ClassArg) -> &[MsExtProperty] {
        &[]
    }
}

/// Compatible IDs Windows knows drivers for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsCompatId {
    Null,
    Rndis,
    Ptp,
    Mtp,
    Xusb20,
    Bluetooth,
    WinUsb,
}

impl MsCompatId {
    pub fn id(self) -> [u8; 8] {
        match self {
            Self::Null => [0; 8],
            Self::Rndis => *b"RNDIS\0\0\0",
            Self::Ptp => *b"PTP\0\0\0\0\0",
            Self::Mtp => *b"MTP\0\0\0\0\0",
            Self::Xusb20 => *b"XUSB20\0\0",
            Self::Bluetooth => *b"BLUTUTH\0",
            Self::WinUsb => *b"WINUSB\0\0",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsSubCompatId {
    Null,
    Bt11,
    Bt12,
    BtEdr,
}

impl MsSubCompatId {
    pub fn id(self) -> [u8; 8] {
        match self {
            Self::Null => [0; 8],
            Self::Bt11 => *b"11\0\0\0\0\0\0",
            Self::Bt12 => *b"12\0\0\0\0\0\0",
            Self::BtEdr => *b"EDR\0\0\0\0\0",
        }
    }
}

/// Registry value types of an extended property.
pub const MS_PROP_TYPE_SZ: u32 = 1;
pub const MS_PROP_TYPE_EXPAND_SZ: u32 = 2;
pub const MS_PROP_TYPE_BINARY: u32 = 3;
pub const MS_PROP_TYPE_DWORD_LE: u32 = 4;
pub const MS_PROP_TYPE_DWORD_BE: u32 = 5;
pub const MS_PROP_TYPE_LINK: u32 = 6;
pub const MS_PROP_TYPE_MULTI_SZ: u32 = 7;

/// One registry value of the Extended Properties descriptor. `name` and
/// `data` are sent as is, so strings must already be UTF-16LE with their
/// terminating NUL.
#[derive(Copy, Clone, Debug)]
pub struct MsExtProperty {
    pub prop_type: u32,
    pub name: &'static [u8],
    pub data: &'static [u8],
}
