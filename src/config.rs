// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capacities, per-device identity, and the compile-time feature switches.

use crate::error::{Error, Result};

// Optional parts of the core. With a feature off, the corresponding
// operations report `NotSupported` or degrade to "no string" indices.
cfg_if::cfg_if! {
    if #[cfg(feature = "high-speed")] {
        pub const HS_EN: bool = true;
    } else {
        pub const HS_EN: bool = false;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "strings")] {
        pub const STR_EN: bool = true;
    } else {
        pub const STR_EN: bool = false;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "ms-os-desc")] {
        pub const MS_OS_EN: bool = true;
    } else {
        pub const MS_OS_EN: bool = false;
    }
}

/// Highest number handed out for configurations, interfaces, alternate
/// settings, groups, and endpoint descriptors within their parent.
pub const NBR_TOT: u8 = u8::MAX - 1;

/// Bus events a single controller can have in flight: connect, disconnect,
/// reset, suspend, resume, high-speed detect, and one setup.
pub const CORE_EVENT_BUS_NBR: usize = 7;

/// Bus power a configuration may claim, in mA.
pub const MAX_BUS_PWR_LIMIT_MA: u16 = 500;

pub const STD_REQ_TIMEOUT_DFLT_MS: u32 = 5000;

/// Sizes of the tables allocated once by `UsbdContext::new`.
///
/// Every count is a total across all devices except `str_qty` and
/// `ep_open_qty`, which are per device.
#[derive(Copy, Clone, Debug)]
pub struct QtyCfg {
    pub dev_qty: u8,
    pub config_qty: u8,
    pub if_qty: u8,
    pub if_alt_qty: u8,
    pub if_grp_qty: u8,
    pub ep_desc_qty: u8,
    pub str_qty: u8,
    /// Endpoints a driver can have open at once, control pair included.
    pub ep_open_qty: u8,
    /// Headroom in the event pool for drivers that queue extra transfers.
    pub urb_extra_qty: u16,
}

impl QtyCfg {
    pub fn validate(&self) -> Result<()> {
        let ok = self.config_qty >= 1
            && self.dev_qty >= 1
            && self.dev_qty < NBR_TOT
            && self.ep_desc_qty >= 1
            && self.if_qty >= 1
            && self.if_alt_qty >= self.if_qty
            && self.str_qty <= 100
            && self.ep_open_qty >= 2;
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidArg)
        }
    }

    /// Records in the shared event pool: a full set of bus events plus one
    /// completion per open endpoint for every device, plus the headroom.
    pub fn event_pool_len(&self) -> usize {
        let dev = usize::from(self.dev_qty);
        CORE_EVENT_BUS_NBR * dev + usize::from(self.ep_open_qty) * dev + usize::from(self.urb_extra_qty)
    }
}

/// What the device says about itself in its device descriptor.
#[derive(Copy, Clone, Debug)]
pub struct DevCfg {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device release number, BCD.
    pub device_bcd: u16,
    pub manufacturer: Option<&'static str>,
    pub product: Option<&'static str>,
    pub serial_nbr: Option<&'static str>,
    /// Returned by string descriptor 0.
    pub lang_id: u16,
}

/// Bus speed, as negotiated during reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Speed {
    Low,
    Full,
    High,
}

/// Visible USB device states, USB 2.0 section 9.1.1, plus the two states a
/// device goes through before it reaches the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Added but the driver hasn't been initialized.
    None,
    /// Driver initialized and started, waiting for a connection.
    Init,
    Attached,
    Default,
    Addressed,
    Configured,
    Suspended,
}

impl DeviceState {
    /// States in which the topology may still change.
    pub fn is_building(self) -> bool {
        matches!(self, Self::None | Self::Init)
    }

    /// States in which EP0 carries requests.
    pub fn is_enumerating(self) -> bool {
        matches!(self, Self::Default | Self::Addressed | Self::Configured)
    }
}
