// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB device core.
//!
//! This crate sits between a USB device controller driver and the class
//! drivers (CDC, HID, audio, vendor...) that give a device its function. It
//! owns the things every device has in common:
//!
//! - The device topology: configurations, interfaces, alternate settings,
//!   interface groups and endpoints, declared up front through
//!   `UsbdContext` and assigned to physical endpoints as they're added.
//! - Descriptor generation from that topology, including string
//!   descriptors and the Microsoft OS 1.0 descriptors.
//! - The device state machine and the standard requests on EP0, with class
//!   and vendor requests routed to whichever class owns the recipient.
//!
//! Controller drivers implement `Driver` and report bus and transfer events
//! from interrupt context through an `EventQueue`. The application drains
//! that queue from a task by calling `UsbdContext::process`.
//!
//! Optional parts are behind cargo features: `high-speed`, `strings`, and
//! `ms-os-desc`, all on by default.

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod class;
mod config;
mod context;
mod ctrl;
mod desc;
mod driver;
mod ep_alloc;
mod error;
mod event;
pub mod proto;
mod stdreq;
mod tables;
mod topology;

#[cfg(test)]
mod test_support;

pub use crate::class::{
    ClassArg, ClassDriver, EpDescriptors, IfDescriptors, IfRef, MsCompatId, MsExtProperty, MsSubCompatId,
    MS_PROP_TYPE_BINARY, MS_PROP_TYPE_DWORD_BE, MS_PROP_TYPE_DWORD_LE, MS_PROP_TYPE_EXPAND_SZ, MS_PROP_TYPE_LINK,
    MS_PROP_TYPE_MULTI_SZ, MS_PROP_TYPE_SZ,
};
pub use crate::config::{
    DevCfg, DeviceState, QtyCfg, Speed, HS_EN, MAX_BUS_PWR_LIMIT_MA, MS_OS_EN, STD_REQ_TIMEOUT_DFLT_MS, STR_EN,
};
pub use crate::context::UsbdContext;
pub use crate::ctrl::{Ctrl, DESC_BUF_LEN};
pub use crate::desc::{DescWriter, DEV_ATTRIB_REMOTE_WAKEUP, DEV_ATTRIB_SELF_POWERED, MS_OS_STR_IX};
pub use crate::driver::{BusEvents, Driver, EpCapability, EpCaps};
pub use crate::ep_alloc::{interval_exp_decode, INTERVAL_EXP_MAX, INTERVAL_FS_MAX};
pub use crate::error::{Error, Result};
pub use crate::event::{CoreEvent, EventQueue};
pub use crate::tables::CONFIG_NBR_SPD_BIT;
pub use crate::topology::ClassCodes;
