// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB structure and constant definitions.
//!
//! These are the on-the-wire shapes from chapter 9 of USB 2.0:
//! the SETUP packet, the standard request codes, and the
//! fixed-layout descriptors the core emits. Multi-byte fields are
//! little-endian on the bus, which is what `U16<LittleEndian>` gives us
//! regardless of the CPU.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U16};

/// USB deals in two different transfer directions, called OUT (host-to-device)
/// and IN (device-to-host). In the vast majority of cases, OUT is represented
/// by a 0 byte, and IN by an `0x80` byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Endpoint number bits of an endpoint address.
pub const EP_NBR_MASK: u8 = 0x0F;

pub const EP_ADDR_CTRL_OUT: u8 = UsbDir::Out.endpoint(0);
pub const EP_ADDR_CTRL_IN: u8 = UsbDir::In.endpoint(0);

/// Drivers expose endpoints as a flat array of physical slots where OUT and
/// IN halves of the same endpoint number sit next to each other.
pub const EP_MAX_PHY_NBR: usize = 32;

pub const fn ep_addr_to_phy(addr: u8) -> u8 {
    let dir = if addr & UsbDir::In as u8 != 0 { 1 } else { 0 };
    (addr & EP_NBR_MASK) * 2 + dir
}

pub const fn ep_phy_to_addr(phy: u8) -> u8 {
    let dir = if phy & 1 != 0 { UsbDir::In } else { UsbDir::Out };
    dir.endpoint(phy / 2)
}

/// Bits 6:5 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbReqType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Bits 4:0 of `bmRequestType`. Values above `Other` are reserved and
/// decode to `None`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbRecipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Layout of an 8-byte USB SETUP packet.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// Direction, type and recipient, packed. Use the accessor methods rather
    /// than poking at the bits.
    pub request_type: u8,
    /// Request. Standard setup requests are in the `UsbSetupRequest` enum.
    /// Class and vendor requests define their own codes.
    pub request: u8,
    /// A simple argument of up to 16 bits, specific to the request.
    pub value: U16<LittleEndian>,
    /// Usually an interface number or endpoint address in the low byte.
    pub index: U16<LittleEndian>,
    /// If data will be transferred after this request (in the direction given
    /// by `request_type`), this gives the number of bytes (OUT) or maximum
    /// number of bytes (IN).
    pub length: U16<LittleEndian>,
}

impl UsbSetupPacket {
    pub const LEN: usize = 8;

    /// Reinterprets the raw bytes the controller captured.
    pub fn parse(raw: &[u8; Self::LEN]) -> Self {
        match LayoutVerified::<_, UsbSetupPacket>::new_unaligned(&raw[..]) {
            Some(lv) => *lv.into_ref(),
            // Eight bytes with alignment 1 always fit.
            None => Self::default(),
        }
    }

    pub fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value: U16::new(value),
            index: U16::new(index),
            length: U16::new(length),
        }
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn req_type(&self) -> UsbReqType {
        match UsbReqType::from_u8((self.request_type >> 5) & 0x03) {
            Some(t) => t,
            None => UsbReqType::Reserved,
        }
    }

    pub fn recipient(&self) -> Option<UsbRecipient> {
        UsbRecipient::from_u8(self.request_type & 0x1F)
    }

    pub fn standard_request(&self) -> Option<UsbSetupRequest> {
        UsbSetupRequest::from_u8(self.request)
    }
}

/// The standard USB SETUP requests.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbSetupRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    /// Notifies the device that it's being moved to a different address on the
    /// bus. Always an OUT.
    SetAddress = 0x05,
    /// Asks the device to send a certain descriptor back to the host. Always
    /// used on an IN request.
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    /// Configures a device by choosing one of the options listed in its
    /// descriptors. Always an OUT.
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Feature selectors for SET_FEATURE / CLEAR_FEATURE.
pub const FEATURE_SEL_ENDPOINT_HALT: u16 = 0;
pub const FEATURE_SEL_DEVICE_REMOTE_WAKEUP: u16 = 1;

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfig = 0x07,
    InterfacePower = 0x08,
    IfAssociation = 0x0B,
}

/// Types of transfer, as found in the bottom two bits of an endpoint's
/// `attributes`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl UsbTransferType {
    pub fn of_attrib(attrib: u8) -> Self {
        match attrib & EP_TYPE_MASK {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }
}

pub const EP_TYPE_MASK: u8 = 0x03;

/// Isochronous synchronization type, bits 3:2 of `attributes`.
pub const EP_SYNC_MASK: u8 = 0x0C;
pub const EP_SYNC_NONE: u8 = 0x00;
pub const EP_SYNC_ASYNC: u8 = 0x04;
pub const EP_SYNC_ADAPTIVE: u8 = 0x08;
pub const EP_SYNC_SYNC: u8 = 0x0C;

/// Isochronous usage type, bits 5:4 of `attributes`.
pub const EP_USAGE_MASK: u8 = 0x30;
pub const EP_USAGE_DATA: u8 = 0x00;
pub const EP_USAGE_FEEDBACK: u8 = 0x10;
pub const EP_USAGE_IMPLICIT_FEEDBACK: u8 = 0x20;

/// Bits 12:11 of a high-speed `wMaxPacketSize`: additional transactions per
/// microframe.
pub const EP_MAX_PKT_TRANS_MASK: u16 = 0x1800;
pub const EP_MAX_PKT_SIZE_MASK: u16 = 0x07FF;

pub const CLASS_CODE_USE_IF_DESC: u8 = 0x00;
pub const CLASS_CODE_AUDIO: u8 = 0x01;
pub const CLASS_CODE_MISCELLANEOUS: u8 = 0xEF;
pub const SUBCLASS_CODE_USE_COMMON_CLASS: u8 = 0x02;
pub const PROTOCOL_CODE_USE_IAD: u8 = 0x01;

/// `bmAttributes` bits of a configuration descriptor.
pub const CONFIG_DESC_RSVD_SET: u8 = 0x80;
pub const CONFIG_DESC_SELF_POWERED: u8 = 0x40;
pub const CONFIG_DESC_REMOTE_WAKEUP: u8 = 0x20;

/// Version of the USB protocol we claim, in binary-coded decimal.
pub const BCD_USB_2_0: u16 = 0x0200;

/// Describes a device. This is the most broad description in USB and is
/// typically the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    /// Length of this structure, must be 18.
    pub length: u8,
    /// Type of this descriptor, must be `Device`.
    pub descriptor_type: UsbDescType,
    /// Version of the device descriptor / USB protocol, in binary-coded
    /// decimal.
    pub bcd_usb: U16<LittleEndian>,
    /// Class of device, giving a broad functional area.
    pub device_class: u8,
    /// Subclass of device, refining the class.
    pub device_subclass: u8,
    /// Protocol within the subclass.
    pub device_protocol: u8,
    /// Maximum packet size of endpoint 0.
    pub max_packet_size0: u8,
    /// ID of product vendor.
    pub vendor: U16<LittleEndian>,
    /// ID of product.
    pub product: U16<LittleEndian>,
    /// Device version number, as BCD again.
    pub bcd_device: U16<LittleEndian>,
    /// Index of manufacturer name in string descriptor table.
    pub manufacturer_s: u8,
    /// Index of product name in string descriptor table.
    pub product_s: u8,
    /// Index of serial number in string descriptor table.
    pub serial_s: u8,
    /// Number of configurations supported by this device.
    pub num_configurations: u8,
}

/// What the device would look like if it were running at the other speed.
/// Only high-speed capable devices answer for this one.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceQualifierDescriptor {
    /// Length of this structure, must be 10.
    pub length: u8,
    /// Must be `DeviceQualifier`.
    pub descriptor_type: UsbDescType,
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    /// Number of other-speed configurations.
    pub num_configurations: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
}

/// Description of a single available device configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, `Config` or `OtherSpeedConfig`.
    pub descriptor_type: UsbDescType,
    /// Total length of all descriptors in this configuration, concatenated.
    /// This will include this descriptor, plus at least one interface
    /// descriptor, plus each interface descriptor's endpoint descriptors, plus
    /// whatever class-specific descriptors the class drivers add.
    pub total_length: U16<LittleEndian>,
    /// Number of interfaces in this configuration.
    pub num_interfaces: u8,
    /// Number to use when requesting this configuration via a
    /// `SetConfiguration` request.
    pub configuration_value: u8,
    /// Index of this configuration's name in the string descriptor table.
    pub configuration_s: u8,
    /// Bit set of device attributes:
    ///
    /// - Bit 7 should be set (indicates that device can be bus powered in USB
    /// 1.0).
    /// - Bit 6 indicates that the device can be self-powered.
    /// - Bit 5 indicates that the device can signal remote wakeup of the host
    /// (like a keyboard).
    /// - The rest are reserved and should be zero.
    pub attributes: u8,
    /// Maximum device power consumption in units of 2mA.
    pub max_power: u8,
}

/// Groups consecutive interfaces into one function.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbIfAssocDescriptor {
    /// Length of this structure, must be 8.
    pub length: u8,
    /// Must be `IfAssociation`.
    pub descriptor_type: UsbDescType,
    pub first_interface: u8,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
    pub function_s: u8,
}

/// Description of an interface within a configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Type of this descriptor, must be `Interface`.
    pub descriptor_type: UsbDescType,
    /// ID of this interface.
    pub interface_number: u8,
    /// Allows a single `interface_number` to have several alternate interface
    /// settings, where each alternate increments this field.
    pub alternate_setting: u8,
    /// Number of endpoint descriptors in this interface.
    pub num_endpoints: u8,
    /// Interface class code, distinguishing the type of interface.
    pub interface_class: u8,
    /// Interface subclass code, refining the class of interface.
    pub interface_subclass: u8,
    /// Protocol within the interface class/subclass.
    pub interface_protocol: u8,
    /// Index of interface name within string descriptor table.
    pub interface_s: u8,
}

/// Describes an endpoint within an interface.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    /// Length of this struct, must be 7.
    pub length: u8,
    /// Type of this descriptor, must be `Endpoint`.
    pub descriptor_type: UsbDescType,
    /// Address of this endpoint, where the bottom 4 bits give the endpoint
    /// number (0..15) and the top bit distinguishes IN (1) from OUT (0).
    pub endpoint_address: u8,
    /// Transfer type in the bottom 2 bits, plus synchronization and usage
    /// for isochronous endpoints.
    pub attributes: u8,
    /// Maximum packet size, with the additional-transaction count in bits
    /// 12:11 for high-bandwidth endpoints.
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval. Frames at full speed, `log2(microframes) + 1` at
    /// high speed.
    pub interval: u8,
}

/// Audio 1.0 flavor of the endpoint descriptor, with two trailing
/// synchronization fields.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbAudioEndpointDescriptor {
    /// Length of this struct, must be 9.
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    pub interval: u8,
    /// Feedback rate exponent, for synch endpoints.
    pub refresh: u8,
    /// Address of the synch endpoint tied to this one, or 0.
    pub synch_address: u8,
}

pub const DESC_LEN_DEV: u8 = core::mem::size_of::<UsbDeviceDescriptor>() as u8;
pub const DESC_LEN_DEV_QUAL: u8 = core::mem::size_of::<UsbDeviceQualifierDescriptor>() as u8;
pub const DESC_LEN_CFG: u8 = core::mem::size_of::<UsbConfigurationDescriptor>() as u8;
pub const DESC_LEN_IAD: u8 = core::mem::size_of::<UsbIfAssocDescriptor>() as u8;
pub const DESC_LEN_IF: u8 = core::mem::size_of::<UsbInterfaceDescriptor>() as u8;
pub const DESC_LEN_EP: u8 = core::mem::size_of::<UsbEndpointDescriptor>() as u8;
pub const DESC_LEN_EP_AUDIO: u8 = core::mem::size_of::<UsbAudioEndpointDescriptor>() as u8;
