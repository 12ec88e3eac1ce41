// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Matching logical endpoints to the controller's physical ones, and the
//! `bInterval` encodings.

use crate::driver::{EpCapability, EpCaps};
use crate::error::{Error, Result};
use crate::proto::{UsbDir, UsbTransferType, EP_MAX_PHY_NBR};

/// A physical endpoint picked for a logical one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct EpAlloc {
    pub addr: u8,
    pub max_pkt: u16,
}

/// Largest power of two not above `n`. `n` must be nonzero.
fn pow2_floor(n: u16) -> u16 {
    1 << (15 - n.leading_zeros())
}

/// Finds a free slot in `table` for an endpoint of type `ep_type`.
///
/// Slots whose bit is set in `map` are taken. A slot qualifies if its
/// capabilities include the direction and type and its packet size, once
/// limited to what the type allows at `hs` speed, equals `req_max_pkt`. A
/// request of 0 takes whatever size the first qualifying slot offers. The
/// chosen slot's bit is set in `map`.
pub(crate) fn ep_alloc(
    table: &[EpCapability],
    hs: bool,
    ep_type: UsbTransferType,
    dir: UsbDir,
    req_max_pkt: u16,
    alt_nbr: u8,
    map: &mut u32,
) -> Result<EpAlloc> {
    let mut want = match dir {
        UsbDir::In => EpCaps::DIR_IN,
        UsbDir::Out => EpCaps::DIR_OUT,
    };
    want |= match ep_type {
        UsbTransferType::Control => EpCaps::CTRL,
        UsbTransferType::Isochronous => EpCaps::ISOC,
        UsbTransferType::Bulk => EpCaps::BULK,
        UsbTransferType::Interrupt => EpCaps::INTR,
    };

    for (ix, slot) in table.iter().take(EP_MAX_PHY_NBR).enumerate() {
        if slot.caps.is_empty() {
            break;
        }
        let bit = 1u32 << ix;
        if *map & bit != 0 || !slot.caps.contains(want) || slot.max_pkt_size == 0 {
            continue;
        }
        let hw = slot.max_pkt_size;
        let max_pkt = match ep_type {
            UsbTransferType::Control => {
                let m = pow2_floor(hw.min(64));
                if hs && m != 64 {
                    continue;
                }
                m
            }
            UsbTransferType::Bulk => {
                let m = hw.min(512);
                if hs && m == 512 {
                    m
                } else if hs {
                    continue;
                } else {
                    pow2_floor(m.min(64))
                }
            }
            UsbTransferType::Isochronous => {
                let m = hw.min(if hs { 1024 } else { 1023 });
                if req_max_pkt > 0 {
                    m.min(req_max_pkt)
                } else {
                    m
                }
            }
            UsbTransferType::Interrupt => {
                let m = hw.min(if hs && alt_nbr != 0 { 1024 } else { 64 });
                if req_max_pkt > 0 {
                    m.min(req_max_pkt)
                } else {
                    m
                }
            }
        };
        if req_max_pkt == max_pkt || req_max_pkt == 0 {
            *map |= bit;
            return Ok(EpAlloc {
                addr: dir.endpoint(slot.nbr),
                max_pkt,
            });
        }
    }
    Err(Error::EpNoneAvail)
}

/// Largest full-speed interrupt interval, in frames.
pub const INTERVAL_FS_MAX: u16 = 254;
/// Largest interval expressible in exponent form: 2^15 (micro)frames.
pub const INTERVAL_EXP_MAX: u16 = 32768;

/// Full-speed interrupt `bInterval`: the frame count itself.
pub(crate) fn interval_frames(interval: u16) -> Result<u8> {
    if interval == 0 || interval > INTERVAL_FS_MAX {
        return Err(Error::InvalidArg);
    }
    Ok(interval as u8)
}

/// Exponent-form `bInterval` used by high-speed interrupt and all
/// isochronous endpoints: `interval` must be a power of two and encodes as
/// `log2(interval) + 1`.
pub(crate) fn interval_exp(interval: u16) -> Result<u8> {
    if interval == 0 || interval > INTERVAL_EXP_MAX || !interval.is_power_of_two() {
        return Err(Error::InvalidArg);
    }
    Ok((16 - interval.leading_zeros()) as u8)
}

/// Inverse of `interval_exp`.
pub fn interval_exp_decode(b_interval: u8) -> Option<u16> {
    match b_interval {
        1..=16 => Some(1 << (b_interval - 1)),
        _ => None,
    }
}
