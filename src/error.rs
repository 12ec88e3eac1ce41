// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error type shared by the build API, the request state machine, and the
//! driver contract.

use thiserror::Error;

/// Everything that can go wrong in the device core.
///
/// Drivers report their own failures with the same type, usually `Xfer`,
/// `Timeout` or `Aborted`, so that a transfer error surfaces unchanged to
/// whoever started the transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// A parameter is out of range or inconsistent with the topology.
    #[error("invalid argument")]
    InvalidArg,
    /// The operation isn't legal in the device's current state.
    #[error("operation not allowed in current device state")]
    InvalidDevState,
    /// The endpoint isn't open, or is in the wrong state for the request.
    #[error("invalid endpoint state")]
    InvalidEpState,
    /// The endpoint address doesn't name an endpoint of this alternate
    /// setting.
    #[error("no such endpoint")]
    EpInvalid,
    /// No physical endpoint satisfies the request.
    #[error("no physical endpoint available")]
    EpNoneAvail,
    /// A fixed-capacity table is full.
    #[error("no free table entry")]
    NoMoreResources,
    /// The caller-supplied descriptor buffer is too small.
    #[error("descriptor buffer too small")]
    Alloc,
    /// The object is already a member of something it can only join once.
    #[error("already exists")]
    AlreadyExists,
    /// The feature is compiled out, or the driver doesn't provide the hook.
    #[error("not supported")]
    NotSupported,
    /// No device, configuration, interface or setting with that number.
    #[error("not found")]
    NotFound,
    /// The driver failed a transfer or refused a request.
    #[error("transfer failed")]
    Xfer,
    /// A transfer didn't complete before the timeout.
    #[error("transfer timed out")]
    Timeout,
    /// A transfer was cancelled, typically by a bus reset.
    #[error("transfer aborted")]
    Aborted,
}

pub type Result<T> = core::result::Result<T, Error>;
