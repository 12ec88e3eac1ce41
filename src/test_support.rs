// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording driver and class doubles shared by the unit tests.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::class::{ClassArg, ClassDriver, EpDescriptors, IfDescriptors, IfRef, MsCompatId, MsExtProperty, MsSubCompatId};
use crate::ctrl::Ctrl;
use crate::desc::DescWriter;
use crate::config::{DevCfg, QtyCfg};
use crate::driver::{BusEvents, Driver, EpCapability, EpCaps};
use crate::error::{Error, Result};
use crate::proto::{UsbDir, UsbSetupPacket};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Init,
    Start,
    Stop,
    AddrSet(u8),
    AddrEn(u8),
    CfgSet(u8),
    CfgClr(u8),
    EpOpen(u8, u8, u16, u8),
    EpClose(u8),
    EpAbort(u8),
    Tx(u8, Vec<u8>),
    TxZlp(u8),
    Rx(u8, usize),
    RxZlp(u8),
    Stall(u8, bool),
    XferDone(u8, Result<()>),
}

/// Shared view of a `MockDriver` after it has been boxed into a device.
#[derive(Clone, Default)]
pub(crate) struct MockHandle {
    pub calls: Rc<RefCell<Vec<Call>>>,
    /// Endpoint whose open fails with `Xfer`.
    pub fail_open: Rc<Cell<Option<u8>>>,
    pub refuse_addr: Rc<Cell<bool>>,
    pub refuse_cfg: Rc<Cell<bool>>,
    /// Makes `ep_stall` report failure.
    pub refuse_stall: Rc<Cell<bool>>,
    /// Data stages handed out by `ep_rx`, oldest first.
    pub rx_data: Rc<RefCell<VecDeque<Vec<u8>>>>,
    pub frame: Rc<Cell<Option<u16>>>,
}

impl MockHandle {
    /// Calls recorded since the last `take`.
    pub fn take(&self) -> Vec<Call> {
        core::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Everything sent on EP0 IN since the last `take`, concatenated.
    pub fn ep0_in(&self) -> Vec<u8> {
        self.take()
            .into_iter()
            .filter_map(|c| match c {
                Call::Tx(0x80, data) => Some(data),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn log(&self, c: Call) {
        self.calls.borrow_mut().push(c);
    }
}

pub(crate) struct MockDriver {
    table: Vec<EpCapability>,
    hs: bool,
    h: MockHandle,
}

impl MockDriver {
    pub fn new(table: Vec<EpCapability>) -> (Self, MockHandle) {
        let h = MockHandle::default();
        (Self { table, hs: false, h: h.clone() }, h)
    }

    pub fn high_speed(table: Vec<EpCapability>) -> (Self, MockHandle) {
        let (mut d, h) = Self::new(table);
        d.hs = true;
        (d, h)
    }
}

impl Driver for MockDriver {
    fn ep_table(&self) -> &[EpCapability] {
        &self.table
    }

    fn high_speed(&self) -> bool {
        self.hs
    }

    fn init(&mut self) -> Result<()> {
        self.h.log(Call::Init);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.h.log(Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.h.log(Call::Stop);
        Ok(())
    }

    fn addr_set(&mut self, addr: u8) -> bool {
        self.h.log(Call::AddrSet(addr));
        !self.h.refuse_addr.get()
    }

    fn addr_en(&mut self, addr: u8) {
        self.h.log(Call::AddrEn(addr));
    }

    fn cfg_set(&mut self, cfg_val: u8) -> bool {
        self.h.log(Call::CfgSet(cfg_val));
        !self.h.refuse_cfg.get()
    }

    fn cfg_clr(&mut self, cfg_val: u8) {
        self.h.log(Call::CfgClr(cfg_val));
    }

    fn frame_nbr_get(&self) -> Option<u16> {
        self.h.frame.get()
    }

    fn ep_open(&mut self, ep_addr: u8, ep_type: u8, max_pkt_size: u16, transactions: u8) -> Result<()> {
        self.h.log(Call::EpOpen(ep_addr, ep_type, max_pkt_size, transactions));
        if self.h.fail_open.get() == Some(ep_addr) {
            return Err(Error::Xfer);
        }
        Ok(())
    }

    fn ep_close(&mut self, ep_addr: u8) {
        self.h.log(Call::EpClose(ep_addr));
    }

    fn ep_abort(&mut self, ep_addr: u8) -> bool {
        self.h.log(Call::EpAbort(ep_addr));
        true
    }

    fn ep_tx(&mut self, ep_addr: u8, buf: &[u8], _timeout_ms: u32) -> Result<usize> {
        self.h.log(Call::Tx(ep_addr, buf.to_vec()));
        Ok(buf.len())
    }

    fn ep_tx_zlp(&mut self, ep_addr: u8, _timeout_ms: u32) -> Result<()> {
        self.h.log(Call::TxZlp(ep_addr));
        Ok(())
    }

    fn ep_rx(&mut self, ep_addr: u8, buf: &mut [u8], _timeout_ms: u32) -> Result<usize> {
        let data = self.h.rx_data.borrow_mut().pop_front().ok_or(Error::Timeout)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.h.log(Call::Rx(ep_addr, n));
        Ok(n)
    }

    fn ep_rx_zlp(&mut self, ep_addr: u8, _timeout_ms: u32) -> Result<()> {
        self.h.log(Call::RxZlp(ep_addr));
        Ok(())
    }

    fn ep_stall(&mut self, ep_addr: u8, state: bool) -> bool {
        self.h.log(Call::Stall(ep_addr, state));
        !self.h.refuse_stall.get()
    }

    fn xfer_done(&mut self, ep_addr: u8, result: Result<()>) {
        self.h.log(Call::XferDone(ep_addr, result));
    }
}

fn pair(caps: EpCaps, nbr: u8, max: u16) -> [EpCapability; 2] {
    [
        EpCapability::new(caps | EpCaps::DIR_OUT, nbr, max),
        EpCapability::new(caps | EpCaps::DIR_IN, nbr, max),
    ]
}

/// A full-speed controller: EP0, one endpoint that can do anything, and two
/// bulk/interrupt ones.
pub(crate) fn fs_table() -> Vec<EpCapability> {
    let all = EpCaps::BULK | EpCaps::INTR | EpCaps::ISOC;
    let mut t = Vec::new();
    t.extend_from_slice(&pair(EpCaps::CTRL, 0, 64));
    t.extend_from_slice(&pair(all, 1, 1023));
    t.extend_from_slice(&pair(EpCaps::BULK | EpCaps::INTR, 2, 64));
    t.extend_from_slice(&pair(EpCaps::BULK | EpCaps::INTR, 3, 64));
    t
}

pub(crate) fn hs_table() -> Vec<EpCapability> {
    let all = EpCaps::BULK | EpCaps::INTR | EpCaps::ISOC;
    let mut t = Vec::new();
    t.extend_from_slice(&pair(EpCaps::CTRL, 0, 64));
    t.extend_from_slice(&pair(all, 1, 1024));
    t.extend_from_slice(&pair(EpCaps::BULK | EpCaps::INTR, 2, 512));
    t.extend_from_slice(&pair(all, 3, 1024));
    t
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ClassCall {
    Conn(u8),
    Disconn(u8),
    AltUpdate(u8, u8),
    EpState(u8, u8),
    ClassReq(u8),
    VendorReq(u8),
    IfReq(u8),
}

/// Class driver double. Descriptor bytes are only reported when non-empty.
#[derive(Default)]
pub(crate) struct MockClass {
    pub calls: Rc<RefCell<Vec<ClassCall>>>,
    pub if_bytes: &'static [u8],
    pub ep_bytes: &'static [u8],
    pub compat: Option<(MsCompatId, MsSubCompatId)>,
    pub props: &'static [MsExtProperty],
    /// When set, class and vendor requests are accepted and IN requests
    /// answered with these bytes.
    pub reply: Option<&'static [u8]>,
}

impl MockClass {
    pub fn new() -> (Rc<Self>, Rc<RefCell<Vec<ClassCall>>>) {
        Self::with(Self::default())
    }

    pub fn with(c: Self) -> (Rc<Self>, Rc<RefCell<Vec<ClassCall>>>) {
        let calls = c.calls.clone();
        (Rc::new(c), calls)
    }

    fn answer(&self, setup: &UsbSetupPacket, ctrl: &mut Ctrl<'_>) -> bool {
        match self.reply {
            None => false,
            Some(bytes) if setup.direction() == UsbDir::In && !bytes.is_empty() => ctrl.tx(bytes, true).is_ok(),
            Some(_) => true,
        }
    }
}

impl IfDescriptors for MockClass {
    fn if_desc(&self, _r: &IfRef, w: &mut DescWriter<'_>) {
        w.wr(self.if_bytes);
    }

    fn if_desc_size(&self, _r: &IfRef) -> u16 {
        self.if_bytes.len() as u16
    }
}

impl EpDescriptors for MockClass {
    fn ep_desc(&self, _r: &IfRef, _ep_addr: u8, w: &mut DescWriter<'_>) {
        w.wr(self.ep_bytes);
    }

    fn ep_desc_size(&self, _r: &IfRef, _ep_addr: u8) -> u16 {
        self.ep_bytes.len() as u16
    }
}

impl ClassDriver for MockClass {
    fn conn(&self, _dev_nbr: u8, cfg_nbr: u8, _if_arg: ClassArg) {
        self.calls.borrow_mut().push(ClassCall::Conn(cfg_nbr));
    }

    fn disconn(&self, _dev_nbr: u8, cfg_nbr: u8, _if_arg: ClassArg) {
        self.calls.borrow_mut().push(ClassCall::Disconn(cfg_nbr));
    }

    fn alt_setting_update(&self, r: &IfRef) {
        self.calls.borrow_mut().push(ClassCall::AltUpdate(r.if_nbr, r.alt_nbr));
    }

    fn ep_state_update(&self, r: &IfRef, ep_addr: u8) {
        self.calls.borrow_mut().push(ClassCall::EpState(r.if_nbr, ep_addr));
    }

    fn if_descriptors(&self) -> Option<&dyn IfDescriptors> {
        if self.if_bytes.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn ep_descriptors(&self) -> Option<&dyn EpDescriptors> {
        if self.ep_bytes.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn if_req(&self, _dev_nbr: u8, setup: &UsbSetupPacket, _if_arg: ClassArg, w: &mut DescWriter<'_>) -> bool {
        self.calls.borrow_mut().push(ClassCall::IfReq(setup.request));
        match self.reply {
            Some(bytes) => {
                w.wr(bytes);
                true
            }
            None => false,
        }
    }

    fn class_req(&self, _dev_nbr: u8, setup: &UsbSetupPacket, _if_arg: ClassArg, ctrl: &mut Ctrl<'_>) -> bool {
        self.calls.borrow_mut().push(ClassCall::ClassReq(setup.request));
        self.answer(setup, ctrl)
    }

    fn vendor_req(&self, _dev_nbr: u8, setup: &UsbSetupPacket, _if_arg: ClassArg, ctrl: &mut Ctrl<'_>) -> bool {
        self.calls.borrow_mut().push(ClassCall::VendorReq(setup.request));
        self.answer(setup, ctrl)
    }

    fn ms_compat_id(&self, _dev_nbr: u8, _if_arg: ClassArg) -> Option<(MsCompatId, MsSubCompatId)> {
        self.compat
    }

    fn ms_ext_properties(&self, _dev_nbr: u8, _if_arg: ClassArg) -> &[MsExtProperty] {
        self.props
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BusCall {
    Reset,
    Suspend,
    Resume,
    Conn,
    Disconn,
    CfgSet(u8),
    CfgClr(u8),
}

#[derive(Default)]
pub(crate) struct MockBus {
    pub calls: RefCell<Vec<BusCall>>,
}

impl MockBus {
    pub fn take(&self) -> Vec<BusCall> {
        core::mem::take(&mut *self.calls.borrow_mut())
    }
}

impl BusEvents for MockBus {
    fn reset(&self, _dev_nbr: u8) {
        self.calls.borrow_mut().push(BusCall::Reset);
    }

    fn suspend(&self, _dev_nbr: u8) {
        self.calls.borrow_mut().push(BusCall::Suspend);
    }

    fn resume(&self, _dev_nbr: u8) {
        self.calls.borrow_mut().push(BusCall::Resume);
    }

    fn conn(&self, _dev_nbr: u8) {
        self.calls.borrow_mut().push(BusCall::Conn);
    }

    fn disconn(&self, _dev_nbr: u8) {
        self.calls.borrow_mut().push(BusCall::Disconn);
    }

    fn cfg_set(&self, _dev_nbr: u8, cfg_val: u8) {
        self.calls.borrow_mut().push(BusCall::CfgSet(cfg_val));
    }

    fn cfg_clr(&self, _dev_nbr: u8, cfg_val: u8) {
        self.calls.borrow_mut().push(BusCall::CfgClr(cfg_val));
    }
}

/// Raw bytes of a SETUP packet, as a driver would capture them.
pub(crate) fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [request_type, request, v[0], v[1], i[0], i[1], l[0], l[1]]
}

/// Room for two devices with a few interfaces each.
pub(crate) fn qty() -> QtyCfg {
    QtyCfg {
        dev_qty: 2,
        config_qty: 4,
        if_qty: 4,
        if_alt_qty: 6,
        if_grp_qty: 2,
        ep_desc_qty: 8,
        str_qty: 10,
        ep_open_qty: 8,
        urb_extra_qty: 2,
    }
}

pub(crate) fn dev_cfg() -> DevCfg {
    DevCfg {
        vendor_id: 0xFFFE,
        product_id: 0x1234,
        device_bcd: 0x0100,
        manufacturer: Some("Acme"),
        product: Some("Widget"),
        serial_nbr: None,
        lang_id: 0x0409,
    }
}
