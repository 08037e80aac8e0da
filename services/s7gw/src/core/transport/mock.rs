//! Mock PLC transport for testing
//!
//! Backed by an in-memory map of item contents. Failures can be scripted
//! and every call is recorded, so scheduler and session logic can be tested
//! without a PLC.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{
    DataItem, ItemStatus, PlcTransport, TransportError, TransportFactory, TransportSettings,
};
use crate::address::{Area, WordKind};

/// Recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect,
    Disconnect,
    /// Item starts of a multi-item read
    ReadMulti(Vec<u32>),
    /// Item starts of a multi-item write
    WriteMulti(Vec<u32>),
    ReadArea(u32),
    WriteArea(u32),
}

type MemoryKey = (Area, WordKind, u32);

#[derive(Debug, Default)]
struct MockPlcState {
    connected: bool,
    memory: HashMap<MemoryKey, Vec<u8>>,
    calls: Vec<MockCall>,
    /// Remaining connect attempts that fail
    failing_connects: u32,
    /// Remaining data calls that fail as a whole
    failing_calls: u32,
    /// Item starts the PLC rejects
    failing_items: HashSet<u32>,
}

/// Shared view of a mock PLC; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct MockPlcHandle {
    state: Arc<Mutex<MockPlcState>>,
}

impl MockPlcHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload memory for an item
    pub fn set_memory(&self, area: Area, word_kind: WordKind, start: u32, data: Vec<u8>) {
        self.state.lock().memory.insert((area, word_kind, start), data);
    }

    pub fn memory(&self, area: Area, word_kind: WordKind, start: u32) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&(area, word_kind, start)).cloned()
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// Fail the next `count` data calls entirely
    pub fn fail_next_calls(&self, count: u32) {
        self.state.lock().failing_calls = count;
    }

    /// Reject the item with this start in every call
    pub fn fail_item(&self, start: u32) {
        self.state.lock().failing_items.insert(start);
    }

    pub fn clear_item_failures(&self) {
        self.state.lock().failing_items.clear();
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Number of recorded calls matching a predicate
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

impl MockPlcState {
    fn check_call(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionLost("not connected".into()));
        }
        if self.failing_calls > 0 {
            self.failing_calls -= 1;
            return Err(TransportError::ProtocolError("scripted call failure".into()));
        }
        Ok(())
    }

    fn item_status(&self, item: &DataItem) -> ItemStatus {
        if self.failing_items.contains(&item.start) {
            return Err(TransportError::ItemFailed(format!(
                "scripted failure at {}",
                item.start
            )));
        }
        Ok(())
    }

    fn load(&self, item: &mut DataItem) {
        let size = item.byte_size();
        let mut data = self
            .memory
            .get(&(item.area, item.word_kind, item.start))
            .cloned()
            .unwrap_or_default();
        data.resize(size, 0);
        item.data = data;
    }

    fn store(&mut self, item: &DataItem) {
        self.memory
            .insert((item.area, item.word_kind, item.start), item.data.clone());
    }
}

/// Mock transport implementation
#[derive(Debug)]
pub struct MockPlcTransport {
    handle: MockPlcHandle,
}

impl MockPlcTransport {
    pub fn new(handle: MockPlcHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &MockPlcHandle {
        &self.handle
    }
}

#[async_trait]
impl PlcTransport for MockPlcTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.calls.push(MockCall::Connect);
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::ConnectionFailed("scripted refusal".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.handle.state.lock();
        state.calls.push(MockCall::Disconnect);
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    async fn read_multi(
        &mut self,
        items: &mut [DataItem],
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let mut state = self.handle.state.lock();
        state
            .calls
            .push(MockCall::ReadMulti(items.iter().map(|i| i.start).collect()));
        state.check_call()?;

        Ok(items
            .iter_mut()
            .map(|item| {
                let status = state.item_status(item);
                if status.is_ok() {
                    state.load(item);
                }
                status
            })
            .collect())
    }

    async fn write_multi(&mut self, items: &[DataItem]) -> Result<Vec<ItemStatus>, TransportError> {
        let mut state = self.handle.state.lock();
        state
            .calls
            .push(MockCall::WriteMulti(items.iter().map(|i| i.start).collect()));
        state.check_call()?;

        Ok(items
            .iter()
            .map(|item| {
                let status = state.item_status(item);
                if status.is_ok() {
                    state.store(item);
                }
                status
            })
            .collect())
    }

    async fn read_area(&mut self, item: &mut DataItem) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.calls.push(MockCall::ReadArea(item.start));
        state.check_call()?;
        state.item_status(item)?;
        state.load(item);
        Ok(())
    }

    async fn write_area(&mut self, item: &DataItem) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock();
        state.calls.push(MockCall::WriteArea(item.start));
        state.check_call()?;
        state.item_status(item)?;
        state.store(item);
        Ok(())
    }
}

/// Factory handing out mock transports that share per-IP state
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    plcs: Mutex<HashMap<String, MockPlcHandle>>,
    created: Mutex<Vec<TransportSettings>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the mock PLC at `ip`, created on first use
    pub fn plc(&self, ip: &str) -> MockPlcHandle {
        self.plcs.lock().entry(ip.to_string()).or_default().clone()
    }

    /// Settings of every transport created so far
    pub fn created(&self) -> Vec<TransportSettings> {
        self.created.lock().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, settings: &TransportSettings) -> Box<dyn PlcTransport> {
        self.created.lock().push(settings.clone());
        Box::new(MockPlcTransport::new(self.plc(&settings.ip)))
    }
}
