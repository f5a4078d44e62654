//! Deterministic fake `MemoryServiceClient`, no network I/O.

use std::sync::Mutex;

use async_trait::async_trait;
use engram_memory_client::{AddMemoryRequest, AddMemoryResponse, MemoryClientError, MemoryServiceClient};

/// Records every call it receives and either always succeeds with a
/// deterministic id, or fails every call if `fail_next` rows remain.
pub struct FakeMemoryServiceClient {
    calls: Mutex<Vec<AddMemoryRequest>>,
    next_id: Mutex<u64>,
    fail_next: Mutex<u32>,
}

impl Default for FakeMemoryServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMemoryServiceClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            fail_next: Mutex::new(0),
        }
    }

    /// The next `n` calls to `add_memory` return a 503 instead of succeeding.
    pub fn fail_next_n_calls(&self, n: u32) {
        *self.fail_next.lock().unwrap() = n;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<AddMemoryRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemoryServiceClient for FakeMemoryServiceClient {
    async fn add_memory(&self, request: AddMemoryRequest) -> Result<AddMemoryResponse, MemoryClientError> {
        self.calls.lock().unwrap().push(request);

        let mut fail_next = self.fail_next.lock().unwrap();
        if *fail_next > 0 {
            *fail_next -= 1;
            return Err(MemoryClientError::Api { status: 503, body: "fake outage".to_string() });
        }
        drop(fail_next);

        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("fake-mem-{}", *next_id);
        *next_id += 1;
        Ok(AddMemoryResponse { id })
    }
}
