//! Mock graphics context for testing main-thread handoff.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// A graphics operation recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCall {
    CreateBuffer { object: u64, size: u64 },
    CreateTexture { object: u64, width: u32, height: u32 },
    CompileShader { object: u64, label: String },
    DeleteObject { object: u64 },
}

/// One recorded call and where it ran.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: GpuCall,
    pub thread: ThreadId,
    /// Whether the call ran on the thread that owns the context.
    pub on_owner: bool,
}

/// Records graphics calls instead of issuing them.
///
/// The thread that creates the mock owns it. Calls from any other thread
/// are still recorded, flagged as off-thread.
///
/// # Example
///
/// ```rust
/// use ember_test_utils::MockGraphicsContext;
///
/// let gpu = MockGraphicsContext::new();
/// let buffer = gpu.create_buffer(256);
/// assert!(gpu.is_live(buffer));
/// assert_eq!(gpu.count_buffer_creates(), 1);
/// assert_eq!(gpu.off_thread_calls(), 0);
/// ```
pub struct MockGraphicsContext {
    owner: ThreadId,
    calls: Mutex<Vec<RecordedCall>>,
    live: Mutex<HashSet<u64>>,
    next_object: AtomicU64,
}

impl MockGraphicsContext {
    /// A context owned by the calling thread.
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    /// A context owned by `owner` instead of the calling thread.
    pub fn for_thread(owner: ThreadId) -> Self {
        Self {
            owner,
            calls: Mutex::new(Vec::new()),
            live: Mutex::new(HashSet::new()),
            next_object: AtomicU64::new(1),
        }
    }

    /// The thread the context counts as its owner.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn record(&self, call: GpuCall) {
        let thread = thread::current().id();
        self.calls.lock().push(RecordedCall {
            call,
            thread,
            on_owner: thread == self.owner,
        });
    }

    fn allocate(&self) -> u64 {
        let object = self.next_object.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(object);
        object
    }

    /// Create a buffer of `size` bytes and return its object id.
    pub fn create_buffer(&self, size: u64) -> u64 {
        let object = self.allocate();
        self.record(GpuCall::CreateBuffer { object, size });
        object
    }

    /// Create a `width` x `height` texture and return its object id.
    pub fn create_texture(&self, width: u32, height: u32) -> u64 {
        let object = self.allocate();
        self.record(GpuCall::CreateTexture {
            object,
            width,
            height,
        });
        object
    }

    /// Compile a shader called `label` and return its program id.
    pub fn compile_shader(&self, label: impl Into<String>) -> u64 {
        let object = self.allocate();
        self.record(GpuCall::CompileShader {
            object,
            label: label.into(),
        });
        object
    }

    /// Returns `false` if the object was not live.
    pub fn delete_object(&self, object: u64) -> bool {
        self.record(GpuCall::DeleteObject { object });
        self.live.lock().remove(&object)
    }

    /// Check if `object` was created and not yet deleted.
    pub fn is_live(&self, object: u64) -> bool {
        self.live.lock().contains(&object)
    }

    /// Number of objects created and not yet deleted.
    pub fn live_objects(&self) -> usize {
        self.live.lock().len()
    }

    /// Get a copy of all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls made from a thread other than the owner.
    pub fn off_thread_calls(&self) -> usize {
        self.calls.lock().iter().filter(|call| !call.on_owner).count()
    }

    /// Number of `create_buffer` calls.
    pub fn count_buffer_creates(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::CreateBuffer { .. }))
    }

    /// Number of `compile_shader` calls.
    pub fn count_shader_compiles(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::CompileShader { .. }))
    }

    /// Number of `delete_object` calls.
    pub fn count_deletes(&self) -> usize {
        self.count(|call| matches!(call, GpuCall::DeleteObject { .. }))
    }

    fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|recorded| predicate(&recorded.call))
            .count()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl Default for MockGraphicsContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_records_owner_calls() {
        let gpu = MockGraphicsContext::new();
        let shader = gpu.compile_shader("basic");
        let texture = gpu.create_texture(4, 4);

        assert_ne!(shader, texture);
        assert_eq!(gpu.count_shader_compiles(), 1);
        assert_eq!(gpu.call_count(), 2);
        assert!(gpu.calls().iter().all(|call| call.on_owner));
    }

    #[test]
    fn test_flags_off_thread_calls() {
        let gpu = Arc::new(MockGraphicsContext::new());
        let worker = {
            let gpu = Arc::clone(&gpu);
            thread::spawn(move || gpu.create_buffer(64))
        };
        let buffer = worker.join().unwrap();

        assert_eq!(gpu.off_thread_calls(), 1);
        assert!(gpu.delete_object(buffer));
        assert!(!gpu.delete_object(buffer));
        assert_eq!(gpu.live_objects(), 0);
        assert_eq!(gpu.count_deletes(), 2);
    }
}
