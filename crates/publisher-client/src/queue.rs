//! Transfer queue between packet producers and the streaming worker.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::OverflowPolicy;
use crate::error::ClientError;
use crate::ClientResult;

/// Per-item construction and destruction strategy.
pub trait ItemHooks: Send + Sync {
    /// Caller-supplied shell the payload bytes are copied into.
    type Context;

    /// Owned item payload.
    type Payload: Send;

    /// Small metadata copy kept beside the payload.
    type Opaque: Copy + Send + fmt::Debug;

    /// Build a payload holding a copy of `bytes`.
    fn allocate(
        &self,
        bytes: &[u8],
        context: Self::Context,
    ) -> ClientResult<(Self::Payload, Self::Opaque)>;

    /// Release a payload.
    fn release(&self, payload: Self::Payload);
}

/// Decrements the live item counter when dropped.
struct LiveToken(Arc<AtomicUsize>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A queue item: payload plus its opaque metadata copy.
pub struct Item<H: ItemHooks> {
    payload: H::Payload,
    opaque: H::Opaque,
    live: LiveToken,
}

impl<H: ItemHooks> Item<H> {
    pub fn payload(&self) -> &H::Payload {
        &self.payload
    }

    pub fn opaque(&self) -> H::Opaque {
        self.opaque
    }
}

impl<H: ItemHooks> fmt::Debug for Item<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item").field("opaque", &self.opaque).finish()
    }
}

struct QueueState<H: ItemHooks> {
    items: VecDeque<Item<H>>,
    closed: bool,
}

/// FIFO of owned items, safe for many producers and one consumer.
///
/// Push, pop and flush serialize on one mutex. Hooks run outside it.
/// Dropping the queue frees every item still queued.
pub struct TransferQueue<H: ItemHooks> {
    hooks: RwLock<Option<Arc<H>>>,
    state: Mutex<QueueState<H>>,
    available: Condvar,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    live: Arc<AtomicUsize>,
    evicted: AtomicU64,
}

impl<H: ItemHooks> TransferQueue<H> {
    /// Create an empty queue. A capacity of zero is treated as unbounded.
    pub fn new(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            hooks: RwLock::new(None),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.filter(|&capacity| capacity > 0),
            overflow,
            live: Arc::new(AtomicUsize::new(0)),
            evicted: AtomicU64::new(0),
        }
    }

    /// Unbounded queue.
    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    /// Install the item allocate/free strategy.
    pub fn set_hooks(&self, hooks: H) {
        *self.hooks.write() = Some(Arc::new(hooks));
    }

    fn hooks(&self) -> Option<Arc<H>> {
        self.hooks.read().clone()
    }

    /// Allocate an item holding a copy of `bytes`. The item is not queued.
    pub fn item_alloc(&self, bytes: &[u8], context: H::Context) -> ClientResult<Item<H>> {
        let hooks = self.hooks().ok_or(ClientError::HooksNotSet)?;

        let (payload, opaque) = hooks.allocate(bytes, context).map_err(|e| {
            warn!(len = bytes.len(), error = %e, "Queue item allocation failed");
            e
        })?;

        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(Item {
            payload,
            opaque,
            live: LiveToken(Arc::clone(&self.live)),
        })
    }

    /// Append `item` at the tail.
    ///
    /// A rejected item is freed before returning.
    pub fn push(&self, item: Item<H>) -> ClientResult<()> {
        let mut state = self.state.lock();

        if state.closed {
            drop(state);
            self.item_free(item);
            return Err(ClientError::QueueClosed);
        }

        let mut oldest = None;
        if let Some(capacity) = self.capacity {
            if state.items.len() >= capacity {
                match self.overflow {
                    OverflowPolicy::RejectNew => {
                        drop(state);
                        self.item_free(item);
                        return Err(ClientError::QueueFull { capacity });
                    }
                    OverflowPolicy::DropOldest => oldest = state.items.pop_front(),
                }
            }
        }

        state.items.push_back(item);
        drop(state);
        self.available.notify_one();

        if let Some(oldest) = oldest {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            trace!(item = ?oldest, "Evicted oldest queued item");
            self.item_free(oldest);
        }

        Ok(())
    }

    /// Remove the head item, if any.
    pub fn pop(&self) -> Option<Item<H>> {
        self.state.lock().items.pop_front()
    }

    /// Remove the head item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Item<H>> {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.closed {
            self.available.wait_for(&mut state, timeout);
        }
        state.items.pop_front()
    }

    /// Free every queued item without delivering it. Returns how many.
    pub fn flush(&self) -> usize {
        let items = std::mem::take(&mut self.state.lock().items);
        let count = items.len();
        for item in items {
            self.item_free(item);
        }
        if count > 0 {
            debug!(count, "Flushed queue");
        }
        count
    }

    /// Release an item through the free hook.
    pub fn item_free(&self, item: Item<H>) {
        let Item { payload, live, .. } = item;
        match self.hooks() {
            Some(hooks) => hooks.release(payload),
            None => drop(payload),
        }
        drop(live);
    }

    /// Refuse further pushes and wake a waiting consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Items allocated and not yet freed, queued or not.
    pub fn live_items(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Queued items discarded to make room under [`OverflowPolicy::DropOldest`].
    /// Pushes refused under [`OverflowPolicy::RejectNew`] are reported to the
    /// caller instead and not counted here.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl<H: ItemHooks> Drop for TransferQueue<H> {
    fn drop(&mut self) {
        let items = std::mem::take(&mut self.state.get_mut().items);
        if !items.is_empty() {
            debug!(count = items.len(), "Freeing items left in queue");
        }
        for item in items {
            self.item_free(item);
        }
    }
}
