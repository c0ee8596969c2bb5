//! Exact-match flow tables.
//!
//! A table maps fixed-width byte keys to [`Flow`] records. Lookups come from
//! every port worker concurrently and take the read lock only; inserts and
//! erases come from application hooks, are rare, and serialize against
//! readers. A lookup that misses falls back to the table's miss flow, and a
//! table with no miss flow answers with a sentinel flow that drops.

use crate::action::Instruction;
use crate::context::Context;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::telemetry::Counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

pub type TableId = u32;

/// Fixed-width lookup key. Always an owned copy of the gathered bytes, never
/// a view into packet memory, so flows may outlive the packet they were
/// keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Supported match disciplines. Only exact matching is implemented; the
/// others are declared so callers get a typed rejection instead of silently
/// different semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Exact,
    Prefix,
    Wildcard,
}

/// The routine a matched flow runs against the packet.
pub type FlowFn = Arc<dyn Fn(&Dataplane, &Table, &mut Context) -> Result<()> + Send + Sync>;

/// Advisory per-flow counters. Monotonic, not synchronized with readers.
#[derive(Debug, Default)]
pub struct FlowCounters {
    packets: Counter,
    bytes: Counter,
    last_hit: Mutex<Option<Instant>>,
}

impl FlowCounters {
    pub fn packets(&self) -> u64 {
        self.packets.get()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }

    pub fn last_hit(&self) -> Option<Instant> {
        *self.last_hit.lock().unwrap()
    }
}

/// Idle and hard timeouts for a flow; zero means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowTimeouts {
    pub idle: Duration,
    pub hard: Duration,
}

/// A table entry: the instruction routine to run on a match, plus counters
/// and the bookkeeping an installer may care about.
#[derive(Clone)]
pub struct Flow {
    routine: FlowFn,
    counters: Arc<FlowCounters>,
    pub timeouts: FlowTimeouts,
    pub priority: u16,
    pub cookie: u64,
}

impl Flow {
    pub fn new(routine: FlowFn) -> Self {
        Self {
            routine,
            counters: Arc::new(FlowCounters::default()),
            timeouts: FlowTimeouts::default(),
            priority: 0,
            cookie: 0,
        }
    }

    /// A flow whose routine runs an instruction sequence through the
    /// interpreter, for installers that describe behavior as data.
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self::new(Arc::new(move |dp, _table, ctx| {
            crate::pipeline::execute_instructions(dp, ctx, &instructions)
        }))
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Runs the flow's routine.
    pub fn execute(&self, dp: &Dataplane, table: &Table, ctx: &mut Context) -> Result<()> {
        self.routine.as_ref()(dp, table, ctx)
    }

    /// Accounts one matched packet of `nbytes` against this flow.
    pub fn hit(&self, nbytes: usize) {
        self.counters.packets.inc();
        self.counters.bytes.add(nbytes as u64);
        *self.counters.last_hit.lock().unwrap() = Some(Instant::now());
    }

    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("priority", &self.priority)
            .field("cookie", &self.cookie)
            .field("packets", &self.counters.packets())
            .finish()
    }
}

/// Lookup accounting for one table.
#[derive(Debug, Default)]
pub struct TableStats {
    pub lookups: Counter,
    pub hits: Counter,
    pub misses: Counter,
}

/// An exact-match flow table.
pub struct Table {
    id: TableId,
    key_width: usize,
    capacity: usize,
    flows: RwLock<HashMap<Key, Flow>>,
    miss: RwLock<Option<Flow>>,
    sentinel: Flow,
    stats: TableStats,
}

impl Table {
    pub fn new(id: TableId, capacity: usize, key_width: usize) -> Self {
        Self {
            id,
            key_width,
            capacity,
            flows: RwLock::new(HashMap::with_capacity(capacity)),
            miss: RwLock::new(None),
            sentinel: Flow::new(Arc::new(|_dp, _table, ctx| {
                ctx.set_drop();
                Ok(())
            })),
            stats: TableStats::default(),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn key_width(&self) -> usize {
        self.key_width
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.flows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Installs a flow under `key`, overwriting any existing entry. The key
    /// must match the table width, and a new key cannot land in a full
    /// table.
    pub fn insert(&self, key: Key, flow: Flow) -> Result<()> {
        if key.len() != self.key_width {
            return Err(Error::KeyShapeMismatch {
                expected: self.key_width,
                actual: key.len(),
            });
        }
        let mut flows = self.flows.write().unwrap();
        if flows.len() >= self.capacity && !flows.contains_key(&key) {
            return Err(Error::Exhausted("table capacity"));
        }
        flows.insert(key, flow);
        Ok(())
    }

    /// Sets the flow used when a lookup finds no entry.
    pub fn insert_miss(&self, flow: Flow) {
        *self.miss.write().unwrap() = Some(flow);
    }

    /// Removes `key`; absent keys are a no-op.
    pub fn erase(&self, key: &Key) {
        self.flows.write().unwrap().remove(key);
    }

    /// Looks up `key`. Returns the matching flow, else the miss flow, else
    /// the sentinel whose routine drops the packet.
    pub fn find(&self, key: &Key) -> Flow {
        self.stats.lookups.inc();
        if let Some(flow) = self.flows.read().unwrap().get(key) {
            self.stats.hits.inc();
            return flow.clone();
        }
        self.stats.misses.inc();
        match self.miss.read().unwrap().as_ref() {
            Some(miss) => miss.clone(),
            None => self.sentinel.clone(),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("key_width", &self.key_width)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
