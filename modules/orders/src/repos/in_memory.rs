//! In-memory order and outbox storage for dev runs and tests
//!
//! Mirrors the Postgres contract: outbox ids come from a sequence at insert
//! time (rolled-back inserts leave gaps), staged writes become visible only on
//! commit, and a dropped unit of work leaves no trace. Stored orders get the
//! column precision Postgres applies (2 decimal places, microsecond
//! timestamps). Instead of row locks, every committed order carries a version;
//! a unit of work whose loaded order changed underneath it fails to commit.
//! Individual operations can be switched to fail, to exercise rollback and
//! relay halt paths.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::RoundingStrategy;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{OrderStore, StoreError, UnitOfWork};
use crate::models::{Order, Page, PageRequest};
use crate::outbox::{validate_event_type, OutboxError, OutboxRecord, OutboxStore};

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    versions: HashMap<Uuid, u64>,
    outbox: BTreeMap<i64, OutboxRecord>,
    faults: Faults,
}

#[derive(Default, Clone, Copy)]
struct Faults {
    outbox_inserts: bool,
    commits: bool,
    fetches: bool,
    marks: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    outbox_seq: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_outbox_id(&self) -> i64 {
        self.outbox_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn fail_outbox_inserts(&self, fail: bool) {
        self.lock().faults.outbox_inserts = fail;
    }

    pub fn fail_commits(&self, fail: bool) {
        self.lock().faults.commits = fail;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.lock().faults.fetches = fail;
    }

    pub fn fail_marks(&self, fail: bool) {
        self.lock().faults.marks = fail;
    }

    /// Insert a committed, unpublished record directly (fixtures and demos)
    pub fn seed_outbox(&self, event_type: &str, payload: &str) -> i64 {
        let id = self.next_outbox_id();
        self.lock().outbox.insert(
            id,
            OutboxRecord {
                id,
                event_type: event_type.to_string(),
                payload: payload.to_string(),
                created_at: Utc::now(),
                published: false,
                transmitted_at: None,
            },
        );
        id
    }

    /// Every committed outbox record, by id
    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.lock().outbox.values().cloned().collect()
    }

    /// Committed orders, active or not
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }
}

/// `NUMERIC(14, 2)` and `TIMESTAMPTZ` precision
fn as_stored(order: &Order) -> Order {
    Order {
        amount: order
            .amount
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        created_at: order.created_at.trunc_subsecs(6),
        updated_at: order.updated_at.trunc_subsecs(6),
        ..order.clone()
    }
}

pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    orders: HashMap<Uuid, Order>,
    outbox: Vec<OutboxRecord>,
    /// Committed version of each order loaded through `find_active_order`
    read_versions: HashMap<Uuid, u64>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_order(&mut self, order: &Order) -> Result<Order, StoreError> {
        let exists = self.orders.contains_key(&order.id)
            || self.store.lock().orders.contains_key(&order.id);
        if exists {
            return Err(StoreError::Unavailable(format!(
                "duplicate order id {}",
                order.id
            )));
        }
        let stored = as_stored(order);
        self.orders.insert(order.id, stored.clone());
        Ok(stored)
    }

    async fn find_active_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        if let Some(staged) = self.orders.get(&id) {
            return Ok(Some(staged.clone()).filter(|o| o.active));
        }

        let state = self.store.lock();
        let Some(order) = state.orders.get(&id).filter(|o| o.active).cloned() else {
            return Ok(None);
        };
        let version = state.versions.get(&id).copied().unwrap_or_default();
        drop(state);

        self.read_versions.entry(id).or_insert(version);
        Ok(Some(order))
    }

    async fn update_order(&mut self, order: &Order) -> Result<Order, StoreError> {
        let stored = as_stored(order);
        self.orders.insert(order.id, stored.clone());
        Ok(stored)
    }

    async fn insert_outbox(&mut self, event_type: &str, payload: &str) -> Result<i64, OutboxError> {
        validate_event_type(event_type)?;
        if self.store.lock().faults.outbox_inserts {
            return Err(OutboxError::Unavailable("outbox insert failed".to_string()));
        }

        let id = self.store.next_outbox_id();
        self.outbox.push(OutboxRecord {
            id,
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            created_at: Utc::now(),
            published: false,
            transmitted_at: None,
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.store.lock();
        if state.faults.commits {
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }

        for (id, read) in &self.read_versions {
            if state.versions.get(id).copied().unwrap_or_default() != *read {
                return Err(StoreError::Conflict(*id));
            }
        }

        for (id, order) in self.orders {
            *state.versions.entry(id).or_default() += 1;
            state.orders.insert(id, order);
        }
        for record in self.outbox {
            state.outbox.insert(record.id, record);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self.clone(),
            orders: HashMap::new(),
            outbox: Vec::new(),
            read_versions: HashMap::new(),
        }))
    }

    async fn get_active_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(&id).filter(|o| o.active).cloned())
    }

    async fn list_active_orders(&self, page: PageRequest) -> Result<Page<Order>, StoreError> {
        let mut active: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = active.len() as i64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let content = active
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .collect();

        Ok(Page::new(content, page, total))
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unpublished(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let state = self.lock();
        if state.faults.fetches {
            return Err(OutboxError::Unavailable("outbox fetch failed".to_string()));
        }

        let mut records: Vec<OutboxRecord> = state
            .outbox
            .values()
            .filter(|r| !r.published && r.event_type == event_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));

        Ok(records)
    }

    async fn mark_published(
        &self,
        id: i64,
        transmitted_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let mut state = self.lock();
        if state.faults.marks {
            return Err(OutboxError::Unavailable("outbox mark failed".to_string()));
        }

        let record = state.outbox.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        if record.published {
            return Ok(false);
        }
        record.published = true;
        record.transmitted_at = Some(transmitted_at);
        Ok(true)
    }
}
