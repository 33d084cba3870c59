//! In-process store backend.
//!
//! Task records live in a `DashMap` keyed by task id, so per-record writes
//! only contend on their own shard. The availability switch lets tests
//! simulate an outage of the backing store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::errors::{StoreError, StoreResult};
use super::{DeadLetterStore, TaskStore};
use crate::models::{DeadLetterRecord, Page, Task, TaskId, TaskQuery};
use crate::state_machine::TaskStatus;

#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
    available: AtomicBool,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn ensure_available(&self, operation: &str) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!(
                "in-memory task store offline during {operation}"
            )))
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> StoreResult<bool> {
        self.ensure_available("insert")?;
        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(true)
            }
        }
    }

    async fn load(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        self.ensure_available("load")?;
        Ok(self.tasks.get(task_id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, task: &Task) -> StoreResult<bool> {
        self.ensure_available("update")?;
        let Some(mut stored) = self.tasks.get_mut(&task.task_id) else {
            return Ok(false);
        };
        if stored.version != task.version {
            return Ok(false);
        }
        let mut next = task.clone();
        next.version = task.version + 1;
        *stored = next;
        Ok(true)
    }

    async fn delete(&self, task_id: &TaskId, version: u64) -> StoreResult<bool> {
        self.ensure_available("delete")?;
        Ok(self
            .tasks
            .remove_if(task_id, |_, stored| stored.version == version)
            .is_some())
    }

    async fn query(&self, query: &TaskQuery) -> StoreResult<Page<Task>> {
        self.ensure_available("query")?;
        let mut matching: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| query.compare(a, b));

        let total = matching.len() as u64;
        let size = query.effective_size();
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(size as usize)
            .collect();
        Ok(Page::new(items, query.page, size, total))
    }

    async fn count_all(&self) -> StoreResult<u64> {
        self.ensure_available("count_all")?;
        Ok(self.tasks.len() as u64)
    }

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<u64> {
        self.ensure_available("count_by_status")?;
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == status)
            .count() as u64)
    }

    async fn average_processing_ms(&self) -> StoreResult<Option<f64>> {
        self.ensure_available("average_processing_ms")?;
        let (count, sum) = self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == TaskStatus::Completed)
            .filter_map(|entry| {
                let task = entry.value();
                match (task.started_at, task.completed_at) {
                    (Some(started), Some(completed)) => {
                        Some((completed - started).num_milliseconds().max(0) as f64)
                    }
                    _ => None,
                }
            })
            .fold((0u64, 0f64), |(count, sum), ms| (count + 1, sum + ms));

        Ok((count > 0).then(|| sum / count as f64))
    }

    async fn find_recoverable(&self, limit: u32) -> StoreResult<Vec<Task>> {
        self.ensure_available("find_recoverable")?;
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        tasks.truncate(limit as usize);
        Ok(tasks)
    }
}

#[derive(Debug)]
pub struct InMemoryDeadLetterStore {
    records: RwLock<Vec<DeadLetterRecord>>,
    available: AtomicBool,
}

impl Default for InMemoryDeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every record, oldest first
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.read().clone()
    }

    fn ensure_available(&self, operation: &str) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!(
                "in-memory dead-letter store offline during {operation}"
            )))
        }
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<bool> {
        self.ensure_available("append")?;
        let mut records = self.records.write();
        if records
            .iter()
            .any(|existing| existing.original_task_id == record.original_task_id)
        {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn find_by_task_id(&self, task_id: &TaskId) -> StoreResult<Option<DeadLetterRecord>> {
        self.ensure_available("find_by_task_id")?;
        Ok(self
            .records
            .read()
            .iter()
            .find(|record| &record.original_task_id == task_id)
            .cloned())
    }

    async fn list(&self, page: u32, size: u32) -> StoreResult<Page<DeadLetterRecord>> {
        self.ensure_available("list")?;
        let size = size.max(1);
        let records = self.records.read();
        let total = records.len() as u64;
        let offset = (page as usize).saturating_mul(size as usize);
        let items = records
            .iter()
            .rev()
            .skip(offset)
            .take(size as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, size, total))
    }

    async fn count(&self) -> StoreResult<u64> {
        self.ensure_available("count")?;
        Ok(self.records.read().len() as u64)
    }

    async fn count_by_task_type(&self, task_type: &str) -> StoreResult<u64> {
        self.ensure_available("count_by_task_type")?;
        Ok(self
            .records
            .read()
            .iter()
            .filter(|record| record.task_type == task_type)
            .count() as u64)
    }
}
