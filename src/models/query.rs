//! Listing queries over the task store: status filter, sorting and
//! zero-indexed pagination.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::task::Task;
use crate::constants::system;
use crate::state_machine::TaskStatus;

/// Sortable task fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    CompletedAt,
    Priority,
    Status,
    TaskType,
    AttemptCount,
}

impl SortField {
    /// Backing column in the relational schema
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::CompletedAt => "completed_at",
            Self::Priority => "priority_level",
            Self::Status => "status",
            Self::TaskType => "task_type",
            Self::AttemptCount => "attempt_count",
        }
    }

    /// Ascending comparison of two records on this field
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            // Unfinished tasks sort as if their completion were in the future
            Self::CompletedAt => match (a.completed_at, b.completed_at) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            Self::Priority => a.priority.cmp(&b.priority),
            Self::Status => a.status.as_str().cmp(b.status.as_str()),
            Self::TaskType => a.task_type.cmp(&b.task_type),
            Self::AttemptCount => a.attempt_count.cmp(&b.attempt_count),
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" | "created_at" => Ok(Self::CreatedAt),
            "completedAt" | "completed_at" => Ok(Self::CompletedAt),
            "priority" => Ok(Self::Priority),
            "status" => Ok(Self::Status),
            "taskType" | "task_type" => Ok(Self::TaskType),
            "attemptCount" | "attempt_count" => Ok(Self::AttemptCount),
            _ => Err(format!("Unsupported sort field: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Null placement matching the in-memory comparator: nulls are largest
    pub fn nulls_sql(&self) -> &'static str {
        match self {
            Self::Asc => "NULLS LAST",
            Self::Desc => "NULLS FIRST",
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(format!("Unsupported sort direction: {s}"))
        }
    }
}

/// Task listing request. Defaults to every status, first page, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    /// Zero-indexed page number
    pub page: u32,
    pub size: u32,
    pub sort_by: SortField,
    pub direction: SortDirection,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 0,
            size: system::DEFAULT_PAGE_SIZE,
            sort_by: SortField::default(),
            direction: SortDirection::default(),
        }
    }
}

impl TaskQuery {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, page: u32, size: u32) -> Self {
        self.page = page;
        self.size = size;
        self
    }

    pub fn sorted_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort_by = field;
        self.direction = direction;
        self
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`
    pub fn effective_size(&self) -> u32 {
        self.size.clamp(1, system::MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.effective_size())
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
    }

    /// Comparator honoring field and direction; ties fall back to task id so
    /// paging is stable.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let ordering = self.sort_by.compare(a, b).then_with(|| a.task_id.cmp(&b.task_id));
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, size: u32, total_items: u64) -> Self {
        let size = size.max(1);
        Self {
            items,
            page,
            size,
            total_items,
            total_pages: total_items.div_ceil(u64::from(size)),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages
    }
}
