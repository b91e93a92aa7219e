// ABOUTME: Restartable full-table scan that hands out fixed-size batches and checkpoints per page.
// ABOUTME: A page's continuation cursor is saved only after every batch of that page was handed off.

use std::collections::VecDeque;

use keyshift_core::{Cursor, Item, KeyValueStore, StoreError};
use keyshift_store::{CheckpointError, CheckpointStore};
use thiserror::Error;

use crate::config::ScanSettings;

/// Errors that stop the scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan request failed: {0}")]
    Store(#[from] StoreError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Pull-based cursor over a table. Each call to [`ScanCursor::next_batch`]
/// returns the next batch, fetching a new page (and checkpointing the
/// previous one) only when the current page is used up.
pub struct ScanCursor<'a, T: ?Sized> {
    table: &'a T,
    checkpoint: &'a CheckpointStore,
    page_limit: usize,
    batch_size: usize,
    next_start: Option<Cursor>,
    pending: VecDeque<Vec<Item>>,
    page_open: bool,
    finished: bool,
    pages_fetched: usize,
    pages_completed: usize,
    items_yielded: usize,
}

impl<'a, T: KeyValueStore + ?Sized> ScanCursor<'a, T> {
    /// Start a scan at the saved checkpoint, or at the beginning of the table
    /// when `reset` is set or no usable checkpoint exists.
    pub fn open(
        table: &'a T,
        checkpoint: &'a CheckpointStore,
        settings: &ScanSettings,
        reset: bool,
    ) -> Result<Self, ScanError> {
        let next_start = checkpoint.load(reset)?;
        match &next_start {
            Some(cursor) => tracing::info!("resuming scan after checkpoint {:?}", cursor),
            None => tracing::info!("scanning from the start of the table"),
        }

        Ok(Self {
            table,
            checkpoint,
            page_limit: settings.page_limit.max(1),
            batch_size: settings.batch_size.max(1),
            next_start,
            pending: VecDeque::new(),
            page_open: false,
            finished: false,
            pages_fetched: 0,
            pages_completed: 0,
            items_yielded: 0,
        })
    }

    /// Return the next batch, or None once the table is exhausted. Calling
    /// this after the last batch of a page marks that page as processed and
    /// persists its continuation cursor before anything else is fetched.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Item>>, ScanError> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                self.items_yielded += batch.len();
                return Ok(Some(batch));
            }

            if self.page_open {
                self.close_page()?;
            }

            if self.finished {
                return Ok(None);
            }

            let page = self
                .table
                .scan(self.page_limit, self.next_start.as_ref())
                .await?;
            self.pages_fetched += 1;
            tracing::debug!(
                "fetched page {} with {} items",
                self.pages_fetched,
                page.items.len()
            );

            let mut items = page.items;
            while !items.is_empty() {
                let rest = items.split_off(self.batch_size.min(items.len()));
                self.pending.push_back(items);
                items = rest;
            }
            self.next_start = page.last_key;
            self.page_open = true;
        }
    }

    /// Persist the current page's continuation cursor if every batch of it
    /// has already been handed out. Nothing is fetched.
    pub fn checkpoint_completed_page(&mut self) -> Result<(), ScanError> {
        if self.page_open && self.pending.is_empty() {
            self.close_page()?;
        }
        Ok(())
    }

    fn close_page(&mut self) -> Result<(), ScanError> {
        self.checkpoint.save(self.next_start.as_ref())?;
        self.page_open = false;
        self.pages_completed += 1;
        if self.next_start.is_none() {
            self.finished = true;
            tracing::info!(
                "scan complete: {} pages, {} items",
                self.pages_completed,
                self.items_yielded
            );
        }
        Ok(())
    }

    /// Cursor the scan will resume from once the current page is done.
    pub fn resume_point(&self) -> Option<&Cursor> {
        self.next_start.as_ref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Pages whose batches were all handed off and whose cursor was saved.
    pub fn pages_completed(&self) -> usize {
        self.pages_completed
    }

    pub fn items_yielded(&self) -> usize {
        self.items_yielded
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
