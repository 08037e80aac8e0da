//! PDU-constrained batching of reads and writes
//!
//! Due items are packed greedily: an item joins the current batch while
//! `sum(size + variable_overhead) < pdu_size - message_overhead` and the
//! batch holds fewer than `max_items`. An item that cannot fit even alone
//! goes through the single-item call instead of the multi-item one.

use std::ops::Range;

use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::store::DueItem;
use super::transport::{DataItem, ItemStatus, TransportError};
use crate::config::{BatchConfig, BatchLimits};

/// One planned transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Multi-item call over a contiguous range of the due list
    Multi(Range<usize>),
    /// Single-item call for an oversized item
    Single(usize),
}

/// Direction of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Scheduler counters
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub batches_sent: u64,
    pub single_item_calls: u64,
    pub items_read: u64,
    pub items_written: u64,
    pub failed_items: u64,
    pub failed_batches: u64,
}

/// Split item sizes into transport calls
pub fn plan_batches(sizes: &[usize], pdu_size: usize, limits: &BatchLimits) -> Vec<BatchPlan> {
    let budget = pdu_size.saturating_sub(limits.message_overhead);
    let max_items = limits.max_items.max(1);
    let mut plans = Vec::new();
    let mut next = 0;

    while next < sizes.len() {
        let first = next;
        let mut sum = 0usize;
        while next < sizes.len() && next - first < max_items {
            let cost = sizes[next].saturating_add(limits.variable_overhead);
            if sum.saturating_add(cost) < budget {
                sum += cost;
                next += 1;
            } else {
                break;
            }
        }

        if next == first {
            plans.push(BatchPlan::Single(first));
            next += 1;
        } else {
            plans.push(BatchPlan::Multi(first..next));
        }
    }

    plans
}

/// Issues batched reads and writes for one device
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    config: BatchConfig,
    stats: SchedulerStats,
}

impl BatchScheduler {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Read every item; returns the successful ones with their data filled
    pub async fn run_reads(
        &mut self,
        conn: &mut ConnectionManager,
        items: Vec<DueItem>,
    ) -> Vec<DueItem> {
        self.execute(conn, items, Direction::Read).await
    }

    /// Write every item; returns the successful ones
    pub async fn run_writes(
        &mut self,
        conn: &mut ConnectionManager,
        items: Vec<DueItem>,
    ) -> Vec<DueItem> {
        let items = items
            .into_iter()
            .filter(|item| {
                let ok = item.data.len() == item.byte_size();
                if !ok {
                    warn!(
                        address = %item.name,
                        len = item.data.len(),
                        "Dropping write with mismatched payload size"
                    );
                }
                ok
            })
            .collect();
        self.execute(conn, items, Direction::Write).await
    }

    async fn execute(
        &mut self,
        conn: &mut ConnectionManager,
        items: Vec<DueItem>,
        direction: Direction,
    ) -> Vec<DueItem> {
        let limits = match direction {
            Direction::Read => self.config.read,
            Direction::Write => self.config.write,
        };
        let sizes: Vec<usize> = items.iter().map(DueItem::byte_size).collect();
        let plans = plan_batches(&sizes, self.config.pdu_size, &limits);

        let mut pending: Vec<Option<DueItem>> = items.into_iter().map(Some).collect();
        let mut done = Vec::with_capacity(pending.len());

        for plan in plans {
            let range = match &plan {
                BatchPlan::Multi(range) => range.clone(),
                BatchPlan::Single(idx) => *idx..*idx + 1,
            };
            let batch: Vec<DueItem> = pending[range].iter_mut().filter_map(Option::take).collect();

            let mut data_items: Vec<DataItem> = batch
                .iter()
                .map(|item| match direction {
                    Direction::Read => DataItem::for_read(&item.address),
                    Direction::Write => DataItem::with_data(&item.address, item.data.clone()),
                })
                .collect();

            let call = Self::send(conn, &plan, &mut data_items, direction).await;
            self.stats.batches_sent += 1;
            if matches!(plan, BatchPlan::Single(_)) {
                self.stats.single_item_calls += 1;
            }

            let statuses = match call {
                Ok(statuses) => statuses,
                Err(e) => {
                    warn!(
                        direction = ?direction,
                        items = batch.len(),
                        "Batch call failed: {}",
                        e
                    );
                    self.stats.failed_batches += 1;
                    self.stats.failed_items += batch.len() as u64;
                    conn.record_failure();
                    continue;
                },
            };

            let mut batch_ok = true;
            for ((mut item, data_item), status) in batch.into_iter().zip(data_items).zip(statuses) {
                match status {
                    Ok(()) => {
                        if direction == Direction::Read {
                            item.data = data_item.data;
                            self.stats.items_read += 1;
                        } else {
                            self.stats.items_written += 1;
                        }
                        done.push(item);
                    },
                    Err(e) => {
                        batch_ok = false;
                        self.stats.failed_items += 1;
                        warn!(direction = ?direction, address = %item.name, "Item failed: {}", e);
                    },
                }
            }

            if batch_ok {
                conn.record_success();
            } else {
                self.stats.failed_batches += 1;
                conn.record_failure();
            }
        }

        debug!(direction = ?direction, ok = done.len(), "Batches complete");
        done
    }

    async fn send(
        conn: &mut ConnectionManager,
        plan: &BatchPlan,
        items: &mut [DataItem],
        direction: Direction,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let transport = conn.transport_mut();
        let statuses = match (plan, direction) {
            (BatchPlan::Multi(_), Direction::Read) => transport.read_multi(items).await?,
            (BatchPlan::Multi(_), Direction::Write) => transport.write_multi(items).await?,
            (BatchPlan::Single(_), direction) => {
                let Some(item) = items.first_mut() else {
                    return Ok(Vec::new());
                };
                let status = match direction {
                    Direction::Read => transport.read_area(item).await,
                    Direction::Write => transport.write_area(item).await,
                };
                vec![status]
            },
        };

        if statuses.len() != items.len() {
            return Err(TransportError::ProtocolError(format!(
                "expected {} item results, got {}",
                items.len(),
                statuses.len()
            )));
        }
        Ok(statuses)
    }
}
