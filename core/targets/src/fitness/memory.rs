//! In-memory weight entry service for testing.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use scalesync_common::{Error, Result};

use super::api::{WeightEntry, WeightEntryApi, WeightEntryForm, WeightEntryPage, DATE_FORMAT};

#[derive(Default)]
struct Entries {
    next_id: u64,
    by_id: BTreeMap<u64, (NaiveDate, f64)>,
    rejected_dates: HashSet<NaiveDate>,
}

/// Paginated in-memory weight entry service.
///
/// Ids are assigned sequentially from 1. Listings return at most
/// `page_size` entries ordered by id.
pub struct MemoryWeightEntryApi {
    page_size: usize,
    entries: Mutex<Entries>,
    reject_removes: AtomicBool,
    phantom_count: AtomicBool,
    lists: AtomicUsize,
    creates: AtomicUsize,
    patches: AtomicUsize,
    removes: AtomicUsize,
}

impl MemoryWeightEntryApi {
    pub fn new() -> Self {
        Self::with_page_size(20)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            entries: Mutex::new(Entries::default()),
            reject_removes: AtomicBool::new(false),
            phantom_count: AtomicBool::new(false),
            lists: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            patches: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    /// Store an entry directly, returning its id.
    pub async fn seed(&self, date: NaiveDate, weight: f64) -> u64 {
        let mut entries = self.entries.lock().await;
        entries.next_id += 1;
        let id = entries.next_id;
        entries.by_id.insert(id, (date, weight));
        id
    }

    /// Answer creates for `date` with HTTP 400.
    pub async fn reject_date(&self, date: NaiveDate) {
        self.entries.lock().await.rejected_dates.insert(date);
    }

    /// Answer every delete with HTTP 403.
    pub fn set_reject_removes(&self, reject: bool) {
        self.reject_removes.store(reject, Ordering::SeqCst);
    }

    /// Report a non-zero count with no entries, like a stale listing cache.
    pub fn set_phantom_count(&self, phantom: bool) {
        self.phantom_count.store(phantom, Ordering::SeqCst);
    }

    /// All stored entries ordered by id.
    pub async fn entries(&self) -> Vec<WeightEntry> {
        let entries = self.entries.lock().await;
        entries.by_id.iter().map(|(id, entry)| to_entry(*id, entry)).collect()
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.list_calls() + self.create_calls() + self.patch_calls() + self.remove_calls()
    }
}

impl Default for MemoryWeightEntryApi {
    fn default() -> Self {
        Self::new()
    }
}

fn to_entry(id: u64, (date, weight): &(NaiveDate, f64)) -> WeightEntry {
    WeightEntry {
        id,
        date: Some(date.format(DATE_FORMAT).to_string()),
        weight: Some(*weight),
    }
}

#[async_trait]
impl WeightEntryApi for MemoryWeightEntryApi {
    async fn list(&self, date: Option<NaiveDate>) -> Result<WeightEntryPage> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().await;

        if self.phantom_count.load(Ordering::SeqCst) {
            return Ok(WeightEntryPage {
                count: entries.by_id.len().max(1) as i64,
                next: None,
                previous: None,
                results: Vec::new(),
            });
        }

        let matching: Vec<WeightEntry> = entries
            .by_id
            .iter()
            .filter(|(_, (entry_date, _))| date.map_or(true, |d| d == *entry_date))
            .map(|(id, entry)| to_entry(*id, entry))
            .collect();

        let count = matching.len();
        let next = (count > self.page_size).then(|| "weightentry/?page=2".to_string());
        Ok(WeightEntryPage {
            count: count as i64,
            next,
            previous: None,
            results: matching.into_iter().take(self.page_size).collect(),
        })
    }

    async fn create(&self, form: &WeightEntryForm) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        if entries.rejected_dates.contains(&form.date) {
            return Err(Error::Api {
                status: 400,
                body: format!("{{\"date\":[\"rejected {}\"]}}", form.date_field()),
            });
        }
        entries.next_id += 1;
        let id = entries.next_id;
        entries.by_id.insert(id, (form.date, form.weight));
        Ok(())
    }

    async fn patch(&self, id: u64, form: &WeightEntryForm) -> Result<()> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().await;
        match entries.by_id.get_mut(&id) {
            Some(entry) => {
                *entry = (form.date, form.weight);
                Ok(())
            }
            None => Err(Error::Api {
                status: 404,
                body: "{\"detail\":\"Not found.\"}".to_string(),
            }),
        }
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.reject_removes.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 403,
                body: "{\"detail\":\"You do not have permission to perform this action.\"}"
                    .to_string(),
            });
        }
        let mut entries = self.entries.lock().await;
        match entries.by_id.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::Api {
                status: 404,
                body: "{\"detail\":\"Not found.\"}".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_is_paginated() {
        let api = MemoryWeightEntryApi::with_page_size(2);
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        for _ in 0..3 {
            api.seed(date, 70.0).await;
        }

        let page = api.list(None).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results.len(), 2);
        assert!(page.next.is_some());
    }

    #[tokio::test]
    async fn test_listing_filters_by_date() {
        let api = MemoryWeightEntryApi::new();
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let jan6 = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        api.seed(jan5, 70.0).await;
        let id = api.seed(jan6, 71.0).await;

        let page = api.list(Some(jan6)).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results[0].id, id);
    }
}
