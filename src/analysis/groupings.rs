/// Site partitioning and recombination utilities.
///
/// Every stage of the pipeline works on one site at a time. `partition_by_site`
/// turns a flat table into an ordered map keyed by site identifier,
/// `map_sites` runs a per-site computation over that map (inline, or on a
/// worker pool when `workers > 1`), and the ordered map is flattened back
/// into a table sorted by site name. Because the map is a `BTreeMap`, the
/// merged output does not depend on which worker finished first.

use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};

use chrono::NaiveDateTime;
use threadpool::ThreadPool;

use crate::model::{PipelineError, Reading, RollingRow};

/// Rows that belong to a site and sit at a point in time.
pub trait SiteRow {
    fn site(&self) -> &str;
    fn set_site(&mut self, site: String);
    fn timestamp(&self) -> NaiveDateTime;
}

impl SiteRow for Reading {
    fn site(&self) -> &str {
        &self.site
    }

    fn set_site(&mut self, site: String) {
        self.site = site;
    }

    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl SiteRow for RollingRow {
    fn site(&self) -> &str {
        &self.reading.site
    }

    fn set_site(&mut self, site: String) {
        self.reading.site = site;
    }

    fn timestamp(&self) -> NaiveDateTime {
        self.reading.timestamp
    }
}

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Groups a flat list of rows into a map keyed by site, preserving the
/// relative order of each site's rows. Surrounding whitespace is stripped
/// from the site identifier, on the key and on the row itself.
///
/// # Errors
/// - `PipelineError::Schema` — a row has a blank site identifier, so it
///   cannot be assigned to any series.
pub fn partition_by_site<T: SiteRow>(
    rows: Vec<T>,
) -> Result<BTreeMap<String, Vec<T>>, PipelineError> {
    let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();

    for (index, mut row) in rows.into_iter().enumerate() {
        let site = row.site().trim().to_string();
        if site.is_empty() {
            return Err(PipelineError::Schema(format!(
                "row {} at {} has an empty site identifier",
                index + 1,
                row.timestamp()
            )));
        }
        if site.len() != row.site().len() {
            row.set_site(site.clone());
        }
        grouped.entry(site).or_default().push(row);
    }

    Ok(grouped)
}

/// Stable-sorts one site's rows by timestamp. Returns `true` when the rows
/// were not already in order.
pub fn sort_site_rows<T: SiteRow>(rows: &mut [T]) -> bool {
    let sorted = rows.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp());
    if !sorted {
        rows.sort_by_key(|r| r.timestamp());
    }
    !sorted
}

/// Verifies that one site's timestamps are strictly increasing.
///
/// # Errors
/// - `PipelineError::Ordering` — at the first pair that goes backwards or
///   repeats a timestamp.
pub fn check_strictly_increasing<T: SiteRow>(site: &str, rows: &[T]) -> Result<(), PipelineError> {
    for pair in rows.windows(2) {
        let (previous, current) = (pair[0].timestamp(), pair[1].timestamp());
        if current <= previous {
            return Err(PipelineError::Ordering {
                site: site.to_string(),
                previous,
                current,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-site execution
// ---------------------------------------------------------------------------

/// Applies `f` to every site partition and collects the results by site.
///
/// With `workers <= 1` (or a single site) everything runs on the calling
/// thread. Otherwise each partition is moved into a job on a pool of
/// `workers` threads and results come back over a channel. When several
/// sites fail, the error of the alphabetically first one is returned, so a
/// parallel run reports the same error as a sequential one.
pub fn map_sites<T, U, F>(
    partitions: BTreeMap<String, Vec<T>>,
    workers: usize,
    f: F,
) -> Result<BTreeMap<String, U>, PipelineError>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(&str, Vec<T>) -> Result<U, PipelineError> + Send + Sync + 'static,
{
    if workers <= 1 || partitions.len() <= 1 {
        let mut results = BTreeMap::new();
        for (site, rows) in partitions {
            let value = f(&site, rows)?;
            results.insert(site, value);
        }
        return Ok(results);
    }

    let expected: Vec<String> = partitions.keys().cloned().collect();
    let pool = ThreadPool::new(workers.min(partitions.len()));
    let (tx, rx) = mpsc::channel();
    let f = Arc::new(f);

    for (site, rows) in partitions {
        let tx = tx.clone();
        let f = Arc::clone(&f);
        pool.execute(move || {
            let result = f(&site, rows);
            // The receiver only goes away once every sender is dropped.
            let _ = tx.send((site, result));
        });
    }
    drop(tx);

    let collected: BTreeMap<String, Result<U, PipelineError>> = rx.iter().collect();
    pool.join();

    if let Some(site) = expected.iter().find(|s| !collected.contains_key(*s)) {
        return Err(PipelineError::Worker(format!(
            "worker processing site '{}' terminated without a result",
            site
        )));
    }

    let mut results = BTreeMap::new();
    for (site, result) in collected {
        results.insert(site, result?);
    }
    Ok(results)
}

/// Concatenates per-site row vectors in site order.
pub fn merge_sites<U>(per_site: BTreeMap<String, Vec<U>>) -> Vec<U> {
    per_site.into_values().flatten().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
