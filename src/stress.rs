//! Stress run
//!
//! Races reader threads against writer threads on one key of a shared
//! store and checks what they saw.

use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use tracing::{error, info};

use crate::accessor::SyncStore;
use crate::codec::SnapshotCodec;
use crate::error::Result;
use crate::store::KeyValueStore;

/// Value the key holds before the threads start
pub const SEED_VALUE: &str = "initialValue";

/// Value every writer thread stores
pub const STRESS_VALUE: &str = "concurrentValue";

/// What a stress run observed
#[derive(Debug, Clone)]
pub struct StressReport {
    /// One entry per reader thread, in completion order
    pub observations: Vec<Option<String>>,

    /// Value of the key after every thread finished
    pub final_value: Option<String>,

    /// Value the key must end with
    pub expected: &'static str,

    /// Highest number of simultaneous readers the coordinator saw
    pub peak_readers: usize,

    /// Reader capacity of the store
    pub capacity: usize,

    /// Threads that panicked
    pub panicked: usize,
}

impl StressReport {
    /// No panics, no foreign values read, the final value is the expected one
    /// and the reader bound held
    pub fn passed(&self) -> bool {
        let clean_reads = self
            .observations
            .iter()
            .all(|seen| matches!(seen.as_deref(), Some(SEED_VALUE) | Some(STRESS_VALUE)));

        self.panicked == 0
            && clean_reads
            && self.final_value.as_deref() == Some(self.expected)
            && self.peak_readers <= self.capacity
    }
}

/// Seed `key`, start `read_tasks` readers and `write_tasks` writers
/// interleaved, wait for all of them and report
pub fn run<C>(
    store: Arc<SyncStore<String, C>>,
    key: &str,
    read_tasks: usize,
    write_tasks: usize,
) -> Result<StressReport>
where
    C: SnapshotCodec + 'static,
{
    store.try_set(key, SEED_VALUE.to_string())?;

    let (tx, rx) = channel::unbounded::<Option<String>>();
    let mut handles = Vec::with_capacity(read_tasks + write_tasks);

    for i in 0..read_tasks.max(write_tasks) {
        if i < read_tasks {
            let store = Arc::clone(&store);
            let tx = tx.clone();
            let key = key.to_string();
            handles.push(thread::spawn(move || {
                let _ = tx.send(store.get(&key));
            }));
        }
        if i < write_tasks {
            let store = Arc::clone(&store);
            let key = key.to_string();
            handles.push(thread::spawn(move || {
                store.set(&key, STRESS_VALUE.to_string());
            }));
        }
    }
    drop(tx);

    let mut panicked = 0;
    for handle in handles {
        if handle.join().is_err() {
            panicked += 1;
        }
    }
    if panicked > 0 {
        error!(panicked = panicked, "Stress threads panicked");
    }

    let report = StressReport {
        observations: rx.iter().collect(),
        final_value: store.try_get(key)?,
        expected: if write_tasks > 0 { STRESS_VALUE } else { SEED_VALUE },
        peak_readers: store.coordinator().peak_readers(),
        capacity: store.coordinator().capacity(),
        panicked,
    };

    info!(
        readers = read_tasks,
        writers = write_tasks,
        peak_readers = report.peak_readers,
        passed = report.passed(),
        "Stress run finished"
    );
    Ok(report)
}
