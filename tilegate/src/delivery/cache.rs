//! Delivery cache: the collection of open dataset drivers.
//!
//! One record exists per dataset path. Opening a dataset is expensive
//! (format probing, archive parsing), so concurrent requests for the
//! same absent path coalesce into a single construction and everyone
//! observes its result. All index state sits behind one coarse mutex;
//! construction itself runs on the blocking pool with the lock
//! released, so opening one dataset never stalls lookups of others.
//!
//! Maintenance is amortized into the lookup path: every access first
//! evicts back under the resource budget if needed, then runs the
//! staleness flush if it is due.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::delivery::driver::SharedDriver;
use crate::delivery::factory::OpenDriver;
use crate::delivery::types::{OpenError, OpenInfo, OpenOptions, Resources};

/// Time between staleness flushes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Maximal time between hits in cache for a single record.
const MAX_INTERVAL_BETWEEN_HITS: Duration = Duration::from_secs(600);

/// One message per open, a few concurrent waiters in the typical case.
const WAITER_CHANNEL_CAPACITY: usize = 16;

/// Delivery cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Open-file budget; defaults to half the process file-descriptor
    /// limit.
    pub open_files_limit: Option<u64>,
    /// Memory budget in bytes; unbounded by default.
    pub memory_limit: Option<u64>,
    /// Minimum time between staleness flushes.
    pub flush_interval: Duration,
    /// Idle time after which a record is flushed.
    pub max_idle: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            open_files_limit: None,
            memory_limit: None,
            flush_interval: FLUSH_INTERVAL,
            max_idle: MAX_INTERVAL_BETWEEN_HITS,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_files_limit(mut self, limit: u64) -> Self {
        self.open_files_limit = Some(limit);
        self
    }

    pub fn with_memory_limit(mut self, limit: u64) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }
}

struct Record {
    driver: SharedDriver,
    resources: Resources,
    last_hit: Instant,
    serial: u64,
}

struct Opening {
    waiters: broadcast::Sender<Result<SharedDriver, OpenError>>,
    /// Present when this open replaces a hot-content record in place;
    /// the record's identity (serial) survives the replacement.
    previous: Option<Record>,
}

enum Slot {
    Ready(Record),
    Opening(Opening),
}

struct Index {
    slots: HashMap<String, Slot>,
    total: Resources,
    next_flush: Instant,
    next_serial: u64,
}

enum Action {
    Hit(SharedDriver),
    Wait(broadcast::Receiver<Result<SharedDriver, OpenError>>),
    Open {
        rx: broadcast::Receiver<Result<SharedDriver, OpenError>>,
        forced: bool,
    },
}

struct Inner {
    factory: Arc<dyn OpenDriver>,
    limit: Resources,
    flush_interval: Duration,
    max_idle: Duration,
    index: Mutex<Index>,
}

/// Shared handle to the delivery cache.
#[derive(Clone)]
pub struct DeliveryCache {
    inner: Arc<Inner>,
}

impl DeliveryCache {
    pub fn new(factory: Arc<dyn OpenDriver>, config: CacheConfig) -> Self {
        let limit = Resources {
            open_files: config
                .open_files_limit
                .unwrap_or_else(|| max_open_files() / 2),
            memory: config.memory_limit.unwrap_or(u64::MAX),
        };
        info!(%limit, "delivery cache cleanup limit");

        Self {
            inner: Arc::new(Inner {
                factory,
                limit,
                flush_interval: config.flush_interval,
                max_idle: config.max_idle,
                index: Mutex::new(Index {
                    slots: HashMap::new(),
                    total: Resources::default(),
                    next_flush: Instant::now() + config.flush_interval,
                    next_serial: 0,
                }),
            }),
        }
    }

    /// Driver for the dataset at `path`, opening it if necessary.
    ///
    /// A cache hit never constructs; concurrent misses on the same path
    /// trigger exactly one construction whose outcome every caller
    /// observes. Construction errors propagate and leave no record.
    pub async fn get(&self, path: &str, options: &OpenOptions) -> Result<SharedDriver, OpenError> {
        debug!(path, "getting driver for dataset");

        loop {
            match self.inner.lookup(path) {
                Action::Hit(driver) => return Ok(driver),
                Action::Wait(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // the opener vanished without reporting, start over
                    Err(_) => continue,
                },
                Action::Open { mut rx, forced } => {
                    self.spawn_open(path, options, forced);
                    match rx.recv().await {
                        Ok(result) => return result,
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    /// Explicit maintenance pass: evict over-budget records and run the
    /// staleness flush if due. Intended for periodic external callers.
    pub fn cleanup(&self) {
        let mut index = self.inner.index.lock().unwrap();
        self.inner.evict(&mut index);
        self.inner.flush(&mut index, Instant::now());
    }

    /// Number of cached records, in-flight opens included.
    pub fn entry_count(&self) -> usize {
        self.inner.index.lock().unwrap().slots.len()
    }

    /// Sum of resource costs across cached records.
    pub fn total_resources(&self) -> Resources {
        self.inner.index.lock().unwrap().total
    }

    /// Run the factory open on the blocking pool and finalize the slot,
    /// independent of the requesting task's lifetime.
    fn spawn_open(&self, path: &str, options: &OpenOptions, forced: bool) {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        let mut options = options.clone();
        options.forced_reopen = options.forced_reopen || forced;

        tokio::spawn(async move {
            let factory = Arc::clone(&inner.factory);
            let open_path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                let info = OpenInfo::probe(open_path);
                factory.open(&info, &options)
            })
            .await
            .unwrap_or_else(|err| Err(OpenError::Io(format!("driver open task failed: {err}"))));

            inner.finish_open(&path, result);
        });
    }
}

impl Inner {
    /// One pass under the lock: maintenance, then the slot decision.
    fn lookup(&self, path: &str) -> Action {
        let now = Instant::now();
        let mut index = self.index.lock().unwrap();

        // clean resource hoggers and flush changed datasets
        self.evict(&mut index);
        self.flush(&mut index, now);

        let replace = match index.slots.get_mut(path) {
            Some(Slot::Ready(record)) => {
                let replace = record.driver.hot_content()
                    && record.driver.externally_changed().unwrap_or(true);
                if !replace {
                    record.last_hit = now;
                    return Action::Hit(Arc::clone(&record.driver));
                }
                true
            }
            Some(Slot::Opening(opening)) => {
                return Action::Wait(opening.waiters.subscribe());
            }
            None => false,
        };

        let previous = if replace {
            info!(path, "reopening externally changed dataset in place");
            match index.slots.remove(path) {
                Some(Slot::Ready(record)) => {
                    index.total -= record.resources;
                    Some(record)
                }
                _ => None,
            }
        } else {
            None
        };

        let forced = previous.is_some();
        let (tx, rx) = broadcast::channel(WAITER_CHANNEL_CAPACITY);
        index.slots.insert(
            path.to_string(),
            Slot::Opening(Opening {
                waiters: tx,
                previous,
            }),
        );

        Action::Open { rx, forced }
    }

    fn finish_open(&self, path: &str, result: Result<SharedDriver, OpenError>) {
        let now = Instant::now();
        let mut index = self.index.lock().unwrap();

        // only the in-flight open owns its slot
        if !matches!(index.slots.get(path), Some(Slot::Opening(_))) {
            return;
        }
        let Some(Slot::Opening(opening)) = index.slots.remove(path) else {
            return;
        };

        match result {
            Ok(driver) => {
                let resources = driver.resources();
                let serial = match &opening.previous {
                    Some(previous) => previous.serial,
                    None => {
                        let serial = index.next_serial;
                        index.next_serial += 1;
                        serial
                    }
                };
                debug!(path, %resources, "caching open dataset");
                index.total += resources;
                index.slots.insert(
                    path.to_string(),
                    Slot::Ready(Record {
                        driver: Arc::clone(&driver),
                        resources,
                        last_hit: now,
                        serial,
                    }),
                );
                let _ = opening.waiters.send(Ok(driver));
            }
            Err(err) => {
                warn!(path, error = %err, "dataset open failed");
                if let Some(previous) = opening.previous {
                    // a failed in-place reopen keeps serving the old driver
                    index.total += previous.resources;
                    index.slots.insert(path.to_string(), Slot::Ready(previous));
                }
                let _ = opening.waiters.send(Err(err));
            }
        }
    }

    /// Evict cheapest-first until the total fits the budget again.
    fn evict(&self, index: &mut Index) {
        if !index.total.exceeds(&self.limit) {
            return;
        }
        info!(total = %index.total, limit = %self.limit, "resource limit reached");

        let mut victims: Vec<(String, Resources, u64)> = index
            .slots
            .iter()
            .filter_map(|(path, slot)| match slot {
                Slot::Ready(record) => Some((path.clone(), record.resources, record.serial)),
                Slot::Opening(_) => None,
            })
            .collect();
        victims.sort_by_key(|(_, resources, serial)| (*resources, *serial));

        for (path, resources, _) in victims {
            if !index.total.exceeds(&self.limit) {
                break;
            }
            info!(%path, %resources, "evicting cached dataset");
            index.slots.remove(&path);
            index.total -= resources;
        }
    }

    /// Remove idle and externally changed records; runs at most once per
    /// flush interval.
    fn flush(&self, index: &mut Index, now: Instant) {
        if index.next_flush > now {
            return;
        }
        index.next_flush = now + self.flush_interval;

        let kill_hit = now.checked_sub(self.max_idle);
        let Index { slots, total, .. } = index;

        slots.retain(|path, slot| {
            let Slot::Ready(record) = slot else {
                return true;
            };

            let mut remove = matches!(kill_hit, Some(limit) if record.last_hit < limit);
            if !remove {
                match record.driver.externally_changed() {
                    Ok(changed) => remove = changed,
                    Err(err) => {
                        warn!(%path, error = %err,
                              "external change test failed; removing driver");
                        remove = true;
                    }
                }
            }

            if remove {
                info!(%path, "removing cached dataset: externally changed or timed out");
                *total -= record.resources;
                return false;
            }
            true
        });
    }
}

fn max_open_files() -> u64 {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc == 0 && limit.rlim_cur != libc::RLIM_INFINITY {
        limit.rlim_cur as u64
    } else {
        1024
    }
}
