//! Serialization of groups that touch the same external resource

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Held for the whole of one group instance
#[derive(Debug)]
pub struct ResourceGuard {
    _suite: SuiteGuard,
    _resources: Vec<OwnedMutexGuard<()>>,
}

#[derive(Debug)]
enum SuiteGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Named async locks shared by all workers of a run
#[derive(Debug, Clone, Default)]
pub struct ResourceLocks {
    suite: Arc<RwLock<()>>,
    resources: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the group may run
    ///
    /// Exclusive groups take the suite lock for writing and so run alone.
    /// Everyone else shares it and then locks each named resource in sorted
    /// order, so two groups can never wait on each other.
    pub async fn acquire(&self, resources: &[String], exclusive: bool) -> ResourceGuard {
        let suite = if exclusive {
            SuiteGuard::Exclusive(self.suite.clone().write_owned().await)
        } else {
            SuiteGuard::Shared(self.suite.clone().read_owned().await)
        };

        let mut names: Vec<&String> = resources.iter().collect();
        names.sort();
        names.dedup();

        let mut held = Vec::with_capacity(names.len());
        for name in names {
            let lock = self.lock_for(name);
            held.push(lock.lock_owned().await);
        }

        ResourceGuard {
            _suite: suite,
            _resources: held,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.resources
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
