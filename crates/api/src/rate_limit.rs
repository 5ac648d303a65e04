use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sliding-window counter of login attempts per username.
#[derive(Clone)]
pub struct LoginLimiter {
    attempts: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    limit: u32,
    max_keys: usize,
}

impl LoginLimiter {
    pub fn new(window: Duration, limit: u32, max_keys: usize) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
            max_keys,
        }
    }

    /// Records an attempt for `username`. Returns false once the window
    /// already holds `limit` attempts. A limit of 0 disables throttling.
    pub fn allow(&self, username: &str) -> bool {
        if self.limit == 0 {
            return true;
        }

        let now = Instant::now();
        let key = username.trim().to_lowercase();
        let mut attempts = self.lock();

        let queue = attempts.entry(key).or_default();
        expire(queue, now, self.window);
        if queue.len() >= self.limit as usize {
            return false;
        }
        queue.push_back(now);

        if attempts.len() > self.max_keys {
            attempts.retain(|_, queue| {
                expire(queue, now, self.window);
                !queue.is_empty()
            });
        }
        if attempts.len() > self.max_keys {
            let overflow = attempts.len() - self.max_keys;
            let oldest = attempts
                .iter()
                .filter_map(|(key, queue)| queue.back().map(|last| (*last, key.clone())))
                .collect::<std::collections::BTreeSet<_>>();
            for (_, key) in oldest.into_iter().take(overflow) {
                attempts.remove(&key);
            }
        }

        true
    }

    /// Forgets the attempts of `username` after a successful login.
    pub fn reset(&self, username: &str) {
        self.lock().remove(&username.trim().to_lowercase());
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn expire(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = queue.front() {
        if now.duration_since(*front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}
