//! Short-TTL in-process memoization for user, group, and policy reads
//! (`§4.3`).
//!
//! Three independent maps, each guarded by its own `parking_lot::Mutex` so a
//! slow populate on one never blocks reads of the others. A 60 s TTL is
//! enough that cross-process invalidation is unnecessary: an admin write
//! invalidates the local entry immediately, and every other replica's copy
//! expires on its own within one TTL window (`§4.3`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lgw_domain::model::{GroupPolicy, Policy, User};
use parking_lot::Mutex;

const TTL: Duration = Duration::from_secs(60);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

struct TtlMap<T: Clone> {
    inner: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: Clone> TtlMap<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        let map = self.inner.lock();
        map.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn put(&self, key: String, value: T) {
        self.inner.lock().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + TTL,
            },
        );
    }

    fn invalidate(&self, key: &str) {
        self.inner.lock().remove(key);
    }
}

pub struct CacheLayer {
    users: TtlMap<User>,
    groups: TtlMap<Vec<String>>,
    policies: TtlMap<Policy>,
    group_policies: TtlMap<Vec<GroupPolicy>>,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self {
            users: TtlMap::new(),
            groups: TtlMap::new(),
            policies: TtlMap::new(),
            group_policies: TtlMap::new(),
        }
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.get(id)
    }

    pub fn put_user(&self, user: User) {
        self.users.put(user.id.clone(), user);
    }

    pub fn invalidate_user(&self, id: &str) {
        self.users.invalidate(id);
    }

    pub fn get_groups(&self, identifier: &str) -> Option<Vec<String>> {
        self.groups.get(identifier)
    }

    pub fn put_groups(&self, identifier: &str, groups: Vec<String>) {
        self.groups.put(identifier.to_string(), groups);
    }

    pub fn get_policy(&self, id: &str) -> Option<Policy> {
        self.policies.get(id)
    }

    pub fn put_policy(&self, policy: Policy) {
        self.policies.put(policy.id.clone(), policy);
    }

    pub fn invalidate_policy(&self, id: &str) {
        self.policies.invalidate(id);
    }

    /// Group-policy listing is cached under one fixed key: it is always read
    /// in full to resolve priority ties (`§4.2`).
    pub fn get_group_policies(&self) -> Option<Vec<GroupPolicy>> {
        self.group_policies.get("all")
    }

    pub fn put_group_policies(&self, rows: Vec<GroupPolicy>) {
        self.group_policies.put("all".to_string(), rows);
    }

    pub fn invalidate_group_policies(&self) {
        self.group_policies.invalidate("all");
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            is_active: 1,
            policy_id: "default".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn miss_then_populate_then_hit() {
        let cache = CacheLayer::new();
        assert!(cache.get_user("a@x.com").is_none());
        cache.put_user(user("a@x.com"));
        assert_eq!(cache.get_user("a@x.com").unwrap().id, "a@x.com");
    }

    #[test]
    fn invalidate_clears_entry() {
        let cache = CacheLayer::new();
        cache.put_user(user("a@x.com"));
        cache.invalidate_user("a@x.com");
        assert!(cache.get_user("a@x.com").is_none());
    }
}
