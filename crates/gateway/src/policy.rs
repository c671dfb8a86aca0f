//! PolicyEngine (`§4.2`): effective-policy resolution and quota admission.

use chrono::Utc;
use lgw_domain::model::{AccessDecision, GroupPolicy, QuotaKeys, User, DEFAULT_POLICY_ID};
use lgw_domain::{Error, Result};
use lgw_storage::{AuditStore, QuotaStore, WebUiStore};

use crate::cache::CacheLayer;
use crate::system_log::SystemLog;

/// Pick the effective policy id for `user_policy_id` + `groups`.
///
/// If the user has a non-default direct policy, it wins outright. Otherwise
/// the highest-`priority` `GroupPolicy` whose `group_name` is in `groups` is
/// used, ties broken by lexicographically smallest `group_name`. Absent any
/// match, `default`.
pub fn resolve_effective_policy(
    user_policy_id: &str,
    groups: &[String],
    group_policies: &[GroupPolicy],
) -> String {
    if user_policy_id != DEFAULT_POLICY_ID {
        return user_policy_id.to_string();
    }

    group_policies
        .iter()
        .filter(|gp| groups.iter().any(|g| g == &gp.group_name))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.group_name.cmp(&a.group_name))
        })
        .map(|gp| gp.policy_id.clone())
        .unwrap_or_else(|| DEFAULT_POLICY_ID.to_string())
}

pub struct PolicyEngine<'a> {
    pub audit: &'a AuditStore,
    pub webui: &'a WebUiStore,
    pub quota: &'a QuotaStore,
    pub cache: &'a CacheLayer,
    pub system_log: &'a SystemLog,
}

impl<'a> PolicyEngine<'a> {
    /// Fetch the user via `CacheLayer`, populating on miss.
    pub async fn load_user(&self, user_id: &str) -> Result<Option<User>> {
        if let Some(user) = self.cache.get_user(user_id) {
            return Ok(Some(user));
        }
        let user = self.audit.get_user(user_id).await?;
        if let Some(ref u) = user {
            self.cache.put_user(u.clone());
        }
        Ok(user)
    }

    /// Groups for a user; failures against the external datastore are
    /// tolerated and treated as an empty set (`§4.2`).
    pub async fn load_groups(&self, user_id: &str) -> Vec<String> {
        if let Some(groups) = self.cache.get_groups(user_id) {
            return groups;
        }
        match self.webui.groups_for_user(user_id).await {
            Ok(groups) => {
                self.cache.put_groups(user_id, groups.clone());
                groups
            }
            Err(err) => {
                self.system_log
                    .warn(format!("group lookup failed for {user_id}: {err}"));
                Vec::new()
            }
        }
    }

    async fn load_group_policies(&self) -> Vec<GroupPolicy> {
        if let Some(rows) = self.cache.get_group_policies() {
            return rows;
        }
        match self.audit.list_group_policies().await {
            Ok(rows) => {
                self.cache.put_group_policies(rows.clone());
                rows
            }
            Err(err) => {
                self.system_log
                    .warn(format!("group policy listing failed: {err}"));
                Vec::new()
            }
        }
    }

    async fn load_policy(&self, policy_id: &str) -> Result<Option<lgw_domain::model::Policy>> {
        if let Some(policy) = self.cache.get_policy(policy_id) {
            return Ok(Some(policy));
        }
        let policy = self.audit.get_policy(policy_id).await?;
        if let Some(ref p) = policy {
            self.cache.put_policy(p.clone());
        }
        Ok(policy)
    }

    /// `CheckAccess(user_id, model)` per `§4.2`.
    pub async fn check_access(&self, user_id: &str, model: &str) -> Result<AccessDecision> {
        let user = match self.load_user(user_id).await? {
            Some(u) if u.is_active() => u,
            _ => return Ok(AccessDecision::deny(Error::UserInactive.human_reason())),
        };

        let groups = self.load_groups(user_id).await;
        let group_policies = self.load_group_policies().await;
        let effective_policy_id =
            resolve_effective_policy(&user.policy_id, &groups, &group_policies);

        let policy = match self.load_policy(&effective_policy_id).await? {
            Some(p) => p,
            None => return Ok(AccessDecision::deny(Error::PolicyMissing.human_reason())),
        };

        if !policy.allows_model(model) {
            return Ok(AccessDecision::deny(Error::ModelNotAllowed.human_reason()));
        }

        let today = Utc::now().date_naive();
        let daily_key = QuotaKeys::daily(user_id, &today);
        let monthly_key = QuotaKeys::monthly(user_id, &today);
        let (daily, monthly) = self
            .quota
            .mget_counters(&daily_key, &monthly_key)
            .await
            .map_err(lgw_domain::Error::from)?;

        if !policy.is_unlimited_daily() && daily >= policy.daily_token_limit {
            return Ok(AccessDecision::deny(Error::DailyExceeded.human_reason()));
        }
        if !policy.is_unlimited_monthly() && monthly >= policy.monthly_token_limit {
            return Ok(AccessDecision::deny(Error::MonthlyExceeded.human_reason()));
        }

        Ok(AccessDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn gp(name: &str, policy: &str, priority: i32) -> GroupPolicy {
        GroupPolicy {
            group_name: name.to_string(),
            policy_id: policy.to_string(),
            priority,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn direct_non_default_policy_wins() {
        let rows = vec![gp("eng", "power", 10)];
        assert_eq!(
            resolve_effective_policy("custom", &["eng".to_string()], &rows),
            "custom"
        );
    }

    #[test]
    fn highest_priority_group_wins() {
        let rows = vec![gp("eng", "power", 10), gp("interns", "limited", 1)];
        let groups = vec!["eng".to_string(), "interns".to_string()];
        assert_eq!(
            resolve_effective_policy(DEFAULT_POLICY_ID, &groups, &rows),
            "power"
        );
    }

    #[test]
    fn ties_break_by_group_name_lexicographic_order() {
        let rows = vec![gp("zzz", "policy-z", 5), gp("aaa", "policy-a", 5)];
        let groups = vec!["zzz".to_string(), "aaa".to_string()];
        assert_eq!(
            resolve_effective_policy(DEFAULT_POLICY_ID, &groups, &rows),
            "policy-a"
        );
    }

    #[test]
    fn no_matching_group_falls_back_to_default() {
        let rows = vec![gp("eng", "power", 10)];
        assert_eq!(
            resolve_effective_policy(DEFAULT_POLICY_ID, &[], &rows),
            DEFAULT_POLICY_ID
        );
    }

    #[test]
    fn empty_groups_returns_default_policy_id() {
        assert_eq!(
            resolve_effective_policy(DEFAULT_POLICY_ID, &[], &[]),
            DEFAULT_POLICY_ID
        );
    }
}
