use crate::training::JobObject;

/// Label on a job's custom resource naming the user who submitted it.
pub const USER_ID_LABEL: &str = "arena.kubeflow.org/uid";

/// Who is asking, and whether namespace isolation applies to them.
pub trait IdentityProvider: Send + Sync {
    fn caller_id(&self) -> Option<String>;

    fn is_admin(&self) -> bool;

    fn isolate_user_in_namespace(&self) -> bool;

    /// Whether the caller may see `job`.
    ///
    /// Under isolation a caller without an id sees no job, labelled or not.
    fn may_access(&self, job: &JobObject) -> bool {
        if !self.isolate_user_in_namespace() || self.is_admin() {
            return true;
        }
        let Some(caller) = self.caller_id() else {
            return false;
        };
        job.labels().get(USER_ID_LABEL).is_some_and(|owner| *owner == caller)
    }
}

/// Identity fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub user_id: Option<String>,
    pub admin: bool,
    pub isolate_user_in_namespace: bool,
}

impl IdentityProvider for StaticIdentity {
    fn caller_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn is_admin(&self) -> bool {
        self.admin
    }

    fn isolate_user_in_namespace(&self) -> bool {
        self.isolate_user_in_namespace
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_log::test;

    use super::*;
    use crate::mock::test_job;
    use crate::training::JobType;

    fn owned_by(user: &str) -> JobObject {
        let JobObject::Tf(mut job) = test_job(JobType::TfJob, "train", "ns") else {
            unreachable!()
        };
        job.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(USER_ID_LABEL.to_string(), user.to_string());
        JobObject::Tf(job)
    }

    #[test]
    fn isolation_off_allows_everyone() {
        let identity = StaticIdentity {
            user_id: Some("bob".to_string()),
            ..Default::default()
        };
        assert!(identity.may_access(&owned_by("alice")));
    }

    #[test]
    fn isolation_restricts_to_owner() {
        let identity = StaticIdentity {
            user_id: Some("bob".to_string()),
            admin: false,
            isolate_user_in_namespace: true,
        };
        assert!(!identity.may_access(&owned_by("alice")));
        assert!(identity.may_access(&owned_by("bob")));

        let admin = StaticIdentity {
            admin: true,
            ..identity
        };
        assert!(admin.may_access(&owned_by("alice")));
    }

    #[test]
    fn isolated_caller_without_id_sees_nothing() {
        let anonymous = StaticIdentity {
            user_id: None,
            admin: false,
            isolate_user_in_namespace: true,
        };
        let unlabelled = test_job(JobType::TfJob, "train", "ns");
        assert!(!anonymous.may_access(&unlabelled));
        assert!(!anonymous.may_access(&owned_by("alice")));

        let bob = StaticIdentity {
            user_id: Some("bob".to_string()),
            ..anonymous
        };
        assert!(!bob.may_access(&unlabelled));
    }
}
