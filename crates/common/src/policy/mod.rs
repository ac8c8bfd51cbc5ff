//! Access policy
//!
//! Pure decisions over a caller, an action and a resource. Checks run in a
//! fixed order: authentication, existence, ownership/visibility,
//! subscription, then payload validation.

use crate::db::models::{Document, Role, Subscription, User};
use crate::errors::{AppError, Result};

/// The authenticated principal behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub subscription: Subscription,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            uid: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            subscription: user.subscription,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // Read tier
    Read,
    Download,
    ListAnalyses,
    Ask,
    ViewStatus,

    // Owner writes
    Update,
    Delete,
    Process,
    Reanalyze,
    DeriveAnalysis,
    Feedback,

    // Admin-only writes
    ForceDelete,
    ManageUser,
    Broadcast,
}

impl Action {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Action::Read | Action::Download | Action::ListAnalyses | Action::Ask | Action::ViewStatus
        )
    }

    /// Read actions available on public resources to anyone
    pub fn is_public_read(&self) -> bool {
        matches!(
            self,
            Action::Read | Action::Download | Action::ListAnalyses | Action::Ask
        )
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(self, Action::ForceDelete | Action::ManageUser | Action::Broadcast)
    }
}

/// The ownership facts of a resource
#[derive(Debug, Clone, Copy)]
pub struct ResourceRef<'a> {
    pub owner_id: &'a str,
    pub is_public: bool,
}

impl<'a> From<&'a Document> for ResourceRef<'a> {
    fn from(doc: &'a Document) -> Self {
        Self {
            owner_id: &doc.owner_id,
            is_public: doc.is_public,
        }
    }
}

/// Decide whether `caller` may perform `action` on `resource`
pub fn can(caller: Option<&Caller>, action: Action, resource: ResourceRef<'_>) -> bool {
    if let Some(caller) = caller {
        if caller.is_admin() && (action.is_read() || action.is_admin_only()) {
            return true;
        }
        if caller.uid == resource.owner_id && !action.is_admin_only() {
            return true;
        }
    }
    resource.is_public && action.is_public_read()
}

/// `can` as a `Result`, failing with `ACCESS_DENIED`
pub fn authorize(caller: Option<&Caller>, action: Action, resource: ResourceRef<'_>) -> Result<()> {
    if can(caller, action, resource) {
        Ok(())
    } else {
        Err(AppError::AccessDenied)
    }
}

/// Require an admin caller for resource-less admin actions
pub fn require_admin(caller: &Caller) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::AccessDenied)
    }
}

pub fn has_subscription(caller: &Caller, tiers: &[Subscription]) -> bool {
    tiers.contains(&caller.subscription)
}

/// Fail with `SUBSCRIPTION_REQUIRED` carrying current and required tiers
pub fn require_subscription(caller: &Caller, tiers: &[Subscription]) -> Result<()> {
    if has_subscription(caller, tiers) {
        return Ok(());
    }
    let required: Vec<&str> = tiers.iter().map(|t| t.as_str()).collect();
    Err(AppError::subscription_required(caller.subscription.as_str(), &required))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(uid: &str, role: Role, subscription: Subscription) -> Caller {
        Caller {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
            role,
            subscription,
        }
    }

    const PRIVATE: ResourceRef<'static> = ResourceRef {
        owner_id: "alice",
        is_public: false,
    };

    const PUBLIC: ResourceRef<'static> = ResourceRef {
        owner_id: "alice",
        is_public: true,
    };

    #[test]
    fn test_owner_has_every_non_admin_action() {
        let alice = caller("alice", Role::User, Subscription::Free);
        for action in [Action::Read, Action::Update, Action::Delete, Action::Process, Action::ViewStatus] {
            assert!(can(Some(&alice), action, PRIVATE), "{:?}", action);
        }
        assert!(!can(Some(&alice), Action::ForceDelete, PRIVATE));
    }

    #[test]
    fn test_stranger_denied_on_private() {
        let bob = caller("bob", Role::User, Subscription::Enterprise);
        assert!(!can(Some(&bob), Action::Read, PRIVATE));
        assert!(!can(Some(&bob), Action::Ask, PRIVATE));
        assert_eq!(
            authorize(Some(&bob), Action::Update, PRIVATE).unwrap_err().code(),
            crate::errors::ErrorCode::AccessDenied
        );
    }

    #[test]
    fn test_public_is_read_only() {
        let bob = caller("bob", Role::User, Subscription::Free);
        assert!(can(Some(&bob), Action::Read, PUBLIC));
        assert!(can(None, Action::Download, PUBLIC));
        assert!(can(Some(&bob), Action::Ask, PUBLIC));
        assert!(!can(Some(&bob), Action::ViewStatus, PUBLIC));
        assert!(!can(Some(&bob), Action::Update, PUBLIC));
        assert!(!can(None, Action::Delete, PUBLIC));
    }

    #[test]
    fn test_admin_reads_but_does_not_own() {
        let admin = caller("root", Role::Admin, Subscription::Free);
        assert!(can(Some(&admin), Action::Read, PRIVATE));
        assert!(can(Some(&admin), Action::ForceDelete, PRIVATE));
        assert!(!can(Some(&admin), Action::Reanalyze, PRIVATE));
        assert!(!can(Some(&admin), Action::Update, PRIVATE));
    }

    #[test]
    fn test_subscription_gate() {
        let free = caller("alice", Role::User, Subscription::Free);
        let err = require_subscription(&free, Subscription::PAID).unwrap_err();
        let details = err.details().unwrap();
        assert_eq!(details["currentPlan"], "free");
        assert_eq!(details["requiredPlans"][0], "premium");

        let premium = caller("alice", Role::User, Subscription::Premium);
        assert!(require_subscription(&premium, Subscription::PAID).is_ok());
        assert!(!has_subscription(&premium, Subscription::ENTERPRISE_ONLY));
    }
}
