use tracing::{debug, error, warn};

use crate::backend::Backend;
use crate::db::Session;

/// What a protected view requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Farmer,
    Admin,
}

impl Access {
    fn login_notice(&self) -> &'static str {
        match self {
            Access::Farmer => "Please login to access the dashboard",
            Access::Admin => "Please login to access the admin dashboard",
        }
    }
}

#[derive(Debug)]
pub enum GateDecision {
    Allow(Session),
    Redirect { to: &'static str, notice: String },
}

impl GateDecision {
    fn to_login(notice: impl Into<String>) -> Self {
        GateDecision::Redirect {
            to: "/login",
            notice: notice.into(),
        }
    }
}

/// Resolve the presented token and decide whether the view may render.
///
/// Any failure ends in a redirect to the login page; nothing is retried.
pub async fn gate(backend: &dyn Backend, token: Option<&str>, access: Access) -> GateDecision {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return GateDecision::to_login(access.login_notice());
    };

    let session = match backend.get_session(token).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            debug!("No live session for presented token");
            return GateDecision::to_login(access.login_notice());
        }
        Err(e) => {
            error!(error = %e, "Session lookup failed");
            return GateDecision::to_login(access.login_notice());
        }
    };

    if access == Access::Farmer {
        return GateDecision::Allow(session);
    }

    match backend.is_admin(&session, &session.user.id).await {
        Ok(true) => GateDecision::Allow(session),
        Ok(false) => {
            warn!(user_id = %session.user.id, "Non-admin denied admin view");
            GateDecision::to_login("Admin access required")
        }
        Err(e) => {
            error!(user_id = %session.user.id, error = %e, "Error checking admin status");
            GateDecision::to_login("Error verifying admin status")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{account, backend, Faulty};

    fn redirect_notice(decision: GateDecision) -> String {
        match decision {
            GateDecision::Redirect { to, notice } => {
                assert_eq!(to, "/login");
                notice
            }
            GateDecision::Allow(_) => panic!("expected a redirect"),
        }
    }

    #[tokio::test]
    async fn test_absent_session_redirects_to_login() {
        let (backend, _dir) = backend().await;

        let notice = redirect_notice(gate(&backend, None, Access::Farmer).await);
        assert_eq!(notice, "Please login to access the dashboard");

        let notice = redirect_notice(gate(&backend, Some(""), Access::Admin).await);
        assert_eq!(notice, "Please login to access the admin dashboard");

        let notice = redirect_notice(gate(&backend, Some("unknown"), Access::Farmer).await);
        assert_eq!(notice, "Please login to access the dashboard");
    }

    #[tokio::test]
    async fn test_farmer_view_allows_any_session() {
        let (backend, _dir) = backend().await;
        backend
            .sign_up(&account("amina@farm.test", "Amina", "0711000111"))
            .await
            .unwrap();
        let session = backend.sign_in("amina@farm.test", "secret-pass").await.unwrap();

        match gate(&backend, Some(&session.access_token), Access::Farmer).await {
            GateDecision::Allow(s) => assert_eq!(s.user.id, session.user.id),
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_negative_admin_predicate_redirects() {
        let (backend, _dir) = backend().await;
        backend
            .sign_up(&account("amina@farm.test", "Amina", "0711000111"))
            .await
            .unwrap();
        let session = backend.sign_in("amina@farm.test", "secret-pass").await.unwrap();

        let notice =
            redirect_notice(gate(&backend, Some(&session.access_token), Access::Admin).await);
        assert_eq!(notice, "Admin access required");
    }

    #[tokio::test]
    async fn test_positive_admin_predicate_renders() {
        let (backend, _dir) = backend().await;
        backend
            .ensure_admin_user("admin@farm.test", "admin-pass")
            .await
            .unwrap();
        let session = backend.sign_in("admin@farm.test", "admin-pass").await.unwrap();

        assert!(matches!(
            gate(&backend, Some(&session.access_token), Access::Admin).await,
            GateDecision::Allow(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_admin_check_redirects_with_error() {
        let (backend, _dir) = backend().await;
        backend
            .ensure_admin_user("admin@farm.test", "admin-pass")
            .await
            .unwrap();
        let session = backend.sign_in("admin@farm.test", "admin-pass").await.unwrap();

        let mut faulty = Faulty::new(backend);
        faulty.fail_admin_check = true;

        let notice =
            redirect_notice(gate(&faulty, Some(&session.access_token), Access::Admin).await);
        assert_eq!(notice, "Error verifying admin status");
    }
}
