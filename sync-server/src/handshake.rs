//! Handshake validation.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. password for the requested role
//! 2. name not already connected (case-insensitive)
//! 3. exact protocol version match

use sync_types::{HandshakeRequest, HandshakeResponse, Identity, Role, ServerPolicy};

use crate::config::ServerConfig;

/// Passwords required per role. `None` behaves like an empty password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// GM password.
    pub gm_password: Option<String>,
    /// Player password.
    pub player_password: Option<String>,
}

impl Credentials {
    /// Credentials from the `[server]` config section.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            gm_password: config.gm_password.clone(),
            player_password: config.player_password.clone(),
        }
    }

    fn expected(&self, role: Role) -> &str {
        let password = match role {
            Role::Gm => &self.gm_password,
            Role::Player => &self.player_password,
        };
        password.as_deref().unwrap_or("")
    }
}

/// Validate a handshake request.
///
/// `name_in_use` answers whether a connected identity already holds the
/// name. Returns the response to send and, on success, the new identity.
pub fn authenticate(
    request: &HandshakeRequest,
    credentials: &Credentials,
    server_version: &str,
    policy: &ServerPolicy,
    name_in_use: impl FnOnce(&str) -> bool,
) -> (HandshakeResponse, Option<Identity>) {
    let supplied = request.password.as_deref().unwrap_or("");
    if supplied != credentials.expected(request.role) {
        return (HandshakeResponse::error("Wrong password"), None);
    }

    if name_in_use(&request.name) {
        return (
            HandshakeResponse::error("That name is already in use"),
            None,
        );
    }

    if request.version != server_version {
        return (
            HandshakeResponse::error(format!(
                "Invalid version.  Client:{} Server:{}",
                request.version, server_version
            )),
            None,
        );
    }

    (
        HandshakeResponse::ok(policy.clone()),
        Some(Identity::new(request.name.clone(), request.role)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{ResponseCode, PROTOCOL_VERSION};

    fn creds() -> Credentials {
        Credentials {
            gm_password: Some("dragon".into()),
            player_password: Some("goblin".into()),
        }
    }

    fn request(name: &str, password: Option<&str>, role: Role) -> HandshakeRequest {
        HandshakeRequest::new(name, password.map(String::from), role)
    }

    fn run(
        req: &HandshakeRequest,
        creds: &Credentials,
        taken: &[&str],
    ) -> (HandshakeResponse, Option<Identity>) {
        authenticate(
            req,
            creds,
            PROTOCOL_VERSION,
            &ServerPolicy::default(),
            |name| taken.iter().any(|t| t.eq_ignore_ascii_case(name)),
        )
    }

    #[test]
    fn valid_credentials_yield_identity() {
        for (name, password, role) in [
            ("Alice", "goblin", Role::Player),
            ("Dm", "dragon", Role::Gm),
            ("ünïcode", "goblin", Role::Player),
        ] {
            let (resp, identity) = run(&request(name, Some(password), role), &creds(), &[]);
            assert_eq!(resp.code, ResponseCode::Ok);
            assert!(resp.policy.is_some());
            assert_eq!(identity, Some(Identity::new(name, role)));
        }
    }

    #[test]
    fn password_is_checked_per_role() {
        // Player password does not open the GM role
        let (resp, identity) = run(&request("Eve", Some("goblin"), Role::Gm), &creds(), &[]);
        assert_eq!(resp.code, ResponseCode::Error);
        assert_eq!(resp.message.as_deref(), Some("Wrong password"));
        assert!(identity.is_none());
    }

    #[test]
    fn open_server_accepts_missing_password() {
        let open = Credentials::default();
        let (resp, _) = run(&request("Bob", None, Role::Player), &open, &[]);
        assert!(resp.is_ok());

        let (resp, _) = run(&request("Bob", Some(""), Role::Gm), &open, &[]);
        assert!(resp.is_ok());

        let (resp, _) = run(&request("Bob", Some("x"), Role::Gm), &open, &[]);
        assert!(!resp.is_ok());
    }

    #[test]
    fn duplicate_name_rejected_regardless_of_password() {
        for password in [Some("goblin"), Some("wrong"), None] {
            let (resp, identity) = run(
                &request("bob", password, Role::Player),
                &creds(),
                &["Bob"],
            );
            assert_eq!(resp.code, ResponseCode::Error);
            assert!(identity.is_none());
        }
        let (resp, _) = run(
            &request("BOB", Some("goblin"), Role::Player),
            &creds(),
            &["Bob"],
        );
        assert_eq!(resp.message.as_deref(), Some("That name is already in use"));
    }

    #[test]
    fn password_checked_before_name() {
        let (resp, _) = run(&request("Bob", Some("nope"), Role::Player), &creds(), &["Bob"]);
        assert_eq!(resp.message.as_deref(), Some("Wrong password"));
    }

    #[test]
    fn version_must_match_exactly() {
        let mut req = request("Bob", Some("goblin"), Role::Player);
        req.version = format!("{PROTOCOL_VERSION}-beta");
        let (resp, identity) = run(&req, &creds(), &[]);
        assert!(identity.is_none());
        let message = resp.message.unwrap();
        assert!(message.starts_with("Invalid version."));
        assert!(message.contains(PROTOCOL_VERSION));
    }

    #[test]
    fn name_checked_before_version() {
        let mut req = request("Bob", Some("goblin"), Role::Player);
        req.version = "ancient".into();
        let (resp, _) = run(&req, &creds(), &["bob"]);
        assert_eq!(resp.message.as_deref(), Some("That name is already in use"));
    }
}
