//! Role-gated write access (spec §4.7, supplementing spec §4.6): whether a
//! session may write a given bible/book/chapter, and the secure-transport
//! gate that write operations require in the non-open-installation mode.

use crate::session::Role;
use crate::session::Session;

/// How an installation is configured to grant write access, per spec:
/// an "open installation" lets any authenticated member write without a
/// per-bible grant; otherwise a translator-or-above role is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallationMode {
    #[default]
    Restricted,
    Open,
}

/// Whether the current connection is encrypted. Write operations that
/// carry credentials or content refuse to proceed over plaintext unless
/// the installation has explicitly opted out (spec §4.7: "secure-transport
/// gate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Secure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("write access requires an encrypted connection")]
    InsecureTransport,
    #[error("role {0:?} is not permitted to write")]
    InsufficientRole(Role),
}

/// The minimum role a restricted installation requires for writes.
const RESTRICTED_MIN_WRITE_ROLE: Role = Role::Translator;

/// Checks whether `session` may write, given the installation's mode and
/// the connection's transport security. Does not check per-bible
/// assignment (out of scope, spec Non-goals) — only the role/transport
/// gate.
pub fn check_write_access(
    session: &Session,
    mode: InstallationMode,
    transport: Transport,
    require_secure_transport: bool,
) -> Result<(), AccessError> {
    if require_secure_transport && transport != Transport::Secure {
        return Err(AccessError::InsecureTransport);
    }

    let allowed = match mode {
        InstallationMode::Open => session.role.at_least(Role::Member),
        InstallationMode::Restricted => session.role.at_least(RESTRICTED_MIN_WRITE_ROLE),
    };

    if allowed {
        Ok(())
    } else {
        Err(AccessError::InsufficientRole(session.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: Role) -> Session {
        Session {
            username: "u".to_string(),
            role,
        }
    }

    #[test]
    fn open_installation_allows_members() {
        assert!(check_write_access(&session(Role::Member), InstallationMode::Open, Transport::Secure, true).is_ok());
    }

    #[test]
    fn restricted_installation_requires_translator() {
        assert!(matches!(
            check_write_access(&session(Role::Member), InstallationMode::Restricted, Transport::Secure, true),
            Err(AccessError::InsufficientRole(Role::Member))
        ));
        assert!(check_write_access(&session(Role::Translator), InstallationMode::Restricted, Transport::Secure, true).is_ok());
    }

    #[test]
    fn plaintext_is_refused_when_secure_transport_is_required() {
        assert!(matches!(
            check_write_access(&session(Role::Admin), InstallationMode::Open, Transport::Plain, true),
            Err(AccessError::InsecureTransport)
        ));
    }

    #[test]
    fn plaintext_allowed_when_not_required() {
        assert!(check_write_access(&session(Role::Admin), InstallationMode::Open, Transport::Plain, false).is_ok());
    }
}
