use awgbot_common::units::{parse_lifetime, parse_traffic_limit, UnitParseError};
use awgbot_common::{PeerName, PeerNameError};
use chrono::Duration;
use thiserror::Error;

use super::lifecycle::ProvisionRequest;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Input does not fit the current step: {0}")]
    UnexpectedInput(&'static str),
    #[error("Invalid peer name: {0}")]
    InvalidName(#[from] PeerNameError),
    #[error("Invalid lifetime: {0}")]
    InvalidLifetime(#[source] UnitParseError),
    #[error("Invalid traffic limit: {0}")]
    InvalidQuota(#[source] UnitParseError),
}

/// Where one admin is in the add-peer dialogue. Each step carries exactly the
/// answers collected so far; a failed transition leaves the state as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AdminSession {
    #[default]
    Idle,
    AwaitingName,
    AwaitingLifetime {
        name: PeerName,
        ipv6: bool,
    },
    AwaitingQuota {
        name: PeerName,
        ipv6: bool,
        lifetime: Option<Duration>,
    },
}

impl AdminSession {
    pub fn begin(&mut self) {
        *self = AdminSession::AwaitingName;
    }

    pub fn cancel(&mut self) {
        *self = AdminSession::Idle;
    }

    pub fn enter_name(&mut self, raw: &str, ipv6: bool) -> Result<(), SessionError> {
        if *self != AdminSession::AwaitingName {
            return Err(SessionError::UnexpectedInput("not waiting for a name"));
        }
        let name = PeerName::parse(raw)?;
        *self = AdminSession::AwaitingLifetime { name, ipv6 };
        Ok(())
    }

    pub fn choose_lifetime(&mut self, choice: &str) -> Result<(), SessionError> {
        let AdminSession::AwaitingLifetime { name, ipv6 } = self else {
            return Err(SessionError::UnexpectedInput("not waiting for a lifetime"));
        };
        let lifetime = parse_lifetime(choice).map_err(SessionError::InvalidLifetime)?;
        *self = AdminSession::AwaitingQuota {
            name: name.clone(),
            ipv6: *ipv6,
            lifetime,
        };
        Ok(())
    }

    /// Last step: yields the finished request and returns to `Idle`.
    pub fn choose_quota(&mut self, choice: &str) -> Result<ProvisionRequest, SessionError> {
        let AdminSession::AwaitingQuota { name, ipv6, lifetime } = self else {
            return Err(SessionError::UnexpectedInput("not waiting for a traffic limit"));
        };
        let quota = parse_traffic_limit(choice).map_err(SessionError::InvalidQuota)?;
        let request = ProvisionRequest {
            name: name.to_string(),
            lifetime: *lifetime,
            quota,
            ipv6: *ipv6,
        };
        *self = AdminSession::Idle;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_dialogue_yields_request() {
        let mut session = AdminSession::default();
        session.begin();
        session.enter_name("user-one_2", true).unwrap();
        session.choose_lifetime("1w").unwrap();
        let request = session.choose_quota("100 GB").unwrap();

        assert_eq!(
            request,
            ProvisionRequest {
                name: "user-one_2".to_string(),
                lifetime: Some(Duration::weeks(1)),
                quota: Some(100_000_000_000),
                ipv6: true,
            }
        );
        assert_eq!(session, AdminSession::Idle);
    }

    #[test]
    fn test_unlimited_choices() {
        let mut session = AdminSession::AwaitingName;
        session.enter_name("bob", false).unwrap();
        session.choose_lifetime("unlimited").unwrap();
        let request = session.choose_quota("Неограниченно").unwrap();
        assert_eq!(request.lifetime, None);
        assert_eq!(request.quota, None);
    }

    #[test]
    fn test_bad_input_keeps_state() {
        let mut session = AdminSession::AwaitingName;
        assert!(matches!(
            session.enter_name("user one", false),
            Err(SessionError::InvalidName(_))
        ));
        assert_eq!(session, AdminSession::AwaitingName);

        session.enter_name("carol", false).unwrap();
        let before = session.clone();
        assert!(matches!(
            session.choose_lifetime("forever-ish"),
            Err(SessionError::InvalidLifetime(_))
        ));
        assert_eq!(session, before);

        session.choose_lifetime("1d").unwrap();
        let before = session.clone();
        assert!(matches!(
            session.choose_quota("lots"),
            Err(SessionError::InvalidQuota(_))
        ));
        assert_eq!(session, before);
    }

    #[test]
    fn test_out_of_order_input_is_rejected() {
        let mut session = AdminSession::Idle;
        assert!(matches!(
            session.enter_name("dave", false),
            Err(SessionError::UnexpectedInput(_))
        ));
        assert!(matches!(
            session.choose_quota("10 GB"),
            Err(SessionError::UnexpectedInput(_))
        ));
        session.begin();
        session.cancel();
        assert_eq!(session, AdminSession::Idle);
    }
}
