use serde_with::SerializeDisplay;
use strum_macros::{Display, EnumIter};

/// Connection state of the single active sensor link.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display, EnumIter, SerializeDisplay)]
pub enum ConnectionState {
    /// No link and no scan.
    #[default]
    #[strum(to_string = "disconnected")]
    Disconnected,
    /// A bounded discovery scan is running.
    #[strum(to_string = "scanning")]
    Scanning,
    /// A link to the selected peripheral is being established.
    #[strum(to_string = "connecting")]
    Connecting,
    /// The link is up; services are being resolved and notifications enabled.
    #[strum(to_string = "service_discovery")]
    ServiceDiscovery,
    /// Notifications are enabled and samples are flowing.
    #[strum(to_string = "streaming")]
    Streaming,
    /// An explicit teardown is in progress.
    #[strum(to_string = "disconnecting")]
    Disconnecting,
}

impl ConnectionState {
    /// Returns whether a physical link (or an attempt at one) exists in this state.
    #[must_use]
    pub fn holds_link(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServiceDiscovery | Self::Streaming | Self::Disconnecting
        )
    }
}

/// Inputs that drive [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum LinkInput {
    ScanStarted,
    ScanStopped,
    ConnectRequested,
    LinkEstablished,
    LinkFailed,
    NotificationsEnabled,
    SetupFailed,
    Notification,
    LinkLost,
    DisconnectRequested,
    TeardownComplete,
}

/// Applies one input to a state, returning the next state when the input is legal.
pub(crate) fn transition(state: ConnectionState, input: LinkInput) -> Option<ConnectionState> {
    use ConnectionState as S;
    use LinkInput as I;

    match (state, input) {
        (S::Disconnected | S::Scanning, I::ScanStarted) => Some(S::Scanning),
        (S::Scanning, I::ScanStopped) => Some(S::Disconnected),
        (S::Disconnected | S::Scanning, I::ConnectRequested) => Some(S::Connecting),
        (S::Connecting, I::LinkEstablished) => Some(S::ServiceDiscovery),
        (S::Connecting, I::LinkFailed) => Some(S::Disconnected),
        (S::ServiceDiscovery, I::NotificationsEnabled) => Some(S::Streaming),
        (S::ServiceDiscovery, I::SetupFailed) => Some(S::Disconnected),
        (S::Streaming, I::Notification) => Some(S::Streaming),
        (S::Streaming, I::LinkLost) => Some(S::Disconnected),
        (S::Disconnected, I::DisconnectRequested) => None,
        (_, I::DisconnectRequested) => Some(S::Disconnecting),
        (S::Disconnecting, I::TeardownComplete) => Some(S::Disconnected),
        _ => None,
    }
}
