use std::convert::TryFrom;

use bitflux_core::error::{DecodingErrorKind, ErrorKind};

/// Connection lifecycle state.
///
/// Tracks a connection from the first handshake message through active
/// traffic to teardown. The status is also carried in `StatusChanged`
/// notifications, which is why it has a wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// No connection activity yet.
    #[default]
    None = 0,
    /// We sent `Connect` and await a `ConnectResponse`.
    InitiatedConnect = 1,
    /// We received a `Connect` and have not yet answered.
    ReceivedInitiation = 2,
    /// We received a `Connect` and are waiting for the application to
    /// approve or deny it.
    RespondedAwaitingApproval = 3,
    /// We sent `ConnectResponse` and await `ConnectionEstablished`.
    RespondedConnect = 4,
    /// Handshake complete; data flows.
    Connected = 5,
    /// Teardown started; a final `Disconnect` is on its way out.
    Disconnecting = 6,
    /// Fully torn down.
    Disconnected = 7,
}

impl ConnectionStatus {
    /// Whether the handshake has completed.
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }

    /// Whether the connection is still in a handshake phase.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionStatus::InitiatedConnect
                | ConnectionStatus::ReceivedInitiation
                | ConnectionStatus::RespondedAwaitingApproval
                | ConnectionStatus::RespondedConnect
        )
    }

    /// Whether the connection is gone or on its way out.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnecting | ConnectionStatus::Disconnected)
    }

    /// Converts to the wire code.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ConnectionStatus {
    type Error = ErrorKind;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConnectionStatus::None),
            1 => Ok(ConnectionStatus::InitiatedConnect),
            2 => Ok(ConnectionStatus::ReceivedInitiation),
            3 => Ok(ConnectionStatus::RespondedAwaitingApproval),
            4 => Ok(ConnectionStatus::RespondedConnect),
            5 => Ok(ConnectionStatus::Connected),
            6 => Ok(ConnectionStatus::Disconnecting),
            7 => Ok(ConnectionStatus::Disconnected),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::ConnectionStatus)),
        }
    }
}
