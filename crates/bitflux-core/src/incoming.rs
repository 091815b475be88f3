//! Application-facing incoming-message kinds.
//!
//! Every message released to the application carries one of these tags.
//! Which kinds are released at all is controlled by [`IncomingKindSet`] in
//! the configuration; disabled kinds are silently discarded by the peer.

/// High-level classification of a released incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum IncomingKind {
    /// Application data from a connected remote.
    Data = 0,
    /// Application data from an endpoint without a connection.
    UnconnectedData = 1,
    /// Delivery receipt for a reliable message sent with a receipt tag.
    Receipt = 2,
    /// A connection changed status; payload carries the status and reason.
    StatusChanged = 3,
    /// A discovery request arrived; reply with `send_discovery_response`.
    DiscoveryRequest = 4,
    /// A response to a discovery request this peer sent.
    DiscoveryResponse = 5,
    /// An inbound connection awaits approval; payload carries the hail.
    ConnectionApproval = 6,
    /// A NAT punch succeeded; the sender endpoint is now reachable.
    NatIntroductionSuccess = 7,
    /// Library diagnostic, informational.
    DebugMessage = 8,
    /// Library diagnostic, very chatty.
    VerboseDebugMessage = 9,
    /// Library diagnostic, recoverable problem.
    WarningMessage = 10,
    /// Library diagnostic, serious problem.
    ErrorMessage = 11,
    /// A failure the application should react to.
    Error = 12,
}

impl IncomingKind {
    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Bitmask of enabled [`IncomingKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingKindSet(u16);

impl IncomingKindSet {
    /// An empty set.
    pub fn none() -> Self {
        Self(0)
    }

    /// A set with every kind enabled.
    pub fn all() -> Self {
        Self(u16::MAX)
    }

    /// Returns whether `kind` is enabled.
    pub fn contains(&self, kind: IncomingKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Enables `kind`.
    pub fn enable(&mut self, kind: IncomingKind) {
        self.0 |= kind.bit();
    }

    /// Disables `kind`.
    pub fn disable(&mut self, kind: IncomingKind) {
        self.0 &= !kind.bit();
    }

    /// Builder-style enable.
    pub fn with(mut self, kind: IncomingKind) -> Self {
        self.enable(kind);
        self
    }
}

impl Default for IncomingKindSet {
    /// Data, status changes, receipts and diagnostics at warning level and
    /// above. Discovery, NAT and approval kinds are opt-in.
    fn default() -> Self {
        Self::none()
            .with(IncomingKind::Data)
            .with(IncomingKind::StatusChanged)
            .with(IncomingKind::Receipt)
            .with(IncomingKind::WarningMessage)
            .with(IncomingKind::ErrorMessage)
            .with(IncomingKind::Error)
    }
}
