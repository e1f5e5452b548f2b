/// Lifecycle of a signal channel, published to observers through a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected, joined, and able to send.
    Ready,
    /// Transport lost; reconnect attempt `attempt` of the budget is pending.
    Reconnecting { attempt: u32 },
    /// Auth rejected or reconnect budget exhausted. Terminal.
    Fatal,
    /// Explicitly closed by the owner. Terminal.
    Closed,
}

impl ChannelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fatal | Self::Closed)
    }
}
