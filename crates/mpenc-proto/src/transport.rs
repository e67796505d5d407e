//! External collaborator interfaces. The core depends on these through
//! named traits only; no implementation ships in this crate: the group
//! transport channel, the pub/sub plumbing it fires events through, and
//! the static key directory are all out of scope per the protocol
//! engine's own framing — this module exists only to name their shape.

use mpenc_crypto::identity::PublicKey;
use mpenc_crypto::ParticipantId;

/// What a local member asks the channel to do.
pub enum ChannelAction<'a> {
    /// Send `payload` to `to`, or broadcast to the whole channel if `None`.
    Send { to: Option<&'a ParticipantId>, payload: &'a [u8] },
    /// Ask the channel to add or remove members.
    ChangeMembership { include: Vec<ParticipantId>, exclude: Vec<ParticipantId> },
}

/// What the channel reports back, via `on_recv`'s subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A raw payload arrived from `from`.
    Receive { from: ParticipantId, payload: Vec<u8> },
    /// Either the local member entered with the given membership set, or
    /// another member did — `member` distinguishes the two.
    Enter { member: Option<ParticipantId>, members: Vec<ParticipantId> },
    /// Either the local member left, or another member did.
    Leave { member: Option<ParticipantId> },
}

/// A group transport channel: delivers raw bytes to/from members and
/// reports channel-control events (enter/leave). The first event after
/// `Enter { member: None, .. }` (self entering) must be an ordinary
/// `Receive`; the event following a self `Leave` (if any) must be
/// `Enter { member: None, .. }` again — the core relies on this ordering
/// but does not enforce it; it is the channel's contract to keep.
pub trait GroupChannel {
    /// `None` when the local member is not currently in the channel.
    fn cur_members(&self) -> Option<Vec<ParticipantId>>;

    fn send(&mut self, action: ChannelAction<'_>);

    /// Register a subscriber for inbound channel events. FIFO per
    /// source; subscriptions added during a publish are not fired in
    /// that same publish; subscriber panics are isolated from other
    /// subscribers by the pub/sub layer, not by this trait.
    fn on_recv(&mut self, subscriber: Box<dyn FnMut(ChannelEvent) + Send>);
}

/// Read-only lookup of long-term static public keys by participant ID.
pub trait StaticKeyDirectory {
    fn get(&self, id: &ParticipantId) -> Option<PublicKey>;
}
