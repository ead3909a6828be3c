//! Maps an administrator reply back to the user it is meant for.
//!
//! The only source of truth is the forwarding provenance of the replied-to
//! message. No message-id index is kept, so anything without provenance is
//! unresolvable rather than guessed.

use crate::platform::InboundMessage;
use crate::store::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Original author of the forwarded copy the reply targets
    Sender(User),
    Unresolvable,
}

pub fn resolve(reply: &InboundMessage) -> Resolution {
    match reply
        .reply_to
        .as_ref()
        .and_then(|target| target.forwarded_from.as_ref())
    {
        Some(sender) => Resolution::Sender(sender.clone()),
        None => Resolution::Unresolvable,
    }
}
