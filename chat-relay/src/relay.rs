//! One broadcast pass over every registered connection.
//!
//! Each live slot gets a chance to finish at most one line. A finished line
//! goes to every other live slot in ascending order. Delivery is best effort:
//! a recipient that fails is dropped on the spot and the fan-out carries on
//! with the rest.

use std::io;

use tracing::{debug, info, warn};

use crate::{
    framer::{Frame, frame_line, is_blank},
    registry::{ConnectionRegistry, SlotId},
    transport::Connection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Reading from the slot failed, including the peer hanging up.
    ReadFailed,
    /// Writing a relayed line to the slot failed or came up short.
    WriteFailed,
}

/// What a single relay pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Lines forwarded this pass, in the order they were relayed.
    pub forwarded: Vec<(SlotId, Vec<u8>)>,
    /// Successful line writes across all recipients.
    pub deliveries: usize,
    /// Slots torn down this pass.
    pub dropped: Vec<(SlotId, DropReason)>,
}

impl RelayReport {
    pub fn is_idle(&self) -> bool {
        self.forwarded.is_empty() && self.dropped.is_empty()
    }
}

/// Runs one pass: every live slot may contribute one line, which is written
/// verbatim to every other live slot.
pub fn relay_pass<C: Connection>(registry: &mut ConnectionRegistry<C>) -> RelayReport {
    let mut report = RelayReport::default();

    for sender in registry.live_slots() {
        let Some(member) = registry.get_mut(sender) else {
            // Dropped earlier in this pass as a failed recipient.
            continue;
        };

        match frame_line(&mut member.connection, &mut member.inbound) {
            Frame::Pending => {}
            Frame::Failed { error, discarded } => {
                info!(client = %sender, %error, discarded, "connection with client shut down");
                disconnect(registry, sender);
                report.dropped.push((sender, DropReason::ReadFailed));
            }
            Frame::Complete => {
                let line = member.inbound.take();
                if is_blank(&line) {
                    continue;
                }
                info!(
                    client = %sender,
                    text = %String::from_utf8_lossy(&line).trim_end(),
                    "user says"
                );
                broadcast(registry, sender, &line, &mut report);
                report.forwarded.push((sender, line));
            }
        }
    }

    report
}

fn broadcast<C: Connection>(
    registry: &mut ConnectionRegistry<C>,
    sender: SlotId,
    line: &[u8],
    report: &mut RelayReport,
) {
    for target in registry.live_slots().filter(|slot| *slot != sender) {
        let Some(member) = registry.get_mut(target) else {
            continue;
        };

        match member.connection.write(line) {
            Ok(written) if written == line.len() => report.deliveries += 1,
            Ok(written) => {
                let error = io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {written} of {} bytes", line.len()),
                );
                drop_recipient(registry, target, &error, report);
            }
            Err(error) => drop_recipient(registry, target, &error, report),
        }
    }
}

fn drop_recipient<C: Connection>(
    registry: &mut ConnectionRegistry<C>,
    target: SlotId,
    error: &io::Error,
    report: &mut RelayReport,
) {
    warn!(client = %target, %error, "unable to write to client; disconnecting");
    disconnect(registry, target);
    report.dropped.push((target, DropReason::WriteFailed));
}

fn disconnect<C: Connection>(registry: &mut ConnectionRegistry<C>, slot: SlotId) {
    if let Some(mut connection) = registry.unregister(slot) {
        connection.close();
        debug!(client = %slot, "slot freed");
    }
}
