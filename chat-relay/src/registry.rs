//! Fixed-capacity table of live connections.
//!
//! Slot indices are handed out lowest-first and never move while the
//! connection lives, so they double as the client identity in logs and as the
//! exclusion key when a line is broadcast. Freed slots are simply reused.

use std::fmt;

use crate::framer::LineBuffer;

/// Reference capacity of the connection table.
pub const DEFAULT_CAPACITY: usize = 16;

/// Index of a slot in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered connection together with the line it is still sending.
#[derive(Debug)]
pub struct Member<C> {
    pub connection: C,
    pub inbound: LineBuffer,
}

/// Returned by [`ConnectionRegistry::register`] when every slot is taken.
/// Carries the rejected connection back so the caller decides its fate.
pub struct RegistryFull<C> {
    capacity: usize,
    connection: C,
}

impl<C> RegistryFull<C> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn into_connection(self) -> C {
        self.connection
    }
}

impl<C> fmt::Debug for RegistryFull<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for RegistryFull<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} connection slots are in use", self.capacity)
    }
}

impl<C> std::error::Error for RegistryFull<C> {}

#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    slots: Vec<Option<Member<C>>>,
    max_line: usize,
}

impl<C> ConnectionRegistry<C> {
    /// Creates a registry with `capacity` slots whose members frame inbound
    /// lines of at most `max_line` bytes.
    pub fn new(capacity: usize, max_line: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            max_line,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn is_live(&self, slot: SlotId) -> bool {
        matches!(self.slots.get(slot.0), Some(Some(_)))
    }

    /// Places `connection` in the lowest free slot.
    pub fn register(&mut self, connection: C) -> Result<SlotId, RegistryFull<C>> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(RegistryFull {
                capacity: self.capacity(),
                connection,
            });
        };

        self.slots[index] = Some(Member {
            connection,
            inbound: LineBuffer::new(self.max_line),
        });
        Ok(SlotId(index))
    }

    /// Frees `slot`, returning its connection. Freeing a slot that is already
    /// free (or out of range) does nothing.
    pub fn unregister(&mut self, slot: SlotId) -> Option<C> {
        self.slots
            .get_mut(slot.0)
            .and_then(Option::take)
            .map(|member| member.connection)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Member<C>> {
        self.slots.get_mut(slot.0).and_then(Option::as_mut)
    }

    /// Snapshot of the live slots in ascending order.
    pub fn live_slots(&self) -> LiveSlots {
        LiveSlots {
            slots: self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some())
                .map(|(index, _)| SlotId(index))
                .collect(),
            next: 0,
        }
    }
}

/// Iterator over the slots that were live when it was created.
///
/// Cloning (or [`restart`](Self::restart)) replays the same snapshot. Slots
/// may have been freed since; lookups on them simply come back empty.
#[derive(Debug, Clone)]
pub struct LiveSlots {
    slots: Vec<SlotId>,
    next: usize,
}

impl LiveSlots {
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for LiveSlots {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let slot = self.slots.get(self.next).copied()?;
        self.next += 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slots.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LiveSlots {}
