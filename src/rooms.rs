use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::ROOM_CHANNEL_CAPACITY;
use crate::model::{Day, RoomEvent};

/// Broadcast hub with one room per day. Joining a room is subscribing to it;
/// leaving is dropping the receiver. Delivery is fire-and-forget: a receiver
/// that falls behind loses events and recovers from the next snapshot.
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<Day, broadcast::Sender<RoomEvent>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the room for `day`. Creates the room if needed.
    pub fn join(&self, day: Day) -> broadcast::Receiver<RoomEvent> {
        let sender = self
            .rooms
            .entry(day)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver to everyone in the event's room. No-op if nobody is listening.
    /// Returns the number of receivers reached.
    pub fn emit(&self, event: RoomEvent) -> usize {
        let day = event.day();
        let reached = match self.rooms.get(&day) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => return 0,
        };
        if reached == 0 {
            self.prune(day);
        }
        reached
    }

    /// Drop the room for `day` if it has no members left.
    pub fn prune(&self, day: Day) {
        self.rooms
            .remove_if(&day, |_, sender| sender.receiver_count() == 0);
    }

    pub fn members(&self, day: Day) -> usize {
        self.rooms
            .get(&day)
            .map_or(0, |sender| sender.receiver_count())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio_test::{assert_pending, assert_ready, task};

    fn day(d: u32) -> Day {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[tokio::test]
    async fn join_and_receive() {
        let hub = RoomHub::new();
        let mut rx = hub.join(day(1));

        let event = RoomEvent::SlotHeld {
            slot_id: 42,
            day: day(1),
            ttl: 120,
        };
        assert_eq!(hub.emit(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn emit_wakes_waiting_member() {
        let hub = RoomHub::new();
        let mut rx = hub.join(day(1));
        let mut recv = task::spawn(rx.recv());
        assert_pending!(recv.poll());

        let event = RoomEvent::SlotBooked {
            slot_id: 9,
            day: day(1),
        };
        hub.emit(event.clone());
        assert!(recv.is_woken());
        assert_eq!(assert_ready!(recv.poll()).unwrap(), event);
    }

    #[tokio::test]
    async fn rooms_are_partitioned_by_day() {
        let hub = RoomHub::new();
        let mut first = hub.join(day(1));
        let _second = hub.join(day(2));

        hub.emit(RoomEvent::SlotReleased {
            slot_id: 7,
            day: day(2),
        });
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn emit_without_members_is_noop() {
        let hub = RoomHub::new();
        assert_eq!(
            hub.emit(RoomEvent::SlotBooked {
                slot_id: 1,
                day: day(1),
            }),
            0
        );
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn empty_rooms_are_pruned() {
        let hub = RoomHub::new();
        let rx = hub.join(day(1));
        assert_eq!(hub.members(day(1)), 1);
        drop(rx);
        hub.prune(day(1));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn prune_keeps_occupied_rooms() {
        let hub = RoomHub::new();
        let _rx = hub.join(day(1));
        hub.prune(day(1));
        assert_eq!(hub.room_count(), 1);
    }
}
