use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::debug;

use crate::device::types::{EventKind, SensorEvent};

struct Observer {
    kinds: Vec<EventKind>,
    sender: UnboundedSender<SensorEvent>,
}

// delivery follows registration order
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Observer>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        ObserverRegistry::default()
    }

    pub fn register(&mut self, kinds: &[EventKind]) -> UnboundedReceiver<SensorEvent> {
        let (sender, receiver) = unbounded();
        self.observers.push(Observer { kinds: kinds.to_vec(), sender });
        receiver
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    // returns how many observers received the event, closed ones are pruned
    pub fn dispatch(&mut self, event: &SensorEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;

        self.observers.retain(|observer| {
            if !observer.kinds.contains(&kind) {
                return !observer.sender.is_closed();
            }

            match observer.sender.unbounded_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                },
                Err(_) => {
                    debug!("Removing observer with a closed receiver");
                    false
                },
            }
        });

        delivered
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }
}
