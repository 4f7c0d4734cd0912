//! Notifications about what the handler is doing.
//!
//! Listeners are called synchronously, in registration order.
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::util::DavMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DavEvent {
    RequestReceived { method: DavMethod, path: String },
    ResponseSent { method: DavMethod, status: u16 },
    ProcessResourceStart { method: DavMethod, resource: String },
    ProcessResourceFinish { method: DavMethod, resource: String, duration: Duration },
    Put { path: String },
    Move { from: String, to: String },
    PropPatch { href: String },
    NewFolder { path: String },
    Delete { path: String },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DavEvent);
}

#[derive(Clone, Default)]
pub(crate) struct EventManager {
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl EventManager {
    pub fn new(listeners: Vec<Arc<dyn EventListener>>) -> EventManager {
        EventManager {
            listeners: Arc::new(listeners),
        }
    }

    pub fn fire(&self, event: DavEvent) {
        for l in self.listeners.iter() {
            l.on_event(&event);
        }
    }

    /// Fire `ProcessResourceStart` now and `ProcessResourceFinish` when
    /// the guard goes away.
    pub fn process_resource(&self, method: DavMethod, resource: String) -> ProcessGuard {
        self.fire(DavEvent::ProcessResourceStart {
            method,
            resource: resource.clone(),
        });
        ProcessGuard {
            events: self.clone(),
            method,
            resource,
            start: Instant::now(),
        }
    }
}

pub(crate) struct ProcessGuard {
    events: EventManager,
    method: DavMethod,
    resource: String,
    start: Instant,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.events.fire(DavEvent::ProcessResourceFinish {
            method: self.method,
            resource: std::mem::take(&mut self.resource),
            duration: self.start.elapsed(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every event.
    #[derive(Default)]
    pub(crate) struct Recorder(pub Mutex<Vec<DavEvent>>);

    impl EventListener for Recorder {
        fn on_event(&self, event: &DavEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn finish_fires_once_on_early_exit() {
        let rec = Arc::new(Recorder::default());
        let events = EventManager::new(vec![rec.clone()]);
        let run = |fail: bool| -> Result<(), ()> {
            let _guard = events.process_resource(DavMethod::GET, "x".to_string());
            if fail {
                return Err(());
            }
            Ok(())
        };
        assert!(run(true).is_err());
        assert!(run(false).is_ok());
        let ev = rec.0.lock();
        assert_eq!(ev.len(), 4);
        assert!(matches!(ev[0], DavEvent::ProcessResourceStart { .. }));
        assert!(matches!(ev[1], DavEvent::ProcessResourceFinish { .. }));
        assert!(matches!(ev[3], DavEvent::ProcessResourceFinish { .. }));
    }
}
