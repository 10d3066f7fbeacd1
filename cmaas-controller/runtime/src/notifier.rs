use crate::core::{EventName, ManagedObjects, NotificationBus};
use tracing::info;

/// Publishes notifications as structured log records.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogNotifier;

impl NotificationBus for LogNotifier {
    fn send_event(&self, name: EventName, objects: ManagedObjects, info: ManagedObjects) {
        if info.is_empty() {
            info!(target: "cmaas::notify", event = %name, %objects, "Event");
        } else {
            info!(target: "cmaas::notify", event = %name, %objects, %info, "Event");
        }
    }
}
