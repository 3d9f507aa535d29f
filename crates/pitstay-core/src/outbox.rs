use pitstay_types::events::{ChangeEvent, ChangeRecord, ChangeSink};

/// Change events collected while a transaction runs. Flushed to the sink
/// only once the transaction has committed; dropped on rollback.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    events: Vec<ChangeEvent>,
}

impl Outbox {
    pub fn inserted(&mut self, record: ChangeRecord) {
        self.events.push(ChangeEvent::insert(record));
    }

    pub fn updated(&mut self, record: ChangeRecord) {
        self.events.push(ChangeEvent::update(record));
    }

    pub fn flush(self, sink: &dyn ChangeSink) {
        if !self.events.is_empty() {
            tracing::trace!(count = self.events.len(), "publishing change events");
            sink.publish_all(self.events);
        }
    }
}
