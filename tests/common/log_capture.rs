//! Capture of tracing events emitted inside a test.
//!
//! The subscriber is installed as the thread default, so it sees events from
//! `#[tokio::test]` bodies (current-thread runtime) but not from spawned
//! tasks on other threads.

use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

/// Records events until dropped.
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Recorder {
            events: events.clone(),
        });
        Self {
            events,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events at `level` whose message contains `needle`.
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level && e.message.contains(needle))
            .collect()
    }

    pub fn assert_logged(&self, level: Level, needle: &str) {
        assert!(
            !self.matching(level, needle).is_empty(),
            "no {level} event containing {needle:?}; got {:#?}",
            self.events()
                .iter()
                .map(|e| (e.level, e.message.clone()))
                .collect::<Vec<_>>()
        );
    }

    pub fn assert_field(&self, name: &str, value: &str) {
        let found = self
            .events()
            .iter()
            .any(|e| e.fields.iter().any(|(k, v)| k == name && v.contains(value)));
        assert!(found, "no event with field {name}={value}");
    }

    pub fn assert_no_errors(&self) {
        let errors: Vec<_> = self
            .events()
            .into_iter()
            .filter(|e| e.level == Level::ERROR)
            .collect();
        assert!(errors.is_empty(), "unexpected error events: {errors:#?}");
    }
}

struct Recorder {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Recorder {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = Fields::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct Fields {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}
