pub fn audit_policy_saved(removed: usize, inserted: usize) {
    tracing::info!(
        target: "audit",
        event = "policy_saved",
        removed = removed,
        inserted = inserted,
        "policy replaced"
    );
}

pub fn audit_policy_added(ptype: &str, count: usize) {
    tracing::info!(
        target: "audit",
        event = "policy_added",
        ptype = ptype,
        count = count,
        "policy rules added"
    );
}

pub fn audit_policy_removed(ptype: &str, count: usize) {
    tracing::info!(
        target: "audit",
        event = "policy_removed",
        ptype = ptype,
        count = count,
        "policy rules removed"
    );
}

pub fn audit_policy_filtered_removed(ptype: &str, field_index: usize, count: usize) {
    tracing::info!(
        target: "audit",
        event = "policy_filtered_removed",
        ptype = ptype,
        field_index = field_index,
        count = count,
        "policy rules removed by filter"
    );
}

pub fn audit_assignment_granted(relation: &str, subject: &str, object: &str) {
    tracing::info!(
        target: "audit",
        event = "assignment_granted",
        relation = relation,
        subject = subject,
        object = object,
        "assignment granted"
    );
}

pub fn audit_assignment_revoked(relation: &str, count: usize) {
    tracing::info!(
        target: "audit",
        event = "assignment_revoked",
        relation = relation,
        count = count,
        "assignments revoked"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Debug)]
    struct CapturedEvent {
        target: String,
        fields: Vec<(String, String)>,
    }

    struct TestLayer {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for TestLayer {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = Vec::new();
            let mut visitor = FieldVisitor(&mut fields);
            event.record(&mut visitor);

            self.events.lock().unwrap().push(CapturedEvent {
                target: event.metadata().target().to_string(),
                fields,
            });
        }
    }

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0
                .push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.0.push((field.name().to_string(), value.to_string()));
        }

        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.0.push((field.name().to_string(), value.to_string()));
        }
    }

    fn with_test_subscriber<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = TestLayer {
            events: Arc::clone(&events),
        };
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        Arc::try_unwrap(events).unwrap().into_inner().unwrap()
    }

    fn has_field(event: &CapturedEvent, key: &str, value: &str) -> bool {
        event.fields.iter().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn policy_saved_reports_both_counts() {
        let events = with_test_subscriber(|| audit_policy_saved(4, 2));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "policy_saved"));
        assert!(has_field(&events[0], "removed", "4"));
        assert!(has_field(&events[0], "inserted", "2"));
    }

    #[test]
    fn filtered_remove_includes_field_index() {
        let events = with_test_subscriber(|| audit_policy_filtered_removed("p", 3, 7));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "event", "policy_filtered_removed"));
        assert!(has_field(&events[0], "ptype", "p"));
        assert!(has_field(&events[0], "field_index", "3"));
        assert!(has_field(&events[0], "count", "7"));
    }

    #[test]
    fn assignment_granted_names_both_sides() {
        let events =
            with_test_subscriber(|| audit_assignment_granted("role_permissions", "r1", "p1"));

        assert_eq!(events.len(), 1);
        assert!(has_field(&events[0], "relation", "role_permissions"));
        assert!(has_field(&events[0], "subject", "r1"));
        assert!(has_field(&events[0], "object", "p1"));
    }

    #[test]
    fn audit_events_use_target_audit() {
        let events = with_test_subscriber(|| {
            audit_policy_saved(0, 0);
            audit_policy_added("p", 1);
            audit_policy_removed("p", 1);
            audit_policy_filtered_removed("g", 0, 0);
            audit_assignment_granted("user_roles", "u1", "r1");
            audit_assignment_revoked("user_roles", 1);
        });

        assert_eq!(events.len(), 6);
        for event in &events {
            assert_eq!(
                event.target, "audit",
                "event target should be 'audit', got '{}'",
                event.target
            );
        }
    }
}
