//! Inbound command dispatch by topic substring
//!
//! Topics are classified against an ordered list of substrings: color, then
//! light, then text, then alert. The first match wins, so a topic that
//! contains both `color` and `text` is a color command. Topics matching
//! nothing are ignored.
//!
//! ```text
//! transport → SessionClient::on_message → MessageRouter::route → AppState + NotificationBus
//! ```

use crate::capabilities::Indicator;
use crate::protocol::{parse_envelope, ColorPayload, EventKind, PayloadError, TextPayload};
use crate::session::notify::{NotificationBus, NotificationEvent};
use crate::session::state::{AppState, ViewKind};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Inbound command categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Color,
    Light,
    Text,
    Alert,
}

/// Routing failures; the message is dropped
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Malformed {kind:?} payload: {source}")]
    Payload {
        kind: RouteKind,
        #[source]
        source: PayloadError,
    },
}

impl RouteError {
    fn payload(kind: RouteKind) -> impl FnOnce(PayloadError) -> Self {
        move |source| RouteError::Payload { kind, source }
    }
}

/// Substring classifier and dispatcher
pub struct MessageRouter {
    routes: Vec<(&'static str, RouteKind)>,
    indicator: Arc<dyn Indicator>,
}

impl MessageRouter {
    pub fn new(indicator: Arc<dyn Indicator>) -> Self {
        Self {
            routes: vec![
                (EventKind::Color.as_str(), RouteKind::Color),
                (EventKind::Light.as_str(), RouteKind::Light),
                (EventKind::Text.as_str(), RouteKind::Text),
                (EventKind::Alert.as_str(), RouteKind::Alert),
            ],
            indicator,
        }
    }

    /// First route whose substring the topic contains
    pub fn classify(&self, topic: &str) -> Option<RouteKind> {
        self.routes
            .iter()
            .find(|(needle, _)| topic.contains(needle))
            .map(|(_, kind)| *kind)
    }

    /// Dispatch one inbound message.
    ///
    /// Returns the matched route, `Ok(None)` for unmatched topics, or an
    /// error for an unparseable payload. Nothing is mutated on error.
    pub fn route(
        &self,
        topic: &str,
        payload: &[u8],
        state: &mut AppState,
        bus: &mut NotificationBus,
    ) -> Result<Option<RouteKind>, RouteError> {
        let Some(kind) = self.classify(topic) else {
            debug!(topic = %topic, "No route for topic, ignoring");
            return Ok(None);
        };

        let span = crate::route_span!(topic = %topic, ?kind);
        let _enter = span.enter();

        match kind {
            RouteKind::Color => {
                let color: ColorPayload =
                    parse_envelope(payload).map_err(RouteError::payload(kind))?;
                self.apply_color(&color, state, bus);
            }
            RouteKind::Light => {
                parse_envelope::<serde_json::Value>(payload).map_err(RouteError::payload(kind))?;
                self.toggle_light();
            }
            RouteKind::Text => {
                let text: TextPayload =
                    parse_envelope(payload).map_err(RouteError::payload(kind))?;
                Self::record_text(text.text, state, bus);
                bus.emit_if_badge_view(state.active_view, NotificationEvent::Unread);
            }
            RouteKind::Alert => {
                let alert: TextPayload =
                    parse_envelope(payload).map_err(RouteError::payload(kind))?;
                Self::record_text(alert.text.clone(), state, bus);
                bus.emit_if_badge_view(
                    state.active_view,
                    NotificationEvent::Alert {
                        message: alert.text,
                    },
                );
            }
        }

        Ok(Some(kind))
    }

    fn apply_color(&self, color: &ColorPayload, state: &mut AppState, bus: &mut NotificationBus) {
        let Some(argb) = color.to_argb() else {
            debug!(?color, "Color out of range, dropping");
            return;
        };

        state.color = argb;
        info!(color = %format!("{:#010x}", argb.to_u32()), "Background color changed");

        if let Some(view) = state.active_view.filter(|v| v.shows_color()) {
            bus.emit_if_active(state.active_view, view, NotificationEvent::ColorChanged(argb));
        }
    }

    fn toggle_light(&self) {
        if !self.indicator.is_available() {
            info!("Light command ignored, no indicator available");
            return;
        }
        let on = self.indicator.toggle();
        debug!(on, "Light toggled");
    }

    /// Count as unread, append to the log, refresh the log view
    fn record_text(text: String, state: &mut AppState, bus: &mut NotificationBus) {
        state.counters.unread_count += 1;
        state.log.push(text);
        bus.emit_if_active(state.active_view, ViewKind::Log, NotificationEvent::NewText);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SoftIndicator;
    use crate::protocol::Argb;
    use crate::session::notify::Notification;
    use proptest::prelude::*;

    const COLOR_TOPIC: &str = "iot-2/cmd/color/fmt/json";
    const LIGHT_TOPIC: &str = "iot-2/cmd/light/fmt/json";
    const TEXT_TOPIC: &str = "iot-2/cmd/text/fmt/json";
    const ALERT_TOPIC: &str = "iot-2/cmd/alert/fmt/json";

    fn router() -> (MessageRouter, Arc<SoftIndicator>) {
        let indicator = Arc::new(SoftIndicator::new());
        (MessageRouter::new(indicator.clone()), indicator)
    }

    fn color_payload(r: i64, g: i64, b: i64, alpha: f64) -> Vec<u8> {
        format!(r#"{{"d":{{"r":{r},"g":{g},"b":{b},"alpha":{alpha}}}}}"#).into_bytes()
    }

    #[test]
    fn test_classification_priority() {
        let (router, _) = router();
        assert_eq!(router.classify(COLOR_TOPIC), Some(RouteKind::Color));
        assert_eq!(router.classify(LIGHT_TOPIC), Some(RouteKind::Light));
        assert_eq!(router.classify(TEXT_TOPIC), Some(RouteKind::Text));
        assert_eq!(router.classify(ALERT_TOPIC), Some(RouteKind::Alert));
        assert_eq!(router.classify("iot-2/cmd/reboot/fmt/json"), None);

        // Substring match, first entry wins
        assert_eq!(router.classify("iot-2/cmd/textcolor/fmt/json"), Some(RouteKind::Color));
        assert_eq!(router.classify("alert/text"), Some(RouteKind::Text));
        assert_eq!(router.classify("lightalert"), Some(RouteKind::Light));
    }

    #[test]
    fn test_text_with_log_active() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut log = bus.subscribe(ViewKind::Log);
        state.set_active_view(Some(ViewKind::Log));

        let routed = router
            .route(TEXT_TOPIC, br#"{"d":{"text":"hello"}}"#, &mut state, &mut bus)
            .unwrap();

        assert_eq!(routed, Some(RouteKind::Text));
        assert_eq!(state.log.entries(), ["hello"]);
        assert_eq!(state.counters.unread_count, 1);
        assert_eq!(log.try_recv().unwrap().event, NotificationEvent::NewText);
        assert_eq!(log.try_recv().unwrap().event, NotificationEvent::Unread);

        state.set_active_view(Some(ViewKind::Log));
        assert_eq!(state.counters.unread_count, 0);
    }

    #[test]
    fn test_text_with_messaging_active_gets_badge_only() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut messaging = bus.subscribe(ViewKind::Messaging);
        state.set_active_view(Some(ViewKind::Messaging));

        router
            .route(TEXT_TOPIC, br#"{"d":{"text":"hi"}}"#, &mut state, &mut bus)
            .unwrap();

        assert_eq!(
            messaging.try_recv().unwrap(),
            Notification {
                target: ViewKind::Messaging,
                event: NotificationEvent::Unread
            }
        );
        assert!(messaging.try_recv().is_err());
    }

    #[test]
    fn test_text_without_active_view_still_logged() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();

        router
            .route(TEXT_TOPIC, br#"{"d":{"text":"quiet"}}"#, &mut state, &mut bus)
            .unwrap();
        assert_eq!(state.counters.unread_count, 1);
        assert_eq!(state.log.len(), 1);
    }

    #[test]
    fn test_alert_carries_message() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut profiles = bus.subscribe(ViewKind::Profiles);
        state.set_active_view(Some(ViewKind::Profiles));

        router
            .route(ALERT_TOPIC, br#"{"d":{"text":"door open"}}"#, &mut state, &mut bus)
            .unwrap();

        let alert = profiles.try_recv().unwrap();
        assert_eq!(alert.message(), Some("door open"));
        assert_eq!(state.counters.unread_count, 1);
        assert_eq!(state.log.entries(), ["door open"]);
    }

    #[test]
    fn test_alert_dropped_for_drawing_view() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut drawing = bus.subscribe(ViewKind::Drawing);
        state.set_active_view(Some(ViewKind::Drawing));

        router
            .route(ALERT_TOPIC, br#"{"d":{"text":"x"}}"#, &mut state, &mut bus)
            .unwrap();
        assert!(drawing.try_recv().is_err());
        assert_eq!(state.log.len(), 1);
    }

    #[test]
    fn test_malformed_text_changes_nothing() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();

        let payloads: [&[u8]; 3] = [b"not json", br#"{"text":"no envelope"}"#, br#"{"d":{}}"#];
        for payload in payloads {
            let result = router.route(TEXT_TOPIC, payload, &mut state, &mut bus);
            assert!(matches!(
                result,
                Err(RouteError::Payload {
                    kind: RouteKind::Text,
                    ..
                })
            ));
        }
        assert_eq!(state.counters.unread_count, 0);
        assert!(state.log.is_empty());
    }

    #[test]
    fn test_unmatched_topic_ignored() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let routed = router
            .route("iot-2/cmd/reboot/fmt/json", b"garbage", &mut state, &mut bus)
            .unwrap();
        assert_eq!(routed, None);
    }

    #[test]
    fn test_color_updates_and_notifies() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut messaging = bus.subscribe(ViewKind::Messaging);
        state.set_active_view(Some(ViewKind::Messaging));

        router
            .route(COLOR_TOPIC, &color_payload(150, 50, 10, 0.5), &mut state, &mut bus)
            .unwrap();

        let expected = Argb {
            a: 128,
            r: 150,
            g: 50,
            b: 10,
        };
        assert_eq!(state.color, expected);
        assert_eq!(
            messaging.try_recv().unwrap().event,
            NotificationEvent::ColorChanged(expected)
        );
    }

    #[test]
    fn test_color_accepts_numeric_strings() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();

        let payload = br#"{"d":{"r":"150","g":"50","b":"10","alpha":"1.0"}}"#;
        router.route(COLOR_TOPIC, payload, &mut state, &mut bus).unwrap();
        assert_eq!(
            state.color,
            Argb {
                a: 255,
                r: 150,
                g: 50,
                b: 10
            }
        );
    }

    #[test]
    fn test_color_not_sent_to_login() {
        let (router, _) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();
        let mut login = bus.subscribe(ViewKind::Login);
        state.set_active_view(Some(ViewKind::Login));

        router
            .route(COLOR_TOPIC, &color_payload(1, 2, 3, 0.0), &mut state, &mut bus)
            .unwrap();
        assert_eq!(state.color.r, 1);
        assert!(login.try_recv().is_err());
    }

    #[test]
    fn test_light_toggles_indicator() {
        let (router, indicator) = router();
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();

        router.route(LIGHT_TOPIC, br#"{"d":{}}"#, &mut state, &mut bus).unwrap();
        assert!(indicator.is_on());
        router.route(LIGHT_TOPIC, br#"{"d":{}}"#, &mut state, &mut bus).unwrap();
        assert!(!indicator.is_on());
    }

    #[test]
    fn test_light_without_indicator_is_noop() {
        let indicator = Arc::new(SoftIndicator::with_availability(false));
        let router = MessageRouter::new(indicator.clone());
        let mut state = AppState::new();
        let mut bus = NotificationBus::new();

        router.route(LIGHT_TOPIC, br#"{"d":{}}"#, &mut state, &mut bus).unwrap();
        assert!(!indicator.is_on());
    }

    proptest! {
        #[test]
        fn valid_colors_are_stored_exactly(
            r in 0i64..=255, g in 0i64..=255, b in 0i64..=255, alpha in 0.0f64..=1.0
        ) {
            let (router, _) = router();
            let mut state = AppState::new();
            let mut bus = NotificationBus::new();
            let mut messaging = bus.subscribe(ViewKind::Messaging);
            state.set_active_view(Some(ViewKind::Messaging));

            router.route(COLOR_TOPIC, &color_payload(r, g, b, alpha), &mut state, &mut bus).unwrap();

            prop_assert_eq!(state.color.a as f64, (alpha * 255.0).round());
            prop_assert_eq!(state.color.r as i64, r);
            prop_assert_eq!(state.color.g as i64, g);
            prop_assert_eq!(state.color.b as i64, b);
            prop_assert!(messaging.try_recv().is_ok());
        }

        #[test]
        fn out_of_range_colors_leave_state_unchanged(
            r in prop_oneof![-500i64..0, 256i64..1000],
            g in 0i64..=255,
            b in 0i64..=255,
            alpha in 0.0f64..=1.0
        ) {
            let (router, _) = router();
            let mut state = AppState::new();
            let mut bus = NotificationBus::new();
            let mut messaging = bus.subscribe(ViewKind::Messaging);
            state.set_active_view(Some(ViewKind::Messaging));

            router.route(COLOR_TOPIC, &color_payload(r, g, b, alpha), &mut state, &mut bus).unwrap();

            prop_assert_eq!(state.color, Argb::WHITE);
            prop_assert!(messaging.try_recv().is_err());
        }

        #[test]
        fn out_of_range_alpha_leaves_state_unchanged(alpha in prop_oneof![-5.0f64..-0.01, 1.01f64..10.0]) {
            let (router, _) = router();
            let mut state = AppState::new();
            let mut bus = NotificationBus::new();

            router.route(COLOR_TOPIC, &color_payload(10, 20, 30, alpha), &mut state, &mut bus).unwrap();
            prop_assert_eq!(state.color, Argb::WHITE);
        }

        #[test]
        fn unrelated_topics_never_route(topic in "[a-bd-fh-jm-su-z0-9/]{0,40}") {
            let (router, _) = router();
            // Alphabet excludes c, g, k, l, t so no route substring can appear
            prop_assert_eq!(router.classify(&topic), None);
        }
    }
}
