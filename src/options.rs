//! Options synchronisation model.
//!
//! Holds the last options snapshot confirmed by the device next to the live,
//! locally edited values. A field is dirty exactly when its live value
//! differs from the confirmed one; the pending-change count is the number of
//! dirty fields. Edits are only sent on an explicit submit.

use crate::error::{SubmitError, SyncError, TransportError};
use crate::remote::{FieldError, OptionsMap, RemoteState};
use crate::render::Frame;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Option holding the device's own poll pacing, in milliseconds.
pub const SLEEP_TIME_KEY: &str = "sleepTime";
pub const MIN_FREQUENCY_KEY: &str = "minFrequency";
pub const MAX_FREQUENCY_KEY: &str = "maxFrequency";

/// Synchronisation state of one option field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FieldState {
    /// Live value matches the confirmed snapshot.
    Clean,
    /// Live value differs from the snapshot and has not been accepted.
    Dirty,
    /// The device rejected the last submitted value.
    Error { message: String, dirty: bool },
}

impl FieldState {
    /// Whether this field counts as a pending change.
    pub fn is_dirty(&self) -> bool {
        match self {
            FieldState::Clean => false,
            FieldState::Dirty => true,
            FieldState::Error { dirty, .. } => *dirty,
        }
    }
}

/// Position of a switch option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    Off,
    On,
}

/// View of a boolean option for toggle controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleState {
    pub switch: Switch,
    pub pending: bool,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum ModelEvent {
    ValueChanged { name: String, value: Value },
    StateChanged { name: String, state: FieldState },
    PendingChanged { count: usize },
    InteractionChanged { enabled: bool },
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    value: Value,
    state: FieldState,
}

/// Local view of the device options.
#[derive(Debug, Default)]
pub struct ConfigSyncModel {
    snapshot: OptionsMap,
    fields: BTreeMap<String, Field>,
    loaded: bool,
    pending: usize,
    interactive: bool,
    events: Vec<ModelEvent>,
}

impl ConfigSyncModel {
    /// An empty model; non-interactive until the first snapshot is loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has ever been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether edits and requests are currently allowed.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Number of fields whose live value differs from the snapshot.
    pub fn pending_changes(&self) -> usize {
        self.pending
    }

    /// Names of the fields this model tracks.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Live value of a field.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|f| &f.value)
    }

    /// Synchronisation state of a field.
    pub fn field_state(&self, name: &str) -> Option<&FieldState> {
        self.fields.get(name).map(|f| &f.state)
    }

    /// Last confirmed value of a field.
    pub fn confirmed(&self, name: &str) -> Option<&Value> {
        self.snapshot.get(name)
    }

    /// Toggle-control view of a boolean field.
    pub fn toggle_state(&self, name: &str) -> Option<ToggleState> {
        let field = self.fields.get(name)?;
        let on = field.value.as_bool()?;
        Some(ToggleState {
            switch: if on { Switch::On } else { Switch::Off },
            pending: field.state.is_dirty(),
        })
    }

    /// Drain queued change notifications.
    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    /// Replace the confirmed state with `snapshot`.
    ///
    /// The first load defines the field set. Later loads reset every field
    /// present in `snapshot` to clean with the confirmed value; fields absent
    /// from it are left exactly as they are.
    pub fn load(&mut self, snapshot: OptionsMap) {
        if !self.loaded {
            for (name, value) in &snapshot {
                self.fields.insert(
                    name.clone(),
                    Field {
                        value: value.clone(),
                        state: FieldState::Clean,
                    },
                );
            }
            self.loaded = true;
            self.set_interactive(true);
        }

        for (name, value) in snapshot {
            if let Some(field) = self.fields.get_mut(&name) {
                if field.value != value {
                    field.value = value.clone();
                    self.events.push(ModelEvent::ValueChanged {
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                if field.state != FieldState::Clean {
                    field.state = FieldState::Clean;
                    self.events.push(ModelEvent::StateChanged {
                        name: name.clone(),
                        state: FieldState::Clean,
                    });
                }
            }
            self.snapshot.insert(name, value);
        }

        self.recount_pending();
    }

    /// Apply a local edit.
    ///
    /// The value is always stored. The field becomes clean when it matches
    /// the confirmed value and dirty otherwise; an error marker is replaced
    /// either way. Refused while the model is locked.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<(), SyncError> {
        if !self.interactive {
            return Err(SyncError::NotInteractive);
        }
        let confirmed = self.snapshot.get(name);
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownField(name.to_string()))?;

        let state = if values_match(&value, confirmed) {
            FieldState::Clean
        } else {
            FieldState::Dirty
        };
        let was_dirty = field.state.is_dirty();
        let now_dirty = state.is_dirty();

        if field.value != value {
            field.value = value.clone();
            self.events.push(ModelEvent::ValueChanged {
                name: name.to_string(),
                value,
            });
        }
        if field.state != state {
            field.state = state.clone();
            self.events.push(ModelEvent::StateChanged {
                name: name.to_string(),
                state,
            });
        }

        match (was_dirty, now_dirty) {
            (false, true) => self.pending += 1,
            (true, false) => self.pending -= 1,
            _ => return Ok(()),
        }
        self.events.push(ModelEvent::PendingChanged {
            count: self.pending,
        });
        Ok(())
    }

    /// Flip a boolean field; returns the new position.
    pub fn toggle(&mut self, name: &str) -> Result<Switch, SyncError> {
        if !self.interactive {
            return Err(SyncError::NotInteractive);
        }
        let state = self
            .toggle_state(name)
            .ok_or_else(|| {
                if self.fields.contains_key(name) {
                    SyncError::NotToggle(name.to_string())
                } else {
                    SyncError::UnknownField(name.to_string())
                }
            })?;

        let on = state.switch == Switch::Off;
        self.set_field(name, Value::Bool(on))?;
        Ok(if on { Switch::On } else { Switch::Off })
    }

    /// All live values, dirty or not, as the body of an options update.
    pub fn submission(&self) -> OptionsMap {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect()
    }

    /// Mark the fields named by a rejected submission.
    ///
    /// Other fields keep their value and state; dirty bookkeeping is untouched.
    pub fn mark_rejected(&mut self, errors: &[FieldError]) {
        for error in errors {
            let Some(field) = self.fields.get_mut(&error.camel_key) else {
                tracing::warn!(field = %error.camel_key, "device rejected an unknown option");
                continue;
            };
            let state = FieldState::Error {
                message: error.message.clone(),
                dirty: field.state.is_dirty(),
            };
            field.state = state.clone();
            self.events.push(ModelEvent::StateChanged {
                name: error.camel_key.clone(),
                state,
            });
        }
    }

    /// Send all live values to the device.
    ///
    /// On success the echoed state is loaded. On rejection the offending
    /// fields are marked and everything else is kept. Nothing is sent while
    /// the model is locked.
    pub async fn submit<R: RemoteState>(&mut self, remote: &R) -> Result<(), SubmitError> {
        if !self.interactive {
            return Err(SyncError::NotInteractive.into());
        }
        let body = self.submission();

        self.set_interactive(false);
        let result = remote.submit_options(&body).await;
        self.set_interactive(true);

        match result {
            Ok(accepted) => {
                tracing::info!(fields = accepted.len(), "options accepted by device");
                self.load(accepted);
                Ok(())
            }
            Err(SubmitError::Rejected(errors)) => {
                tracing::warn!(rejected = errors.len(), "options rejected by device");
                self.mark_rejected(&errors);
                Err(SubmitError::Rejected(errors))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-fetch the canonical options and load them.
    ///
    /// On failure nothing changes.
    pub async fn reset<R: RemoteState>(&mut self, remote: &R) -> Result<(), TransportError> {
        let was_interactive = self.interactive;

        self.set_interactive(false);
        let result = remote.fetch_options().await;
        // A model that never loaded stays locked until it has a snapshot.
        self.set_interactive(was_interactive || result.is_ok());

        let snapshot = result?;
        self.load(snapshot);
        Ok(())
    }

    /// Frequency domain from the live bounds.
    ///
    /// Missing or non-numeric bounds come back as NaN, which the renderer
    /// treats as a degenerate frame.
    pub fn frame(&self) -> Frame {
        let bound = |name: &str| self.value(name).and_then(as_number).unwrap_or(f64::NAN);
        Frame::new(bound(MIN_FREQUENCY_KEY), bound(MAX_FREQUENCY_KEY))
    }

    /// Poll pacing last confirmed by the device.
    ///
    /// Negative, non-finite and unrepresentable values read as `None`.
    pub fn confirmed_sleep_time(&self) -> Option<Duration> {
        let millis = self.confirmed(SLEEP_TIME_KEY).and_then(as_number)?;
        Duration::try_from_secs_f64(millis / 1000.0).ok()
    }

    fn set_interactive(&mut self, enabled: bool) {
        if self.interactive != enabled {
            self.interactive = enabled;
            self.events.push(ModelEvent::InteractionChanged { enabled });
        }
    }

    fn recount_pending(&mut self) {
        let count = self.fields.values().filter(|f| f.state.is_dirty()).count();
        if count != self.pending {
            self.pending = count;
            self.events.push(ModelEvent::PendingChanged { count });
        }
    }
}

/// Numeric reading of an option value; form inputs send numbers as text.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a live value equals the confirmed one.
///
/// Values that both read as numbers compare numerically, so `"200"`,
/// `200` and `200.0` all match.
fn values_match(live: &Value, confirmed: Option<&Value>) -> bool {
    let Some(confirmed) = confirmed else {
        return false;
    };
    match (as_number(live), as_number(confirmed)) {
        (Some(a), Some(b)) => a == b,
        _ => live == confirmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn snapshot(value: Value) -> OptionsMap {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn loaded() -> ConfigSyncModel {
        let mut model = ConfigSyncModel::new();
        model.load(snapshot(json!({
            "minFrequency": 100,
            "maxFrequency": 200,
            "sleepTime": 50,
            "demodulatorMode": "FM",
            "whiteNoise": false,
            "whiteNoiseVolume": 0.5
        })));
        model
    }

    fn dirty_count(model: &ConfigSyncModel) -> usize {
        model
            .field_names()
            .filter(|name| model.field_state(name).is_some_and(FieldState::is_dirty))
            .count()
    }

    #[test]
    fn test_new_model_is_locked() {
        let model = ConfigSyncModel::new();
        assert!(!model.is_loaded());
        assert!(!model.is_interactive());
        assert_eq!(model.pending_changes(), 0);
    }

    #[test]
    fn test_edit_then_revert() {
        let mut model = loaded();

        model.set_field("maxFrequency", json!(250)).unwrap();
        assert_eq!(model.field_state("maxFrequency"), Some(&FieldState::Dirty));
        assert_eq!(model.pending_changes(), 1);

        model.set_field("maxFrequency", json!(200)).unwrap();
        assert_eq!(model.field_state("maxFrequency"), Some(&FieldState::Clean));
        assert_eq!(model.pending_changes(), 0);
        assert_eq!(model.value("maxFrequency"), Some(&json!(200)));
    }

    #[test]
    fn test_repeated_edits_count_once() {
        let mut model = loaded();
        model.set_field("minFrequency", json!(110)).unwrap();
        model.set_field("minFrequency", json!(120)).unwrap();
        model.set_field("minFrequency", json!(130)).unwrap();
        assert_eq!(model.pending_changes(), 1);
        // Snapshot is never touched by edits.
        assert_eq!(model.confirmed("minFrequency"), Some(&json!(100)));
    }

    #[test]
    fn test_text_input_matches_number() {
        let mut model = loaded();
        model.set_field("maxFrequency", json!("250")).unwrap();
        assert_eq!(model.pending_changes(), 1);
        model.set_field("maxFrequency", json!("200")).unwrap();
        assert_eq!(model.pending_changes(), 0);
        model.set_field("maxFrequency", json!(200.0)).unwrap();
        assert_eq!(model.pending_changes(), 0);
    }

    #[test]
    fn test_unknown_field_is_refused() {
        let mut model = loaded();
        assert_eq!(
            model.set_field("volume", json!(1)),
            Err(SyncError::UnknownField("volume".to_string()))
        );
        assert_eq!(model.pending_changes(), 0);
    }

    #[test]
    fn test_toggle_switch() {
        let mut model = loaded();
        assert_eq!(
            model.toggle_state("whiteNoise"),
            Some(ToggleState {
                switch: Switch::Off,
                pending: false
            })
        );

        assert_eq!(model.toggle("whiteNoise"), Ok(Switch::On));
        assert_eq!(
            model.toggle_state("whiteNoise"),
            Some(ToggleState {
                switch: Switch::On,
                pending: true
            })
        );
        assert_eq!(model.pending_changes(), 1);

        assert_eq!(model.toggle("whiteNoise"), Ok(Switch::Off));
        assert_eq!(model.pending_changes(), 0);

        assert_eq!(
            model.toggle("minFrequency"),
            Err(SyncError::NotToggle("minFrequency".to_string()))
        );
        assert_eq!(
            model.toggle("pinkNoise"),
            Err(SyncError::UnknownField("pinkNoise".to_string()))
        );
    }

    #[test]
    fn test_load_resets_edits() {
        let mut model = loaded();
        model.set_field("maxFrequency", json!(250)).unwrap();
        model.set_field("sleepTime", json!(80)).unwrap();

        model.load(snapshot(json!({
            "minFrequency": 100,
            "maxFrequency": 300,
            "sleepTime": 50,
            "demodulatorMode": "FM",
            "whiteNoise": false,
            "whiteNoiseVolume": 0.5
        })));

        assert_eq!(model.pending_changes(), 0);
        assert_eq!(model.value("maxFrequency"), Some(&json!(300)));
        assert_eq!(model.value("sleepTime"), Some(&json!(50)));
    }

    #[test]
    fn test_sparse_load_leaves_absent_fields() {
        let mut model = loaded();
        model.set_field("maxFrequency", json!(250)).unwrap();
        model.set_field("minFrequency", json!(90)).unwrap();

        model.load(snapshot(json!({ "minFrequency": 95, "extra": 1 })));

        assert_eq!(model.field_state("minFrequency"), Some(&FieldState::Clean));
        assert_eq!(model.value("minFrequency"), Some(&json!(95)));
        assert_eq!(model.field_state("maxFrequency"), Some(&FieldState::Dirty));
        assert_eq!(model.value("maxFrequency"), Some(&json!(250)));
        assert_eq!(model.pending_changes(), 1);
        // The field set never grows after the first load.
        assert!(model.value("extra").is_none());
    }

    #[test]
    fn test_rejection_marks_only_named_fields() {
        let mut model = loaded();
        model.set_field("minFrequency", json!(300)).unwrap();
        model.set_field("maxFrequency", json!(250)).unwrap();

        model.mark_rejected(&[FieldError {
            camel_key: "minFrequency".to_string(),
            message: "must be less than maxFrequency".to_string(),
        }]);

        assert_eq!(
            model.field_state("minFrequency"),
            Some(&FieldState::Error {
                message: "must be less than maxFrequency".to_string(),
                dirty: true
            })
        );
        assert_eq!(model.field_state("maxFrequency"), Some(&FieldState::Dirty));
        assert_eq!(model.pending_changes(), 2);
        assert_eq!(dirty_count(&model), 2);

        // Editing an errored field replaces the marker.
        model.set_field("minFrequency", json!(100)).unwrap();
        assert_eq!(model.field_state("minFrequency"), Some(&FieldState::Clean));
        assert_eq!(model.pending_changes(), 1);
    }

    #[test]
    fn test_submission_includes_clean_fields() {
        let mut model = loaded();
        model.set_field("maxFrequency", json!(250)).unwrap();
        let body = model.submission();
        assert_eq!(body.len(), 6);
        assert_eq!(body["maxFrequency"], json!(250));
        assert_eq!(body["minFrequency"], json!(100));
    }

    #[test]
    fn test_frame_and_sleep_time() {
        let mut model = loaded();
        assert_eq!(model.frame(), Frame::new(100.0, 200.0));
        assert_eq!(model.confirmed_sleep_time(), Some(Duration::from_millis(50)));

        model.set_field("maxFrequency", json!("150")).unwrap();
        model.set_field("sleepTime", json!(1000)).unwrap();
        // Frame follows live edits, pacing follows the device.
        assert_eq!(model.frame(), Frame::new(100.0, 150.0));
        assert_eq!(model.confirmed_sleep_time(), Some(Duration::from_millis(50)));

        model.set_field("maxFrequency", json!("abc")).unwrap();
        assert!(model.frame().span().is_none());
    }

    #[test]
    fn test_out_of_range_sleep_time_is_ignored() {
        for bad in [json!(1e25), json!(-5), json!("1e400"), json!("soon")] {
            let mut model = ConfigSyncModel::new();
            model.load(snapshot(json!({ "sleepTime": bad.clone() })));
            assert_eq!(model.confirmed_sleep_time(), None, "sleepTime {}", bad);
        }
    }

    #[test]
    fn test_locked_model_refuses_edits() {
        let mut model = ConfigSyncModel::new();
        assert_eq!(
            model.set_field("maxFrequency", json!(250)),
            Err(SyncError::NotInteractive)
        );
        assert_eq!(model.toggle("whiteNoise"), Err(SyncError::NotInteractive));
        assert!(model.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_locked_model_does_not_submit() {
        struct Unreachable;
        impl RemoteState for Unreachable {
            async fn fetch_options(&self) -> Result<OptionsMap, TransportError> {
                panic!("unexpected fetch");
            }
            async fn submit_options(&self, _options: &OptionsMap) -> Result<OptionsMap, SubmitError> {
                panic!("unexpected submit");
            }
            async fn fetch_status(
                &self,
            ) -> Result<crate::remote::StatusReport, TransportError> {
                panic!("unexpected status");
            }
        }

        let mut model = ConfigSyncModel::new();
        let result = model.submit(&Unreachable).await;
        assert!(matches!(
            result,
            Err(SubmitError::Refused(SyncError::NotInteractive))
        ));
        assert!(!model.is_interactive());
        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_events_are_queued() {
        let mut model = ConfigSyncModel::new();
        model.load(snapshot(json!({ "maxFrequency": 200 })));
        assert_eq!(
            model.take_events(),
            vec![ModelEvent::InteractionChanged { enabled: true }]
        );

        model.set_field("maxFrequency", json!(250)).unwrap();
        assert_eq!(
            model.take_events(),
            vec![
                ModelEvent::ValueChanged {
                    name: "maxFrequency".to_string(),
                    value: json!(250)
                },
                ModelEvent::StateChanged {
                    name: "maxFrequency".to_string(),
                    state: FieldState::Dirty
                },
                ModelEvent::PendingChanged { count: 1 },
            ]
        );
        assert!(model.take_events().is_empty());
    }

    #[test]
    fn test_field_state_serialization() {
        let json = serde_json::to_value(FieldState::Error {
            message: "bad".to_string(),
            dirty: true,
        })
        .unwrap();
        assert_eq!(json, json!({"state": "error", "message": "bad", "dirty": true}));
        assert_eq!(serde_json::to_value(FieldState::Dirty).unwrap(), json!({"state": "dirty"}));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(usize, i64),
        Reject(usize),
        Load(Vec<(usize, i64)>),
    }

    const NAMES: [&str; 4] = ["minFrequency", "maxFrequency", "sleepTime", "scanningStep"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0usize..4, 0i64..4).prop_map(|(i, v)| Op::Set(i, v)),
            1 => (0usize..4).prop_map(Op::Reject),
            1 => prop::collection::vec((0usize..4, 0i64..4), 0..4).prop_map(Op::Load),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The pending count always equals the number of dirty fields, and a
        /// field is dirty exactly when it differs from the snapshot.
        #[test]
        fn prop_pending_count_matches_dirty_fields(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let mut model = ConfigSyncModel::new();
            model.load(NAMES.iter().map(|n| (n.to_string(), json!(0))).collect());

            for op in ops {
                match op {
                    Op::Set(i, v) => model.set_field(NAMES[i], json!(v)).unwrap(),
                    Op::Reject(i) => model.mark_rejected(&[FieldError {
                        camel_key: NAMES[i].to_string(),
                        message: "invalid".to_string(),
                    }]),
                    Op::Load(entries) => model.load(
                        entries.iter().map(|(i, v)| (NAMES[*i].to_string(), json!(v))).collect(),
                    ),
                }

                prop_assert_eq!(model.pending_changes(), dirty_count(&model));
                for name in NAMES {
                    let differs = model.value(name) != model.confirmed(name);
                    let dirty = model.field_state(name).is_some_and(FieldState::is_dirty);
                    prop_assert_eq!(differs, dirty, "field {}", name);
                }
            }
        }

        /// Any edit sequence ending on the confirmed value leaves the field clean.
        #[test]
        fn prop_return_to_snapshot_is_clean(values in prop::collection::vec(0i64..500, 0..20)) {
            let mut model = loaded();
            for v in values {
                model.set_field("maxFrequency", json!(v)).unwrap();
            }
            model.set_field("maxFrequency", json!(200)).unwrap();

            prop_assert_eq!(model.field_state("maxFrequency"), Some(&FieldState::Clean));
            prop_assert_eq!(model.pending_changes(), 0);
        }
    }
}
