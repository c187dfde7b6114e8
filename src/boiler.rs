//! Heating force/release on top of [`TouchClient`].
//!
//! Forcing switches the heating circuit to HEATING and raises the room setpoint just above
//! the current room temperature so the Touch starts (or keeps) heating. Releasing puts the
//! operation mode back and resets the setpoint. Values found on the device before the first
//! force are kept as backups; re-forcing never replaces them with values the controller set
//! itself.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::thread;
use std::time::Duration;

use crate::attributes::Attribute;
use crate::client::{Selector, TouchClient, TouchError};
use crate::config::Config;
use crate::models::touch::OperationMode;
use crate::transport::{Transport, UreqTransport};

pub const DEFAULT_ROOM_T_SET_MAX: f64 = 22.0;
/// Setpoint written on every release before the backup is considered.
pub const RELEASE_FALLBACK_SETPOINT: f64 = 16.0;
/// Wait before re-reading a mode that does not accept control.
pub const RECHECK_DELAY: Duration = Duration::from_secs(1);

/// Heating circuit flow setpoint above which the circuit counts as already heating.
const HEATING_FLOW_SETPOINT_THRESHOLD: f64 = 20.0;
const SHIFT_KEEP_HEATING: f64 = 0.3;
const SHIFT_START_HEATING: f64 = 1.2;
/// Boiler flow temperature above which hot water is available without firing.
const HOT_WATER_FLOW_TEMPERATURE: f64 = 70.0;

/// What the controller changed on the device and what it has to put back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForceState {
    pub backup_op_mode: Option<OperationMode>,
    pub forced_op_mode: Option<OperationMode>,
    pub backup_setpoint: Option<f64>,
    pub forced_setpoint: Option<f64>,
}

impl ForceState {
    pub fn is_active(&self) -> bool {
        *self != ForceState::default()
    }
}

/// Snapshot of the cached boiler values, rounded to attribute precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoilerStatus {
    pub taken_at: DateTime<Utc>,
    pub operation_mode: OperationMode,
    pub room_temperature: f64,
    pub room_temperature_setpoint: f64,
    pub room_temperature_setpoint_override: f64,
    pub heating_flow_temperature: f64,
    pub heating_flow_temperature_setpoint: f64,
    pub boiler_flow_temperature: f64,
    pub boiler_flow_temperature_setpoint: f64,
    pub generating_heat: bool,
    pub delivering_heat: bool,
    pub heat_available: bool,
    pub force: ForceState,
}

pub struct Boiler<T: Transport = UreqTransport> {
    touch: TouchClient<T>,
    room_t_set_max: f64,
    state: ForceState,
    recheck_delay: Duration,
    log_target: String,
}

impl Boiler<UreqTransport> {
    pub fn connect(config: &Config) -> Result<Self, TouchError> {
        let touch = TouchClient::connect(&config.url, &config.password, config.read_only)?;
        Ok(Boiler::new(touch, config.room_t_set_max))
    }
}

impl<T: Transport> Boiler<T> {
    pub fn new(touch: TouchClient<T>, room_t_set_max: f64) -> Self {
        Boiler {
            touch,
            room_t_set_max,
            state: ForceState::default(),
            recheck_delay: RECHECK_DELAY,
            log_target: module_path!().to_string(),
        }
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    pub fn touch(&self) -> &TouchClient<T> {
        &self.touch
    }

    pub fn touch_mut(&mut self) -> &mut TouchClient<T> {
        &mut self.touch
    }

    pub fn force_state(&self) -> &ForceState {
        &self.state
    }

    pub fn room_t_set_max(&self) -> f64 {
        self.room_t_set_max
    }

    /// Refresh every cached value from the device.
    pub fn acquire(&mut self) -> Result<(), TouchError> {
        self.touch.refresh(Selector::All)
    }

    /// Whether the Touch is set up to be controlled (AUTO or HEATING). A mode reading that
    /// says otherwise is checked once more after a short delay and a fresh acquire.
    pub fn accepts_control(&mut self) -> Result<bool, TouchError> {
        let mode = self.touch.operation_mode()?;
        if accepts(mode) {
            return Ok(true);
        }
        debug!(
            target: self.log_target.as_str(),
            "Op mode {} does not accept control, re-check in {}ms",
            mode,
            self.recheck_delay.as_millis()
        );
        thread::sleep(self.recheck_delay);
        self.acquire()?;
        Ok(accepts(self.touch.operation_mode()?))
    }

    /// Room temperature measured by the boiler's sensor.
    pub fn ambient_temperature(&self) -> Result<f64, TouchError> {
        self.touch.value(Attribute::RoomTemperature)
    }

    /// Is the heating circuit delivering heat?
    pub fn is_delivering_heat(&self) -> Result<bool, TouchError> {
        self.touch.heating_circuit_pumping()
    }

    /// Is the boiler generating heat?
    pub fn is_generating_heat(&self) -> Result<bool, TouchError> {
        self.touch.boiler_fired()
    }

    /// Is hot water available without igniting the fire?
    pub fn is_heat_available(&self) -> Result<bool, TouchError> {
        if self.touch.boiler_fired()? {
            return Ok(true);
        }
        let flow = self.touch.value(Attribute::BoilerFlowTemperature)?;
        let flow_set = self.touch.value(Attribute::BoilerFlowTemperatureSetpoint)?;
        Ok(flow > HOT_WATER_FLOW_TEMPERATURE.max(flow_set))
    }

    /// Force heating: operation mode to HEATING and room setpoint raised above the room
    /// temperature by at least `offset`.
    pub fn force_heating(&mut self, offset: f64) -> Result<(), TouchError> {
        self.force_op_mode()?;
        self.force_room_setpoint(offset)
    }

    /// Undo [`Boiler::force_heating`]. Without force state there is nothing to undo and
    /// nothing is written.
    pub fn release_heating(&mut self) -> Result<(), TouchError> {
        if !self.state.is_active() {
            debug!(target: self.log_target.as_str(), "Nothing to release");
            return Ok(());
        }
        self.release_op_mode()?;
        self.release_room_setpoint()
    }

    pub fn status(&self) -> Result<BoilerStatus, TouchError> {
        let rounded = |attribute: Attribute| -> Result<f64, TouchError> {
            let value = self.touch.value(attribute)?;
            Ok(self.touch.round(attribute, value))
        };
        Ok(BoilerStatus {
            taken_at: Utc::now(),
            operation_mode: self.touch.operation_mode()?,
            room_temperature: rounded(Attribute::RoomTemperature)?,
            room_temperature_setpoint: rounded(Attribute::RoomTemperatureSetpoint)?,
            room_temperature_setpoint_override: rounded(Attribute::RoomTemperatureSetpointOverride)?,
            heating_flow_temperature: rounded(Attribute::HeatingFlowTemperature)?,
            heating_flow_temperature_setpoint: rounded(Attribute::HeatingFlowTemperatureSetpoint)?,
            boiler_flow_temperature: rounded(Attribute::BoilerFlowTemperature)?,
            boiler_flow_temperature_setpoint: rounded(Attribute::BoilerFlowTemperatureSetpoint)?,
            generating_heat: self.is_generating_heat()?,
            delivering_heat: self.is_delivering_heat()?,
            heat_available: self.is_heat_available()?,
            force: self.state.clone(),
        })
    }

    fn force_op_mode(&mut self) -> Result<(), TouchError> {
        let current = self.touch.operation_mode()?;
        if current == OperationMode::Heating {
            return Ok(());
        }
        info!(
            target: self.log_target.as_str(),
            "Force Pelletronic op mode from {} to {}",
            current,
            OperationMode::Heating
        );
        self.touch.set_operation_mode(OperationMode::Heating)?;
        // Keep the mode found before the first force
        if self.state.backup_op_mode.is_none() {
            self.state.backup_op_mode = Some(current);
        }
        self.state.forced_op_mode = Some(OperationMode::Heating);
        debug!(
            target: self.log_target.as_str(),
            "forced_op_mode={:?}, backup_op_mode={:?}",
            self.state.forced_op_mode,
            self.state.backup_op_mode
        );
        Ok(())
    }

    fn force_room_setpoint(&mut self, offset: f64) -> Result<(), TouchError> {
        let previous_forced = self.state.forced_setpoint;
        let previous_setpoint = self.round_t(self.touch.value(Attribute::RoomTemperatureSetpoint)?);
        let room = self.touch.value(Attribute::RoomTemperature)?;
        // Big rise to switch the circuit on, small one to keep it heating.
        let flow_set = self.touch.value(Attribute::HeatingFlowTemperatureSetpoint)?;
        let minimum_shift = if flow_set > HEATING_FLOW_SETPOINT_THRESHOLD {
            SHIFT_KEEP_HEATING
        } else {
            SHIFT_START_HEATING
        };
        let shift = offset.max(minimum_shift);
        debug!(target: self.log_target.as_str(), "shift={}", shift);

        let target = self.round_t((room + shift).min(self.room_t_set_max));
        if target != previous_setpoint {
            info!(
                target: self.log_target.as_str(),
                "Change room temperature setpoint from {}°C to {}°C (T_room={}°C)",
                previous_setpoint,
                target,
                self.round_t(room)
            );
            if target == self.round_t(self.room_t_set_max) {
                warn!(target: self.log_target.as_str(), "Room temperature setpoint is risen to its maximum");
            }
            self.touch.set_value(Attribute::RoomTemperatureSetpoint, target)?;
        }
        self.state.forced_setpoint = Some(target);

        // A setpoint left by a previous force is not worth a backup.
        let ours = [Some(target), previous_forced, self.state.backup_setpoint];
        if !ours.contains(&Some(previous_setpoint)) {
            self.state.backup_setpoint = Some(previous_setpoint);
        }
        debug!(
            target: self.log_target.as_str(),
            "forced_setpoint={:?}, backup_setpoint={:?}",
            self.state.forced_setpoint,
            self.state.backup_setpoint
        );
        Ok(())
    }

    fn release_op_mode(&mut self) -> Result<(), TouchError> {
        let Some(backup) = self.state.backup_op_mode else {
            return Ok(());
        };
        let current = self.touch.operation_mode()?;
        if Some(current) == self.state.forced_op_mode {
            info!(target: self.log_target.as_str(), "Restore op mode to {}", backup);
            self.touch.set_operation_mode(backup)?;
        } else {
            info!(
                target: self.log_target.as_str(),
                "Op mode changed to {} since forcing, not restoring {}",
                current,
                backup
            );
        }
        self.state.backup_op_mode = None;
        self.state.forced_op_mode = None;
        Ok(())
    }

    fn release_room_setpoint(&mut self) -> Result<(), TouchError> {
        // Restoring the backup alone proved unreliable on the device; reset to a fixed
        // setpoint first.
        let current = self.round_t(self.touch.value(Attribute::RoomTemperatureSetpoint)?);
        let fallback = self.round_t(RELEASE_FALLBACK_SETPOINT);
        if current != fallback {
            info!(
                target: self.log_target.as_str(),
                "Reset room temperature setpoint from {}°C to {}°C",
                current,
                fallback
            );
            self.touch
                .set_value(Attribute::RoomTemperatureSetpoint, RELEASE_FALLBACK_SETPOINT)?;
        }

        if let (Some(backup), Some(forced)) = (self.state.backup_setpoint, self.state.forced_setpoint) {
            let current = self.round_t(self.touch.value(Attribute::RoomTemperatureSetpoint)?);
            if current == self.round_t(forced) {
                info!(
                    target: self.log_target.as_str(),
                    "Restore room temperature setpoint to {}°C",
                    backup
                );
                self.touch.set_value(Attribute::RoomTemperatureSetpoint, backup)?;
            }
        }
        self.state.backup_setpoint = None;
        self.state.forced_setpoint = None;
        Ok(())
    }

    /// Round at the precision of the room temperature setpoint.
    fn round_t(&self, value: f64) -> f64 {
        self.touch.round(Attribute::RoomTemperatureSetpoint, value)
    }
}

fn accepts(mode: OperationMode) -> bool {
    matches!(mode, OperationMode::Auto | OperationMode::Heating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::mock::FakeTouch;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn boiler_with(fake: FakeTouch) -> Boiler<FakeTouch> {
        let touch = TouchClient::new(fake, FakeTouch::URL, FakeTouch::PASSWORD, ClientOptions::default()).unwrap();
        let mut boiler = Boiler::new(touch, DEFAULT_ROOM_T_SET_MAX).with_recheck_delay(Duration::from_millis(5));
        boiler.acquire().unwrap();
        boiler
    }

    fn boiler() -> Boiler<FakeTouch> {
        boiler_with(FakeTouch::sample())
    }

    fn fake_with(changes: &[(&str, &str, i64)]) -> FakeTouch {
        let mut fake = FakeTouch::sample();
        for (device, attribute, raw) in changes {
            fake.set_raw(device, attribute, json!(raw));
        }
        fake
    }

    fn writes(boiler: &Boiler<FakeTouch>) -> Vec<String> {
        boiler.touch().transport().writes().into_iter().map(String::from).collect()
    }

    fn setpoint(boiler: &Boiler<FakeTouch>) -> f64 {
        let value = boiler.touch().value(Attribute::RoomTemperatureSetpoint).unwrap();
        boiler.round_t(value)
    }

    #[test]
    fn force_heating_small_shift_when_circuit_already_heating() {
        // room 17.0°C, flow setpoint 25 > 20, ceiling 22.0
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();

        assert_eq!(writes(&boiler), ["hk1.mode_auto=2", "hk1.temp_heat=173"]);
        assert_eq!(
            boiler.force_state(),
            &ForceState {
                backup_op_mode: Some(OperationMode::Auto),
                forced_op_mode: Some(OperationMode::Heating),
                backup_setpoint: Some(18.0),
                forced_setpoint: Some(17.3),
            }
        );
        assert_eq!(setpoint(&boiler), 17.3);
    }

    #[test]
    fn force_heating_big_shift_when_circuit_idle() {
        let mut boiler = boiler_with(fake_with(&[("hk1", "L_flowtemp_set", 200)]));
        boiler.force_heating(0.0).unwrap();
        assert_eq!(writes(&boiler), ["hk1.mode_auto=2", "hk1.temp_heat=182"]);
    }

    #[test]
    fn force_heating_offset_wins_when_larger() {
        let mut boiler = boiler();
        boiler.force_heating(2.0).unwrap();
        assert_eq!(writes(&boiler).last().unwrap(), "hk1.temp_heat=190");
    }

    #[test]
    fn force_heating_is_capped_at_maximum() {
        let mut boiler = boiler_with(fake_with(&[("hk1", "L_roomtemp_act", 215), ("hk1", "L_flowtemp_set", 0)]));
        boiler.force_heating(0.0).unwrap();
        assert_eq!(writes(&boiler).last().unwrap(), "hk1.temp_heat=220");
        assert_eq!(boiler.force_state().forced_setpoint, Some(22.0));
    }

    #[test]
    fn force_heating_skips_writes_already_in_place() {
        let mut boiler = boiler_with(fake_with(&[("hk1", "mode_auto", 2), ("hk1", "temp_heat", 173)]));
        boiler.force_heating(0.0).unwrap();

        assert!(writes(&boiler).is_empty());
        assert_eq!(
            boiler.force_state(),
            &ForceState {
                forced_setpoint: Some(17.3),
                ..ForceState::default()
            }
        );
    }

    #[test]
    fn reforcing_keeps_original_backups() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        boiler
            .touch_mut()
            .transport_mut()
            .set_raw("hk1", "L_roomtemp_act", json!(175));
        boiler.acquire().unwrap();
        boiler.force_heating(0.0).unwrap();

        assert_eq!(
            writes(&boiler),
            ["hk1.mode_auto=2", "hk1.temp_heat=173", "hk1.temp_heat=178"]
        );
        let state = boiler.force_state();
        assert_eq!(state.backup_op_mode, Some(OperationMode::Auto));
        assert_eq!(state.backup_setpoint, Some(18.0));
        assert_eq!(state.forced_setpoint, Some(17.8));
    }

    #[test]
    fn reforcing_without_changes_is_a_no_op() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        let state = boiler.force_state().clone();
        boiler.force_heating(0.0).unwrap();

        assert_eq!(writes(&boiler).len(), 2);
        assert_eq!(boiler.force_state(), &state);
    }

    #[test]
    fn release_restores_mode_and_resets_setpoint() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        boiler.release_heating().unwrap();

        assert_eq!(
            writes(&boiler),
            [
                "hk1.mode_auto=2",
                "hk1.temp_heat=173",
                "hk1.mode_auto=1",
                "hk1.temp_heat=160"
            ]
        );
        assert_eq!(boiler.touch().operation_mode().unwrap(), OperationMode::Auto);
        assert_eq!(setpoint(&boiler), 16.0);
        assert!(!boiler.force_state().is_active());
    }

    #[test]
    fn release_restores_backup_setpoint_when_forced_to_fallback() {
        // 14.8 + 1.2 forces exactly 16.0
        let mut boiler = boiler_with(fake_with(&[("hk1", "L_roomtemp_act", 148), ("hk1", "L_flowtemp_set", 0)]));
        boiler.force_heating(0.0).unwrap();
        assert_eq!(boiler.force_state().forced_setpoint, Some(16.0));
        boiler.release_heating().unwrap();

        assert_eq!(
            writes(&boiler),
            [
                "hk1.mode_auto=2",
                "hk1.temp_heat=160",
                "hk1.mode_auto=1",
                "hk1.temp_heat=180"
            ]
        );
        assert_eq!(setpoint(&boiler), 18.0);
        assert!(!boiler.force_state().is_active());
    }

    #[test]
    fn release_twice_writes_once() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        boiler.release_heating().unwrap();
        let after_first = writes(&boiler).len();
        boiler.release_heating().unwrap();

        assert_eq!(writes(&boiler).len(), after_first);
        assert_eq!(boiler.force_state(), &ForceState::default());
    }

    #[test]
    fn release_twice_keeps_restored_backup() {
        // 14.8 + 1.2 forces exactly 16.0, so the first release restores 18.0
        let mut boiler = boiler_with(fake_with(&[("hk1", "L_roomtemp_act", 148), ("hk1", "L_flowtemp_set", 0)]));
        boiler.force_heating(0.0).unwrap();
        boiler.release_heating().unwrap();
        let after_first = writes(&boiler);
        boiler.release_heating().unwrap();

        assert_eq!(writes(&boiler), after_first);
        assert_eq!(setpoint(&boiler), 18.0);
        assert_eq!(boiler.touch().transport().data()["hk1"]["temp_heat"], json!(180));
    }

    #[test]
    fn release_without_force_writes_nothing() {
        let mut boiler = boiler();
        boiler.release_heating().unwrap();
        boiler.release_heating().unwrap();

        assert!(writes(&boiler).is_empty());
        assert_eq!(setpoint(&boiler), 18.0);
        assert_eq!(boiler.force_state(), &ForceState::default());
    }

    #[test]
    fn release_leaves_externally_changed_mode_alone() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        boiler.touch_mut().transport_mut().set_raw("hk1", "mode_auto", json!(3));
        boiler.acquire().unwrap();
        boiler.release_heating().unwrap();

        assert!(!writes(&boiler).iter().any(|w| w == "hk1.mode_auto=1"));
        assert_eq!(boiler.touch().operation_mode().unwrap(), OperationMode::SetBack);
        assert_eq!(boiler.force_state().backup_op_mode, None);
    }

    #[test]
    fn release_keeps_state_when_write_fails() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        boiler.touch_mut().transport_mut().fail_next("connection reset");

        assert!(boiler.release_heating().unwrap_err().is_transport());
        assert_eq!(boiler.force_state().backup_op_mode, Some(OperationMode::Auto));
        assert_eq!(boiler.force_state().backup_setpoint, Some(18.0));
    }

    #[test]
    fn accepts_control_rechecks_after_refresh() {
        let mut boiler = boiler_with(fake_with(&[("hk1", "mode_auto", 3)]));
        boiler.touch_mut().transport_mut().set_raw("hk1", "mode_auto", json!(2));
        let before = boiler.touch().transport().requests().len();

        assert!(boiler.accepts_control().unwrap());
        assert_eq!(boiler.touch().transport().requests().len(), before + 1);
        assert_eq!(boiler.touch().transport().requests().last().unwrap(), "all");
    }

    #[test]
    fn accepts_control_false_when_still_off() {
        let mut boiler = boiler_with(fake_with(&[("hk1", "mode_auto", 0)]));
        assert!(!boiler.accepts_control().unwrap());
    }

    #[test]
    fn accepts_control_without_recheck() {
        let mut boiler = boiler();
        let before = boiler.touch().transport().requests().len();
        assert!(boiler.accepts_control().unwrap());
        assert_eq!(boiler.touch().transport().requests().len(), before);
    }

    #[test]
    fn heat_availability() {
        // idle boiler, flow 65°C
        assert!(!boiler().is_heat_available().unwrap());
        // hot flow above 70°C and the boiler setpoint
        assert!(boiler_with(fake_with(&[("pe1", "L_temp_act", 720)])).is_heat_available().unwrap());
        // hot flow but below a higher boiler setpoint
        let fake = fake_with(&[("pe1", "L_temp_act", 720), ("pe1", "L_temp_set", 750)]);
        assert!(!boiler_with(fake).is_heat_available().unwrap());
        // fire on
        let fired = boiler_with(fake_with(&[("pe1", "L_state", 2)]));
        assert!(fired.is_heat_available().unwrap());
        assert!(fired.is_generating_heat().unwrap());
    }

    #[test]
    fn read_accessors() {
        let boiler = boiler_with(fake_with(&[("hk1", "L_pump", 0)]));
        assert_eq!(boiler.touch().round(Attribute::RoomTemperature, boiler.ambient_temperature().unwrap()), 17.0);
        assert!(!boiler.is_delivering_heat().unwrap());
        assert!(!boiler.is_generating_heat().unwrap());
    }

    #[test]
    fn read_only_force_only_touches_cache() {
        let touch = TouchClient::new(
            FakeTouch::sample(),
            FakeTouch::URL,
            FakeTouch::PASSWORD,
            ClientOptions {
                read_only: true,
                ..ClientOptions::default()
            },
        )
        .unwrap();
        let mut boiler = Boiler::new(touch, DEFAULT_ROOM_T_SET_MAX);
        boiler.acquire().unwrap();
        boiler.force_heating(0.0).unwrap();

        assert!(writes(&boiler).is_empty());
        assert_eq!(boiler.touch().operation_mode().unwrap(), OperationMode::Heating);
        assert_eq!(setpoint(&boiler), 17.3);
        assert_eq!(boiler.touch().transport().data()["hk1"]["temp_heat"], json!(180));
    }

    #[test]
    fn status_snapshot() {
        let mut boiler = boiler();
        boiler.force_heating(0.0).unwrap();
        let status = boiler.status().unwrap();

        assert_eq!(status.operation_mode, OperationMode::Heating);
        assert_eq!(status.room_temperature, 17.0);
        assert_eq!(status.room_temperature_setpoint, 17.3);
        assert_eq!(status.heating_flow_temperature_setpoint, 25.0);
        assert_eq!(status.boiler_flow_temperature, 65.0);
        assert!(status.delivering_heat);
        assert!(!status.heat_available);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["operation_mode"], json!(2));
        assert_eq!(json["force"]["backup_op_mode"], json!(1));
        assert_eq!(json["force"]["backup_setpoint"], json!(18.0));
    }
}
