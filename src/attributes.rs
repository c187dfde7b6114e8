//! Registry of the logical attributes the boiler controller works with.
//!
//! Each entry maps a stable logical name to a `(device, attribute)` pair of the Touch JSON
//! interface. Attributes whose names start with `L_` are live readings and cannot be written.

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Attribute {
    BoilerFlowTemperature,
    BoilerFlowTemperatureSetpoint,
    HeatingFlowTemperature,
    HeatingFlowTemperatureSetpoint,
    RoomTemperature,
    RoomTemperatureSetpoint,
    RoomTemperatureSetpointOverride,
    BoilerFired,
    HeatingCircuitPumping,
    HeatingCircuitOperationMode,
}

/// Fire states of `pe1.L_state` in which the burner is on.
const FIRED_STATES: &[i64] = &[1, 2, 3, 4];
const PUMP_ON: &[i64] = &[1];

impl Attribute {
    pub const ALL: [Attribute; 10] = [
        Attribute::BoilerFlowTemperature,
        Attribute::BoilerFlowTemperatureSetpoint,
        Attribute::HeatingFlowTemperature,
        Attribute::HeatingFlowTemperatureSetpoint,
        Attribute::RoomTemperature,
        Attribute::RoomTemperatureSetpoint,
        Attribute::RoomTemperatureSetpointOverride,
        Attribute::BoilerFired,
        Attribute::HeatingCircuitPumping,
        Attribute::HeatingCircuitOperationMode,
    ];

    /// The registry table: `(logical name, device, attribute, access, on states)`.
    const fn entry(self) -> (&'static str, &'static str, &'static str, Access, Option<&'static [i64]>) {
        use Access::*;
        match self {
            Attribute::BoilerFlowTemperature => ("boiler_flow_temperature", "pe1", "L_temp_act", ReadOnly, None),
            Attribute::BoilerFlowTemperatureSetpoint => {
                ("boiler_flow_temperature_setpoint", "pe1", "L_temp_set", ReadOnly, None)
            }
            Attribute::HeatingFlowTemperature => {
                ("heating_flow_temperature", "hk1", "L_flowtemp_act", ReadOnly, None)
            }
            Attribute::HeatingFlowTemperatureSetpoint => {
                ("heating_flow_temperature_setpoint", "hk1", "L_flowtemp_set", ReadOnly, None)
            }
            Attribute::RoomTemperature => ("room_temperature", "hk1", "L_roomtemp_act", ReadOnly, None),
            Attribute::RoomTemperatureSetpoint => ("room_temperature_setpoint", "hk1", "temp_heat", ReadWrite, None),
            Attribute::RoomTemperatureSetpointOverride => {
                ("room_temperature_setpoint_override", "hk1", "remote_override", ReadWrite, None)
            }
            Attribute::BoilerFired => ("boiler_fired", "pe1", "L_state", ReadOnly, Some(FIRED_STATES)),
            Attribute::HeatingCircuitPumping => ("heating_circuit_pumping", "hk1", "L_pump", ReadOnly, Some(PUMP_ON)),
            Attribute::HeatingCircuitOperationMode => {
                ("heating_circuit_operation_mode", "hk1", "mode_auto", ReadWrite, None)
            }
        }
    }

    pub const fn name(self) -> &'static str {
        self.entry().0
    }

    pub const fn device(self) -> &'static str {
        self.entry().1
    }

    pub const fn attribute(self) -> &'static str {
        self.entry().2
    }

    pub const fn access(self) -> Access {
        self.entry().3
    }

    /// Raw states in which a boolean-like entry counts as on; `None` for measured values.
    pub const fn on_states(self) -> Option<&'static [i64]> {
        self.entry().4
    }

    pub fn is_writable(self) -> bool {
        self.access() == Access::ReadWrite
    }

    /// Query string for a single-attribute read, e.g. `hk1.L_roomtemp_act`.
    pub fn query(self) -> String {
        format!("{}.{}", self.device(), self.attribute())
    }

    pub fn from_name(name: &str) -> Option<Attribute> {
        Attribute::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl core::fmt::Display for Attribute {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
