use std::fmt;

/// A named physical value reported by the charge controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    BatteryVoltage,
    BatteryCurrent,
    BatteryPower,
    ControllerTemperature,
    LoadVoltage,
    LoadCurrent,
    LoadPower,
    PanelVoltage,
    PeakPowerToday,
    EnergyProductionToday,
    DaysRunning,
    EnergyProductionLifetime,
}

impl Channel {
    /// Every channel, in register order
    pub const ALL: [Channel; 12] = [
        Channel::BatteryVoltage,
        Channel::BatteryCurrent,
        Channel::BatteryPower,
        Channel::ControllerTemperature,
        Channel::LoadVoltage,
        Channel::LoadCurrent,
        Channel::LoadPower,
        Channel::PanelVoltage,
        Channel::PeakPowerToday,
        Channel::EnergyProductionToday,
        Channel::DaysRunning,
        Channel::EnergyProductionLifetime,
    ];

    /// Stable identifier, suitable for use as a config or entity key
    pub fn key(&self) -> &'static str {
        match self {
            Channel::BatteryVoltage => "battery_voltage",
            Channel::BatteryCurrent => "battery_current",
            Channel::BatteryPower => "battery_power",
            Channel::ControllerTemperature => "controller_temperature",
            Channel::LoadVoltage => "load_voltage",
            Channel::LoadCurrent => "load_current",
            Channel::LoadPower => "load_power",
            Channel::PanelVoltage => "panel_voltage",
            Channel::PeakPowerToday => "peak_power_today",
            Channel::EnergyProductionToday => "energy_production_today",
            Channel::DaysRunning => "days_running",
            Channel::EnergyProductionLifetime => "energy_production_lifetime",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Channel::BatteryVoltage | Channel::LoadVoltage | Channel::PanelVoltage => "V",
            Channel::BatteryCurrent | Channel::LoadCurrent => "A",
            Channel::BatteryPower | Channel::LoadPower | Channel::PeakPowerToday => "W",
            Channel::ControllerTemperature => "°C",
            Channel::EnergyProductionToday | Channel::EnergyProductionLifetime => "Wh",
            Channel::DaysRunning => "d",
        }
    }

    /// Number of decimals worth displaying, given the register's scale
    pub fn accuracy_decimals(&self) -> usize {
        match self {
            Channel::BatteryVoltage | Channel::LoadVoltage | Channel::PanelVoltage => 1,
            Channel::BatteryCurrent | Channel::LoadCurrent => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single decoded value, already scaled to its physical unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub channel: Channel,
    pub value: f32,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {:.*} {}",
            self.channel,
            self.channel.accuracy_decimals(),
            self.value,
            self.channel.unit()
        )
    }
}

/// Register 4 packs two 8-bit temperatures into one 16-bit word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTemperatures {
    /// High byte, in °C
    pub controller_c: u8,
    /// Low byte. Appears to be the external (battery) sensor, not published
    pub external_c: u8,
}

impl PackedTemperatures {
    pub fn unpack(register: [u8; 2]) -> Self {
        Self { controller_c: register[0], external_c: register[1] }
    }
}

/// The reported state of the charge controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    /// Battery voltage in V
    pub battery_voltage_v: f32,
    /// Battery (charge) current in A
    pub battery_current_a: f32,
    /// Battery (charge) power in W
    pub battery_power_w: f32,
    pub temperatures: PackedTemperatures,
    /// Load output voltage in V
    pub load_voltage_v: f32,
    /// Load output current in A
    pub load_current_a: f32,
    /// Load output power in W
    pub load_power_w: f32,
    /// PV panel voltage in V
    pub panel_voltage_v: f32,
    /// Peak charge power seen today in W
    pub peak_power_today_w: f32,
    /// Energy produced today in Wh
    pub energy_production_today_wh: f32,
    /// Days the controller has been running
    pub days_running: f32,
    /// Energy produced over the controller's lifetime in Wh
    pub energy_production_lifetime_wh: f32,
}

impl ControllerState {
    pub fn value(&self, channel: Channel) -> f32 {
        match channel {
            Channel::BatteryVoltage => self.battery_voltage_v,
            Channel::BatteryCurrent => self.battery_current_a,
            Channel::BatteryPower => self.battery_power_w,
            Channel::ControllerTemperature => self.temperatures.controller_c as f32,
            Channel::LoadVoltage => self.load_voltage_v,
            Channel::LoadCurrent => self.load_current_a,
            Channel::LoadPower => self.load_power_w,
            Channel::PanelVoltage => self.panel_voltage_v,
            Channel::PeakPowerToday => self.peak_power_today_w,
            Channel::EnergyProductionToday => self.energy_production_today_wh,
            Channel::DaysRunning => self.days_running,
            Channel::EnergyProductionLifetime => self.energy_production_lifetime_wh,
        }
    }

    /// All published readings, one per channel
    pub fn readings(&self) -> Vec<Reading> {
        Channel::ALL
            .iter()
            .map(|&channel| Reading { channel, value: self.value(channel) })
            .collect()
    }
}

#[test]
fn test_packed_temperatures_split() {
    let t = PackedTemperatures::unpack([0x32, 0x1e]);
    assert_eq!(t.controller_c, 50);
    assert_eq!(t.external_c, 30);
}

#[test]
fn test_reading_display_uses_precision_and_unit() {
    let r = Reading { channel: Channel::BatteryCurrent, value: 0.05 };
    assert_eq!(r.to_string(), "battery_current = 0.05 A");
    let r = Reading { channel: Channel::EnergyProductionLifetime, value: 5000.0 };
    assert_eq!(r.to_string(), "energy_production_lifetime = 5000 Wh");
}
