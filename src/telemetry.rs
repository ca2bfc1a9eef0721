//! Meter telemetry and the electrical quantities derived from it.
//!
//! The energy meter reports per-phase active and apparent power, voltage,
//! current, frequency and power factor magnitude together with imported and
//! exported energy totals. [`derive`] turns such a [`TelemetrySnapshot`] into
//! every value the SunSpec meter models need: averages, line-to-line
//! voltages, reactive power and the signed power factor.

use std::fmt;

/// √3, the ratio between line-to-line and line-to-neutral voltage in a
/// balanced three phase system.
pub const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Instantaneous values of a single phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseReading {
    /// Active power in W, positive when importing from the grid.
    pub act_power: f64,
    /// Apparent power in VA.
    pub aprt_power: f64,
    /// Line-to-neutral voltage in V.
    pub voltage: f64,
    /// Current in A.
    pub current: f64,
    /// Frequency in Hz.
    pub freq: f64,
    /// Power factor magnitude as reported by the meter.
    pub pf: f64,
}

impl Default for PhaseReading {
    fn default() -> Self {
        Self {
            act_power: 0.0,
            aprt_power: 0.0,
            voltage: 0.0,
            current: 0.0,
            freq: 50.0,
            pf: 1.0,
        }
    }
}

/// One reading of the meter. Immutable once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub a: PhaseReading,
    pub b: PhaseReading,
    pub c: PhaseReading,
    /// Total active power in W, positive when importing.
    pub total_act_power: f64,
    /// Total apparent power in VA.
    pub total_aprt_power: f64,
    /// Total (neutral) current in A.
    pub total_current: f64,
    /// Imported active energy in Wh.
    pub total_act_energy: f64,
    /// Exported active energy in Wh.
    pub total_act_ret_energy: f64,
}

impl TelemetrySnapshot {
    pub fn phases(&self) -> [&PhaseReading; 3] {
        [&self.a, &self.b, &self.c]
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.total_act_power)
    }
}

/// Power flow at the grid connection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Importing,
    Exporting,
    Balanced,
}

impl Direction {
    pub fn of(active_power: f64) -> Self {
        if active_power > 0.0 {
            Direction::Importing
        } else if active_power < 0.0 {
            Direction::Exporting
        } else {
            Direction::Balanced
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Importing => write!(f, "IMPORTING"),
            Direction::Exporting => write!(f, "EXPORTING"),
            Direction::Balanced => write!(f, "BALANCED"),
        }
    }
}

/// Selects the aggregate (`Total`) or a single phase of a quantity.
///
/// For voltages, frequency and power factor the aggregate is the average of
/// the three phases; for currents and powers it is the meter's total.
/// Line-to-line voltages use `A` for AB, `B` for BC and `C` for CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    Total,
    A,
    B,
    C,
}

impl Line {
    pub const PHASES: [Line; 3] = [Line::A, Line::B, Line::C];
}

/// A value that can be placed into a register field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Current(Line),
    VoltageLn(Line),
    VoltageLl(Line),
    Frequency,
    ActivePower(Line),
    ApparentPower(Line),
    ReactivePower(Line),
    PowerFactor(Line),
    ExportedEnergy,
    ImportedEnergy,
}

impl Quantity {
    pub fn is_energy(&self) -> bool {
        matches!(self, Quantity::ExportedEnergy | Quantity::ImportedEnergy)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = |l: &Line| match l {
            Line::Total => "total",
            Line::A => "A",
            Line::B => "B",
            Line::C => "C",
        };
        match self {
            Quantity::Current(l) => write!(f, "current {} [A]", line(l)),
            Quantity::VoltageLn(l) => write!(f, "voltage L-N {} [V]", line(l)),
            Quantity::VoltageLl(l) => write!(f, "voltage L-L {} [V]", line(l)),
            Quantity::Frequency => write!(f, "frequency [Hz]"),
            Quantity::ActivePower(l) => write!(f, "active power {} [W]", line(l)),
            Quantity::ApparentPower(l) => write!(f, "apparent power {} [VA]", line(l)),
            Quantity::ReactivePower(l) => write!(f, "reactive power {} [var]", line(l)),
            Quantity::PowerFactor(l) => write!(f, "power factor {}", line(l)),
            Quantity::ExportedEnergy => write!(f, "exported energy [Wh]"),
            Quantity::ImportedEnergy => write!(f, "imported energy [Wh]"),
        }
    }
}

/// Per-line values, indexed by [`Line`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerLine {
    pub total: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl PerLine {
    pub fn get(&self, line: Line) -> f64 {
        match line {
            Line::Total => self.total,
            Line::A => self.a,
            Line::B => self.b,
            Line::C => self.c,
        }
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            total: f(self.total),
            a: f(self.a),
            b: f(self.b),
            c: f(self.c),
        }
    }
}

/// Everything the register maps can carry, computed from one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivedQuantities {
    pub current: PerLine,
    pub voltage_ln: PerLine,
    pub voltage_ll: PerLine,
    pub frequency: f64,
    pub active_power: PerLine,
    pub apparent_power: PerLine,
    pub reactive_power: PerLine,
    pub power_factor: PerLine,
    pub exported_energy: f64,
    pub imported_energy: f64,
}

impl DerivedQuantities {
    pub fn get(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Current(l) => self.current.get(l),
            Quantity::VoltageLn(l) => self.voltage_ln.get(l),
            Quantity::VoltageLl(l) => self.voltage_ll.get(l),
            Quantity::Frequency => self.frequency,
            Quantity::ActivePower(l) => self.active_power.get(l),
            Quantity::ApparentPower(l) => self.apparent_power.get(l),
            Quantity::ReactivePower(l) => self.reactive_power.get(l),
            Quantity::PowerFactor(l) => self.power_factor.get(l),
            Quantity::ExportedEnergy => self.exported_energy,
            Quantity::ImportedEnergy => self.imported_energy,
        }
    }
}

fn mean(values: [f64; 3]) -> f64 {
    values.iter().sum::<f64>() / 3.0
}

/// Reactive power from the power triangle.
///
/// The radicand is clamped at zero: noisy readings where the apparent power
/// is slightly below the active power yield `0`, never NaN.
pub fn reactive_power(apparent: f64, active: f64) -> f64 {
    (apparent * apparent - active * active).max(0.0).sqrt()
}

/// Sign applied to the meter's power factor magnitude: negative while
/// importing, positive otherwise.
pub fn power_factor_sign(total_act_power: f64) -> f64 {
    if total_act_power > 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Computes every register quantity from a snapshot.
pub fn derive(snapshot: &TelemetrySnapshot) -> DerivedQuantities {
    let [a, b, c] = snapshot.phases();

    let voltage_ln = PerLine {
        total: mean([a.voltage, b.voltage, c.voltage]),
        a: a.voltage,
        b: b.voltage,
        c: c.voltage,
    };

    let sign = power_factor_sign(snapshot.total_act_power);
    let mut power_factor = PerLine {
        total: 0.0,
        a: a.pf * sign,
        b: b.pf * sign,
        c: c.pf * sign,
    };
    power_factor.total = mean([power_factor.a, power_factor.b, power_factor.c]);

    DerivedQuantities {
        current: PerLine {
            total: snapshot.total_current,
            a: a.current,
            b: b.current,
            c: c.current,
        }
        .map(f64::abs),
        voltage_ll: voltage_ln.map(|v| v * SQRT_3),
        voltage_ln,
        frequency: mean([a.freq, b.freq, c.freq]),
        active_power: PerLine {
            total: snapshot.total_act_power,
            a: a.act_power,
            b: b.act_power,
            c: c.act_power,
        },
        apparent_power: PerLine {
            total: snapshot.total_aprt_power,
            a: a.aprt_power,
            b: b.aprt_power,
            c: c.aprt_power,
        }
        .map(f64::abs),
        reactive_power: PerLine {
            total: reactive_power(snapshot.total_aprt_power, snapshot.total_act_power),
            a: reactive_power(a.aprt_power, a.act_power),
            b: reactive_power(b.aprt_power, b.act_power),
            c: reactive_power(c.aprt_power, c.act_power),
        },
        power_factor,
        exported_energy: snapshot.total_act_ret_energy,
        imported_energy: snapshot.total_act_energy,
    }
}

/// One-line description of a successfully applied reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSummary {
    pub direction: Direction,
    pub active_power: f64,
    pub apparent_power: f64,
    pub reactive_power: f64,
    pub power_factor: f64,
    pub imported_energy: f64,
    pub exported_energy: f64,
}

impl StatusSummary {
    pub fn new(snapshot: &TelemetrySnapshot, derived: &DerivedQuantities) -> Self {
        Self {
            direction: snapshot.direction(),
            active_power: derived.active_power.total,
            apparent_power: derived.apparent_power.total,
            reactive_power: derived.reactive_power.total,
            power_factor: derived.power_factor.total,
            imported_energy: derived.imported_energy,
            exported_energy: derived.exported_energy,
        }
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, energy_label, energy) = match self.direction {
            Direction::Importing => ("IMPORT", "Imported", self.imported_energy),
            Direction::Exporting => ("EXPORT", "Exported", self.exported_energy),
            Direction::Balanced => return write!(f, "BALANCED"),
        };
        write!(
            f,
            "{label}: P={:.0}W S={:.0}VA Q={:.0}VAR PF={:.2} | {energy_label}: {energy:.0}Wh",
            self.active_power.abs(),
            self.apparent_power,
            self.reactive_power,
            self.power_factor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(act_power: f64, aprt_power: f64, voltage: f64, pf: f64) -> PhaseReading {
        PhaseReading {
            act_power,
            aprt_power,
            voltage,
            current: aprt_power / voltage,
            pf,
            ..Default::default()
        }
    }

    fn importing_snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            a: phase(500.0, 550.0, 230.0, 0.9),
            b: phase(500.0, 550.0, 231.0, 0.9),
            c: phase(500.0, 550.0, 229.0, 0.9),
            total_act_power: 1500.0,
            total_aprt_power: 1650.0,
            total_current: 7.2,
            total_act_energy: 1_000_000.0,
            total_act_ret_energy: 250_000.0,
        }
    }

    #[test]
    fn reactive_power_triangle() {
        assert_eq!(reactive_power(500.0, 300.0), 400.0);
        assert_eq!(reactive_power(500.0, -300.0), 400.0);
        // apparent below active: clamped, not NaN
        assert_eq!(reactive_power(300.0, 500.0), 0.0);
        assert_eq!(reactive_power(0.0, 0.0), 0.0);
    }

    #[test]
    fn power_factor_sign_follows_direction() {
        let mut snapshot = importing_snapshot();
        snapshot.total_act_power = 1000.0;
        let derived = derive(&snapshot);
        assert!((derived.power_factor.total - -0.9).abs() < 1e-12);
        assert!((derived.power_factor.a - -0.9).abs() < 1e-12);

        snapshot.total_act_power = -1000.0;
        assert!((derive(&snapshot).power_factor.total - 0.9).abs() < 1e-12);

        snapshot.total_act_power = 0.0;
        assert!((derive(&snapshot).power_factor.total - 0.9).abs() < 1e-12);
    }

    #[test]
    fn averages_and_line_to_line() {
        let mut snapshot = importing_snapshot();
        snapshot.a.freq = 49.9;
        snapshot.b.freq = 50.0;
        snapshot.c.freq = 50.1;
        let derived = derive(&snapshot);

        assert!((derived.voltage_ln.total - 230.0).abs() < 1e-9);
        assert!((derived.frequency - 50.0).abs() < 1e-9);
        assert!((derived.voltage_ll.a - 230.0 * SQRT_3).abs() < 1e-9);
        assert!((derived.voltage_ll.total - 398.371_685_740_841_7).abs() < 1e-6);
        assert_eq!(derived.get(Quantity::VoltageLn(Line::B)), 231.0);
    }

    #[test]
    fn magnitudes_are_absolute() {
        let mut snapshot = importing_snapshot();
        snapshot.a.current = -3.0;
        snapshot.total_current = -7.0;
        snapshot.b.aprt_power = -550.0;
        snapshot.a.act_power = -200.0;
        let derived = derive(&snapshot);

        assert_eq!(derived.current.a, 3.0);
        assert_eq!(derived.current.total, 7.0);
        assert_eq!(derived.apparent_power.b, 550.0);
        // active power keeps its sign
        assert_eq!(derived.active_power.a, -200.0);
    }

    #[test]
    fn energies_pass_through() {
        let derived = derive(&importing_snapshot());
        assert_eq!(derived.get(Quantity::ImportedEnergy), 1_000_000.0);
        assert_eq!(derived.get(Quantity::ExportedEnergy), 250_000.0);
    }

    #[test]
    fn summary_line() {
        let snapshot = importing_snapshot();
        let summary = StatusSummary::new(&snapshot, &derive(&snapshot));
        assert_eq!(
            summary.to_string(),
            "IMPORT: P=1500W S=1650VA Q=687VAR PF=-0.90 | Imported: 1000000Wh"
        );

        let mut exporting = snapshot;
        exporting.total_act_power = -800.0;
        exporting.total_aprt_power = 1000.0;
        let summary = StatusSummary::new(&exporting, &derive(&exporting));
        assert_eq!(
            summary.to_string(),
            "EXPORT: P=800W S=1000VA Q=600VAR PF=0.90 | Exported: 250000Wh"
        );

        let mut balanced = snapshot;
        balanced.total_act_power = 0.0;
        let summary = StatusSummary::new(&balanced, &derive(&balanced));
        assert_eq!(summary.to_string(), "BALANCED");
    }
}
