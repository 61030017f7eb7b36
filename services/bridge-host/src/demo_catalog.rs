//! A small, representative variable catalog for the demo host binary.
//!
//! The real simulator host's full canonical variable list (hundreds of
//! names) is supplied by that host at startup and is out of scope here —
//! this is just enough of a sample, across every group, to exercise every
//! transport end to end.

use bridge_protocol::VariableGroup;

pub fn sample_specs() -> Vec<(&'static str, VariableGroup, Option<(f64, f64)>)> {
    vec![
        ("Aircraft.Altitude", VariableGroup::Aircraft, Some((-1000.0, 60_000.0))),
        ("Aircraft.Pitch", VariableGroup::Aircraft, Some((-90.0, 90.0))),
        ("Aircraft.Bank", VariableGroup::Aircraft, Some((-180.0, 180.0))),
        ("Aircraft.Velocity.x", VariableGroup::Aircraft, None),
        ("Aircraft.Velocity.y", VariableGroup::Aircraft, None),
        ("Aircraft.Velocity.z", VariableGroup::Aircraft, None),
        ("Controls.Throttle", VariableGroup::Controls, Some((0.0, 1.0))),
        ("Controls.Flaps", VariableGroup::Controls, Some((0.0, 1.0))),
        ("Controls.Elevator", VariableGroup::Controls, Some((-1.0, 1.0))),
        ("Engine.1.RPM", VariableGroup::Engine, Some((0.0, 3000.0))),
        ("Engine.1.FuelFlow", VariableGroup::Engine, Some((0.0, 500.0))),
        ("Navigation.Heading", VariableGroup::Navigation, Some((0.0, 360.0))),
        ("Navigation.GroundSpeed", VariableGroup::Navigation, Some((0.0, 700.0))),
        ("Autopilot.Engaged", VariableGroup::Autopilot, Some((0.0, 1.0))),
        ("Autopilot.TargetAltitude", VariableGroup::Autopilot, Some((-1000.0, 60_000.0))),
        ("Environment.WindSpeed", VariableGroup::Environment, Some((0.0, 200.0))),
        ("Environment.OutsideAirTemp", VariableGroup::Environment, Some((-80.0, 60.0))),
        ("Communication.ActiveFrequency", VariableGroup::Communication, None),
        ("Warnings.StallWarning", VariableGroup::Warnings, Some((0.0, 1.0))),
        ("Command.PendingCount", VariableGroup::Command, Some((0.0, 512.0))),
        ("Misc.SimulationRate", VariableGroup::Misc, Some((0.0, 8.0))),
    ]
}
