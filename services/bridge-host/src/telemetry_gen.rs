//! Synthetic telemetry generator standing in for the simulator host's real
//! per-tick export. Produces smooth, bounded values so a connected demo
//! client sees plausible movement rather than noise.

use bridge_core::codec::{encode_frame, TelemetryRecord, TelemetryValue};
use bridge_core::hash::fnv1a64;

pub struct TelemetryGenerator {
    names: Vec<&'static str>,
}

impl TelemetryGenerator {
    pub fn new(names: Vec<&'static str>) -> Self {
        Self { names }
    }

    /// Encodes one frame for tick `tick`, with every named variable tracing
    /// a distinct, slowly varying sine wave so each looks independently
    /// alive in a connected client.
    pub fn frame_for_tick(&self, tick: u64) -> Vec<u8> {
        let t = tick as f64 * 0.02; // assumes a 50Hz caller; fine for a demo
        let records: Vec<TelemetryRecord> = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let phase = i as f64 * 0.7;
                let value = 50.0 + 40.0 * (t + phase).sin();
                TelemetryRecord { id: fnv1a64(name), value: TelemetryValue::F64(value) }
            })
            .collect();
        encode_frame(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_one_record_per_configured_name() {
        let gen = TelemetryGenerator::new(vec!["A", "B", "C"]);
        let frame = gen.frame_for_tick(0);
        let records = bridge_core::codec::decode_frame(&frame).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn values_vary_across_ticks() {
        let gen = TelemetryGenerator::new(vec!["A"]);
        let first = gen.frame_for_tick(0);
        let later = gen.frame_for_tick(200);
        assert_ne!(first, later);
    }
}
