//! JSON payload builder: turns one snapshot read into the exact bytes sent
//! on the TCP data port (one line, newline-terminated) and the WebSocket
//! channel (one text frame, same bytes minus the newline).
//!
//! Numeric fields are always rendered with a fixed six decimal places
//! rather than through `serde_json`'s default float formatting, so the
//! payload's size is predictable per-variable and clients can rely on a
//! stable textual precision instead of whatever `ryu` happens to produce.

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadHeader {
    pub schema: &'static str,
    pub schema_version: u32,
    pub timestamp_us: u64,
    pub data_valid: u32,
    pub update_counter: u32,
    pub broadcast_rate_hz: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadArtifact {
    /// A complete line for the TCP data port, including the trailing `\n`.
    pub tcp_line: Vec<u8>,
    /// The same JSON document for a WebSocket text frame, no trailing
    /// newline — WebSocket framing supplies its own message boundary.
    pub ws_text: String,
    pub truncated: bool,
    pub dropped_variable_count: usize,
}

pub struct PayloadBuilder {
    max_payload_bytes: usize,
}

impl PayloadBuilder {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    /// Builds a payload from `ordered_values` in catalog index order.
    /// Catalog index order is also truncation priority: if the encoded
    /// payload would exceed `max_payload_bytes`, variables are dropped from
    /// the tail (highest index first) until it fits.
    pub fn build(&self, header: &PayloadHeader, ordered_values: &[(&str, f64)]) -> PayloadArtifact {
        let mut keep = ordered_values.len();
        loop {
            let json = render(header, &ordered_values[..keep]);
            if json.len() <= self.max_payload_bytes || keep == 0 {
                let dropped = ordered_values.len() - keep;
                let mut tcp_line = json.into_bytes();
                let ws_text = String::from_utf8(tcp_line.clone()).expect("valid utf-8 json");
                tcp_line.push(b'\n');
                return PayloadArtifact {
                    tcp_line,
                    ws_text,
                    truncated: dropped > 0,
                    dropped_variable_count: dropped,
                };
            }
            keep -= 1;
        }
    }
}

fn render(header: &PayloadHeader, values: &[(&str, f64)]) -> String {
    let mut out = String::with_capacity(128 + values.len() * 32);
    out.push('{');
    out.push_str(&format!(
        "\"schema\":{},",
        serde_json::to_string(header.schema).expect("schema is valid utf-8")
    ));
    out.push_str(&format!("\"schema_version\":{},", header.schema_version));
    out.push_str(&format!("\"timestamp\":{},", header.timestamp_us));
    out.push_str("\"timestamp_unit\":\"microseconds\",");
    out.push_str(&format!("\"data_valid\":{},", header.data_valid));
    out.push_str(&format!("\"update_counter\":{},", header.update_counter));
    out.push_str(&format!("\"broadcast_rate_hz\":{:.6},", header.broadcast_rate_hz));
    out.push_str("\"variables\":{");
    for (i, (name, value)) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(name).expect("name is valid utf-8"));
        out.push(':');
        out.push_str(&format_value(*value));
    }
    out.push('}');
    out.push('}');
    out
}

fn format_value(value: f64) -> String {
    if value.is_nan() || value.is_infinite() {
        // JSON has no literal for these; clients expect a number field, so
        // fall back to 0.0 rather than emit invalid JSON.
        return "0.000000".to_owned();
    }
    format!("{value:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> PayloadHeader {
        PayloadHeader {
            schema: "aerofly-bridge-telemetry",
            schema_version: 1,
            timestamp_us: 123_456,
            data_valid: 1,
            update_counter: 9,
            broadcast_rate_hz: 50.0,
        }
    }

    #[test]
    fn values_format_with_six_decimal_places() {
        let builder = PayloadBuilder::new(64 * 1024);
        let artifact = builder.build(&header(), &[("Aircraft.Altitude", 1066.8)]);
        assert!(artifact.ws_text.contains("\"Aircraft.Altitude\":1066.800000"));
    }

    #[test]
    fn tcp_line_ends_with_newline_ws_text_does_not() {
        let builder = PayloadBuilder::new(64 * 1024);
        let artifact = builder.build(&header(), &[("Aircraft.Pitch", 1.0)]);
        assert_eq!(*artifact.tcp_line.last().unwrap(), b'\n');
        assert!(!artifact.ws_text.ends_with('\n'));
        assert_eq!(&artifact.tcp_line[..artifact.tcp_line.len() - 1], artifact.ws_text.as_bytes());
    }

    #[test]
    fn variable_order_is_preserved_in_the_rendered_object() {
        let builder = PayloadBuilder::new(64 * 1024);
        let values = [("Aircraft.Altitude", 1.0), ("Aircraft.Pitch", 2.0), ("Aircraft.Bank", 3.0)];
        let artifact = builder.build(&header(), &values);
        let alt = artifact.ws_text.find("Aircraft.Altitude").unwrap();
        let pitch = artifact.ws_text.find("Aircraft.Pitch").unwrap();
        let bank = artifact.ws_text.find("Aircraft.Bank").unwrap();
        assert!(alt < pitch && pitch < bank);
    }

    #[test]
    fn oversized_payload_drops_tail_variables_and_reports_truncation() {
        let values: Vec<(&str, f64)> = vec![
            ("Aircraft.A", 1.0),
            ("Aircraft.B", 2.0),
            ("Aircraft.C", 3.0),
        ];
        // A budget that fits the header and the first variable but not all three.
        let small_builder = PayloadBuilder::new(80);
        let artifact = small_builder.build(&header(), &values);
        assert!(artifact.truncated);
        assert!(artifact.dropped_variable_count > 0);
        assert!(artifact.ws_text.len() <= 80 || artifact.dropped_variable_count == values.len());
    }

    #[test]
    fn payload_within_budget_is_not_truncated() {
        let builder = PayloadBuilder::new(64 * 1024);
        let artifact = builder.build(&header(), &[("Aircraft.Altitude", 1.0)]);
        assert!(!artifact.truncated);
        assert_eq!(artifact.dropped_variable_count, 0);
    }

    #[test]
    fn non_finite_values_render_as_zero() {
        let builder = PayloadBuilder::new(64 * 1024);
        let artifact = builder.build(&header(), &[("Broken", f64::NAN)]);
        assert!(artifact.ws_text.contains("\"Broken\":0.000000"));
    }
}
