//! Command codec
//!
//! Encodes technique parameters into the analyzer's positional ASCII command
//! grammar and classifies the lines the analyzer sends back.
//!
//! Parameter command layout (no field names on the wire):
//! - CV:  `P start,end,dir,rate,start,cycles,-1,0,0,10,100,rate,20,range,range,2,0,1,`
//! - DPV: `P start,end,dir,height,start2,cycles,vertex,0,0,10,100,width,period,window,range,2,1,1,D`

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DataPoint, ProtocolError};
use crate::technique::{
    CvParameters, DpvParameters, ScanDirection, Technique, TechniqueParameters, DPV_VERTEX_AUTO,
};

/// Number of positional fields in a parameter command (both techniques)
pub const PARAMETER_FIELD_COUNT: usize = 18;

/// Prefix of every parameter command
pub const PARAMETER_PREFIX: &str = "P ";

/// Classified unit derived from one line received from the instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseEvent {
    /// Parameters accepted (`#`)
    Ack,
    /// Scan started (`*`)
    StartConfirmed,
    /// Scan finished (`@`, or `$` for DPV)
    Complete,
    /// One (potential, current) sample
    DataSample(DataPoint),
    /// Data-shaped line whose fields did not parse
    Malformed(String),
    /// Anything else
    Unknown(String),
}

/// Encoded command ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBytes(Vec<u8>);

impl CommandBytes {
    /// Raw bytes to write
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Command as text (commands are always ASCII)
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the command is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CommandBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One positional slot of a parameter command
#[derive(Debug, Clone, Copy)]
enum Field {
    Real(f64),
    Int(i64),
}

impl Field {
    fn render(&self, out: &mut String) -> Result<(), ProtocolError> {
        match *self {
            Field::Real(value) => {
                if !value.is_finite() {
                    return Err(ProtocolError::Encoding(format!(
                        "non-finite field value {}",
                        value
                    )));
                }
                let text = value.to_string();
                out.push_str(&text);
                // Instrument firmware expects reals to carry a fractional part
                if !text.contains('.') {
                    out.push_str(".0");
                }
            }
            Field::Int(value) => out.push_str(&value.to_string()),
        }
        Ok(())
    }
}

fn cv_fields(p: &CvParameters) -> [Field; PARAMETER_FIELD_COUNT] {
    [
        Field::Real(p.start_v),
        Field::Real(p.end_v),
        Field::Int(p.scan_direction.wire_value()),
        Field::Real(p.scan_rate),
        Field::Real(p.start_v),
        Field::Int(p.cycles as i64),
        Field::Int(-1),
        Field::Int(0),
        Field::Int(0),
        Field::Int(10),
        Field::Int(100),
        Field::Real(p.scan_rate),
        Field::Int(20),
        Field::Int(p.current_range as i64),
        Field::Int(p.current_range as i64),
        Field::Int(2),
        Field::Int(0),
        Field::Int(1),
    ]
}

/// `-1` asks the instrument to pick the vertex; firmware expects it as an integer
fn vertex_field(vertex_v: f64) -> Field {
    if vertex_v == DPV_VERTEX_AUTO {
        Field::Int(-1)
    } else {
        Field::Real(vertex_v)
    }
}

fn dpv_fields(p: &DpvParameters) -> [Field; PARAMETER_FIELD_COUNT] {
    [
        Field::Real(p.start_v),
        Field::Real(p.end_v),
        Field::Int(p.scan_direction.wire_value()),
        Field::Real(p.pulse_height),
        Field::Real(p.second_start_v),
        Field::Int(p.cycles as i64),
        vertex_field(p.vertex_v),
        Field::Int(0),
        Field::Int(0),
        Field::Int(10),
        Field::Int(100),
        Field::Int(p.pulse_width_ms as i64),
        Field::Int(p.pulse_period_ms as i64),
        Field::Int(p.sample_width_ms as i64),
        Field::Int(p.current_range as i64),
        Field::Int(2),
        Field::Int(1),
        Field::Int(1),
    ]
}

/// Encode a parameter command for the technique of `params`
pub fn encode(params: &TechniqueParameters) -> Result<CommandBytes, ProtocolError> {
    params.validate()?;

    let fields = match params {
        TechniqueParameters::Cv(p) => cv_fields(p),
        TechniqueParameters::Dpv(p) => dpv_fields(p),
    };

    let mut line = String::from(PARAMETER_PREFIX);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        field.render(&mut line)?;
    }
    line.push_str(params.technique().command_terminator());

    Ok(CommandBytes(line.into_bytes()))
}

/// Single-byte start command for `technique`
pub fn start_command(technique: Technique) -> CommandBytes {
    CommandBytes(vec![technique.start_byte()])
}

/// Classify one raw line.
///
/// Returns `None` for lines that are empty once terminators are stripped.
pub fn classify(technique: Technique, raw: &str) -> Option<ResponseEvent> {
    let line = raw.trim_matches(|c: char| c == '\r' || c == '\n' || c.is_whitespace());
    if line.is_empty() {
        return None;
    }

    let event = match line {
        "#" => ResponseEvent::Ack,
        "*" => ResponseEvent::StartConfirmed,
        marker if technique.accepts_completion_marker(marker) => ResponseEvent::Complete,
        data if data.contains(',') => match parse_sample(data) {
            Some(point) => ResponseEvent::DataSample(point),
            None => ResponseEvent::Malformed(data.to_string()),
        },
        other => ResponseEvent::Unknown(other.to_string()),
    };
    Some(event)
}

fn parse_sample(line: &str) -> Option<DataPoint> {
    let mut parts = line.split(',');
    let voltage: f64 = parts.next()?.trim().parse().ok()?;
    let current: f64 = parts.next()?.trim().parse().ok()?;
    if !voltage.is_finite() || !current.is_finite() {
        return None;
    }
    Some(DataPoint::new(voltage, current))
}

/// Render a sample the way the instrument prints it, CRLF included
pub fn format_data_line(technique: Technique, point: DataPoint) -> String {
    format!(
        "{:.4},{:.*},\r\n",
        point.voltage,
        technique.current_decimals(),
        point.current
    )
}

/// Parse a parameter command back into parameters.
///
/// The technique is taken from the terminator (`,` for CV, `,D` for DPV).
pub fn decode_parameters(command: &str) -> Result<TechniqueParameters, ProtocolError> {
    let line = command.trim_end_matches(['\r', '\n']);
    let body = line
        .strip_prefix(PARAMETER_PREFIX)
        .ok_or_else(|| malformed_command("missing 'P ' prefix"))?;

    let (technique, body) = if let Some(rest) = body.strip_suffix(Technique::Dpv.command_terminator()) {
        (Technique::Dpv, rest)
    } else if let Some(rest) = body.strip_suffix(Technique::Cv.command_terminator()) {
        (Technique::Cv, rest)
    } else {
        return Err(malformed_command("unknown command terminator"));
    };

    let fields: Vec<&str> = body.split(',').map(str::trim).collect();
    if fields.len() != PARAMETER_FIELD_COUNT {
        return Err(malformed_command(&format!(
            "expected {} fields, got {}",
            PARAMETER_FIELD_COUNT,
            fields.len()
        )));
    }

    let direction = ScanDirection::from_wire(int_field(&fields, 2)?)
        .ok_or_else(|| malformed_command("scan direction must be 1 or -1"))?;

    let params = match technique {
        Technique::Cv => TechniqueParameters::Cv(CvParameters {
            start_v: real_field(&fields, 0)?,
            end_v: real_field(&fields, 1)?,
            scan_direction: direction,
            scan_rate: real_field(&fields, 3)?,
            cycles: u32_field(&fields, 5)?,
            current_range: u32_field(&fields, 13)?,
        }),
        Technique::Dpv => TechniqueParameters::Dpv(DpvParameters {
            start_v: real_field(&fields, 0)?,
            end_v: real_field(&fields, 1)?,
            scan_direction: direction,
            pulse_height: real_field(&fields, 3)?,
            second_start_v: real_field(&fields, 4)?,
            cycles: u32_field(&fields, 5)?,
            vertex_v: real_field(&fields, 6)?,
            pulse_width_ms: u32_field(&fields, 11)?,
            pulse_period_ms: u32_field(&fields, 12)?,
            sample_width_ms: u32_field(&fields, 13)?,
            current_range: u32_field(&fields, 14)?,
        }),
    };
    Ok(params)
}

fn malformed_command(reason: &str) -> ProtocolError {
    ProtocolError::InvalidParameters(format!("malformed parameter command: {}", reason))
}

fn real_field(fields: &[&str], index: usize) -> Result<f64, ProtocolError> {
    fields[index]
        .parse::<f64>()
        .map_err(|_| malformed_command(&format!("field {} is not a number: {:?}", index, fields[index])))
}

fn int_field(fields: &[&str], index: usize) -> Result<i64, ProtocolError> {
    if let Ok(value) = fields[index].parse::<i64>() {
        return Ok(value);
    }
    let real = real_field(fields, index)?;
    if real.fract() == 0.0 {
        Ok(real as i64)
    } else {
        Err(malformed_command(&format!("field {} is not an integer: {:?}", index, fields[index])))
    }
}

fn u32_field(fields: &[&str], index: usize) -> Result<u32, ProtocolError> {
    let value = int_field(fields, index)?;
    u32::try_from(value)
        .map_err(|_| malformed_command(&format!("field {} out of range: {}", index, value)))
}
