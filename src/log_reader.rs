//! Reading the blackbox container: locating the concatenated flight
//! sessions, parsing each session's ASCII header block, and decoding its
//! binary frame stream into raw integer rows.
//!
//! A container file is 1..N sessions back to back, each opening with the
//! recorder's product marker line. The header is a run of `H name:value`
//! lines; everything after the last header line is binary frame data until
//! the next session marker (or the end of the file). The header's
//! `Field …` entries declare the field order and the per-field
//! predictor/encoding tables that [`crate::frame_codec`] consumes.

use nom::{
    bytes::complete::{tag, take_until},
    character::complete::{char, hex_digit1},
    combinator::{all_consuming, map, map_res, rest},
    sequence::{preceded, tuple},
    IResult,
};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::byte_stream::ByteStream;
use crate::error::BblError;
use crate::frame_codec::{
    AuxFrameDef, Encoding, FieldCodec, FrameDecoder, MainFieldDef, MainFrameDef, Predictor,
    PredictorConstants,
};

/// First line of every session; counting its occurrences counts sessions.
pub const SESSION_MARKER: &[u8] = b"H Product:Blackbox flight data recorder by Nicholas Sherlock";

/// One typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// A decimal or `0x`-prefixed integer.
    Int(i64),
    /// A decimal float.
    Float(f64),
    /// Anything that is not numeric, e.g. firmware identification.
    Str(String),
    /// A comma-separated list in which every element is an integer.
    IntList(Vec<i64>),
}

/// The raw, immutable key-value header of one session.
///
/// Derived quantities live in [`crate::flight_header::FlightHeader`]; this
/// struct is never modified after parsing.
#[derive(Debug, Clone, Default)]
pub struct RawHeader {
    entries: BTreeMap<String, HeaderValue>,
}

impl RawHeader {
    /// An empty header, for building synthetic ones in tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn set(&mut self, key: &str, value: HeaderValue) {
        self.entries.insert(key.to_string(), value);
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.get(key)
    }

    fn missing(key: &str) -> BblError {
        BblError::Consistency(format!("header \"{}\" is missing", key))
    }

    /// An integer entry, required.
    pub fn int(&self, key: &str) -> Result<i64, BblError> {
        match self.entries.get(key) {
            Some(HeaderValue::Int(value)) => Ok(*value),
            Some(_) => Err(BblError::Consistency(format!(
                "header \"{}\" is not an integer",
                key
            ))),
            None => Err(Self::missing(key)),
        }
    }

    /// An integer entry with a fallback for absent keys.
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        match self.entries.get(key) {
            Some(HeaderValue::Int(value)) => *value,
            _ => default,
        }
    }

    /// A numeric entry (integer or float), required.
    pub fn float(&self, key: &str) -> Result<f64, BblError> {
        match self.entries.get(key) {
            Some(HeaderValue::Int(value)) => Ok(*value as f64),
            Some(HeaderValue::Float(value)) => Ok(*value),
            Some(_) => Err(BblError::Consistency(format!(
                "header \"{}\" is not numeric",
                key
            ))),
            None => Err(Self::missing(key)),
        }
    }

    /// A string entry, required.
    pub fn str(&self, key: &str) -> Result<&str, BblError> {
        match self.entries.get(key) {
            Some(HeaderValue::Str(value)) => Ok(value),
            Some(_) => Err(BblError::Consistency(format!(
                "header \"{}\" is not a string",
                key
            ))),
            None => Err(Self::missing(key)),
        }
    }

    /// A string entry with a fallback for absent keys.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.entries.get(key) {
            Some(HeaderValue::Str(value)) => value,
            _ => default,
        }
    }

    /// An integer-list entry, required. A bare integer counts as a
    /// one-element list, which is how single-field frame definitions
    /// naturally parse.
    pub fn int_list(&self, key: &str) -> Result<Vec<i64>, BblError> {
        match self.entries.get(key) {
            Some(HeaderValue::IntList(values)) => Ok(values.clone()),
            Some(HeaderValue::Int(value)) => Ok(vec![*value]),
            Some(_) => Err(BblError::Consistency(format!(
                "header \"{}\" is not an integer list",
                key
            ))),
            None => Err(Self::missing(key)),
        }
    }
}

/// One fully decoded flight session: raw header, the main-frame field
/// order, and the decoded raw rows.
#[derive(Debug, Clone)]
pub struct LogSession {
    /// The session's header, as parsed.
    pub header: RawHeader,
    /// Main-frame field names in wire (and row) order.
    pub field_names: Vec<String>,
    /// Decoded raw integer rows, one per logged sample tick.
    pub frames: Vec<Vec<i64>>,
}

/// A container file holding one or more concatenated sessions.
pub struct LogContainer {
    data: Vec<u8>,
    starts: Vec<usize>,
}

impl LogContainer {
    /// Reads a container from disk and locates its sessions without
    /// decoding any of them.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BblError> {
        Self::from_bytes(fs::read(path)?)
    }

    /// As [`LogContainer::open`], over an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, BblError> {
        let starts = find_session_starts(&data);
        if starts.is_empty() {
            return Err(BblError::Format {
                offset: 0,
                reason: "no blackbox session marker found".to_string(),
            });
        }
        Ok(Self { data, starts })
    }

    /// Number of sessions in the container.
    pub fn session_count(&self) -> usize {
        self.starts.len()
    }

    /// Decodes the `index`th session (1-based, matching how pilots number
    /// their flights).
    pub fn read_session(&self, index: usize) -> Result<LogSession, BblError> {
        if index == 0 || index > self.starts.len() {
            return Err(BblError::SessionIndex {
                index,
                count: self.starts.len(),
            });
        }
        let start = self.starts[index - 1];
        let end = self
            .starts
            .get(index)
            .copied()
            .unwrap_or(self.data.len());
        decode_session(&self.data, start, end)
    }
}

/// Byte offsets of every session marker in the container.
fn find_session_starts(data: &[u8]) -> Vec<usize> {
    if data.len() < SESSION_MARKER.len() {
        return Vec::new();
    }
    data.windows(SESSION_MARKER.len())
        .enumerate()
        .filter(|(_, window)| *window == SESSION_MARKER)
        .map(|(offset, _)| offset)
        .collect()
}

/// `H name:value`, names may contain anything but a colon.
fn parse_header_line(line: &str) -> IResult<&str, (&str, &str)> {
    map(
        tuple((tag("H "), take_until(":"), char(':'), rest)),
        |(_, name, _, value)| (name, value),
    )(line)
}

/// `0x`-prefixed hexadecimal integer, the form `gyro_scale` is stored in.
fn parse_hex_int(input: &str) -> IResult<&str, i64> {
    map_res(preceded(tag("0x"), hex_digit1), |digits| {
        i64::from_str_radix(digits, 16)
    })(input)
}

/// Types a header value: hex int, decimal int, float, all-integer comma
/// list, or plain string, in that order.
fn classify_value(value: &str) -> HeaderValue {
    if let Ok((_, parsed)) = all_consuming(parse_hex_int)(value) {
        return HeaderValue::Int(parsed);
    }
    if let Ok(parsed) = value.parse::<i64>() {
        return HeaderValue::Int(parsed);
    }
    if let Ok(parsed) = value.parse::<f64>() {
        return HeaderValue::Float(parsed);
    }
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() > 1 {
        let ints: Result<Vec<i64>, _> = parts.iter().map(|p| p.trim().parse::<i64>()).collect();
        if let Ok(ints) = ints {
            return HeaderValue::IntList(ints);
        }
    }
    HeaderValue::Str(value.to_string())
}

/// Parses the header block starting at `start`, returning the header and
/// the offset of the first data byte.
fn parse_header(data: &[u8], start: usize, end: usize) -> Result<(RawHeader, usize), BblError> {
    let mut header = RawHeader::new();
    let mut pos = start;
    while pos < end && data[pos..end].starts_with(b"H ") {
        let line_end = data[pos..end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .ok_or_else(|| BblError::Format {
                offset: pos,
                reason: "header line without a terminating newline".to_string(),
            })?;
        let line = std::str::from_utf8(&data[pos..line_end])
            .map_err(|_| BblError::Format {
                offset: pos,
                reason: "header line is not valid UTF-8".to_string(),
            })?
            .trim_end_matches('\r');
        match parse_header_line(line) {
            Ok((_, (name, value))) => header.set(name, classify_value(value)),
            Err(_) => {
                return Err(BblError::Format {
                    offset: pos,
                    reason: "header line is not of the form \"H name:value\"".to_string(),
                })
            }
        }
        pos = line_end + 1;
    }
    Ok((header, pos))
}

fn codec_from_tags(
    predictor: i64,
    encoding: i64,
    field: &str,
    offset: usize,
) -> Result<FieldCodec, BblError> {
    let predictor = Predictor::from_tag(predictor).ok_or_else(|| BblError::Format {
        offset,
        reason: format!(
            "unsupported predictor tag {} for field \"{}\"",
            predictor, field
        ),
    })?;
    let encoding = Encoding::from_tag(encoding).ok_or_else(|| BblError::Format {
        offset,
        reason: format!(
            "unsupported encoding tag {} for field \"{}\"",
            encoding, field
        ),
    })?;
    Ok(FieldCodec { predictor, encoding })
}

/// Builds the main (I/P) frame definition from the `Field I`/`Field P`
/// header entries.
fn main_frame_def(header: &RawHeader, offset: usize) -> Result<MainFrameDef, BblError> {
    let names: Vec<String> = header
        .str("Field I name")?
        .split(',')
        .map(|n| n.to_string())
        .collect();
    let signed = header.int_list("Field I signed")?;
    let intra_predictors = header.int_list("Field I predictor")?;
    let intra_encodings = header.int_list("Field I encoding")?;
    let inter_predictors = header.int_list("Field P predictor")?;
    let inter_encodings = header.int_list("Field P encoding")?;

    let count = names.len();
    for (list, what) in [
        (&signed, "signed"),
        (&intra_predictors, "I predictor"),
        (&intra_encodings, "I encoding"),
        (&inter_predictors, "P predictor"),
        (&inter_encodings, "P encoding"),
    ] {
        if list.len() != count {
            return Err(BblError::Format {
                offset,
                reason: format!(
                    "\"Field {}\" lists {} entries for {} field names",
                    what,
                    list.len(),
                    count
                ),
            });
        }
    }

    let mut fields = Vec::with_capacity(count);
    for i in 0..count {
        fields.push(MainFieldDef {
            name: names[i].clone(),
            signed: signed[i] != 0,
            intra: codec_from_tags(intra_predictors[i], intra_encodings[i], &names[i], offset)?,
            inter: codec_from_tags(inter_predictors[i], inter_encodings[i], &names[i], offset)?,
        });
    }
    let motor0_index = fields.iter().position(|f| f.name == "motor[0]");
    Ok(MainFrameDef {
        fields,
        motor0_index,
    })
}

/// Builds an auxiliary (S/G/H) frame definition if the header declares
/// one, keyed by its `Field <letter>` entries.
fn aux_frame_def(
    header: &RawHeader,
    letter: char,
    offset: usize,
) -> Result<Option<AuxFrameDef>, BblError> {
    let name_key = format!("Field {} name", letter);
    let Some(HeaderValue::Str(names)) = header.get(&name_key) else {
        return Ok(None);
    };
    let names: Vec<String> = names.split(',').map(|n| n.to_string()).collect();
    let predictors = header.int_list(&format!("Field {} predictor", letter))?;
    let encodings = header.int_list(&format!("Field {} encoding", letter))?;
    if predictors.len() != names.len() || encodings.len() != names.len() {
        return Err(BblError::Format {
            offset,
            reason: format!("\"Field {}\" definition lists have mismatched lengths", letter),
        });
    }

    let mut fields = Vec::with_capacity(names.len());
    for i in 0..names.len() {
        fields.push((
            names[i].clone(),
            codec_from_tags(predictors[i], encodings[i], &names[i], offset)?,
        ));
    }
    Ok(Some(AuxFrameDef { fields }))
}

/// Decodes the session occupying `data[start..end]`.
fn decode_session(data: &[u8], start: usize, end: usize) -> Result<LogSession, BblError> {
    let (header, data_start) = parse_header(data, start, end)?;

    let version = header.int("Data version")?;
    if version != 2 {
        return Err(BblError::Format {
            offset: start,
            reason: format!("unsupported data version {}", version),
        });
    }

    let main = main_frame_def(&header, start)?;
    let slow = aux_frame_def(&header, 'S', start)?;
    let gps = aux_frame_def(&header, 'G', start)?;
    let gps_home = aux_frame_def(&header, 'H', start)?;
    let constants = PredictorConstants {
        minthrottle: header.int_or("minthrottle", 0),
        vbatref: header.int_or("vbatref", 0),
        minmotor: match header.get("motorOutput") {
            Some(HeaderValue::IntList(range)) if !range.is_empty() => range[0],
            Some(HeaderValue::Int(low)) => *low,
            _ => 0,
        },
    };

    let mut decoder = FrameDecoder::new(
        &main,
        slow.as_ref(),
        gps.as_ref(),
        gps_home.as_ref(),
        constants,
    );
    let mut stream = ByteStream::new(&data[data_start..end], data_start);
    let mut frames = Vec::new();
    while let Some(frame_type) = stream.peek_u8() {
        stream.read_u8()?;
        match frame_type {
            b'I' => frames.push(decoder.decode_main(&mut stream, true)?),
            b'P' => frames.push(decoder.decode_main(&mut stream, false)?),
            b'S' => decoder.decode_slow(&mut stream)?,
            b'G' => decoder.decode_gps(&mut stream)?,
            b'H' => decoder.decode_gps_home(&mut stream)?,
            b'E' => {
                if decoder.decode_event(&mut stream)? {
                    break;
                }
            }
            other => {
                return Err(BblError::Format {
                    offset: stream.offset() - 1,
                    reason: format!("unknown frame type byte 0x{:02X}", other),
                })
            }
        }
    }

    Ok(LogSession {
        field_names: main.fields.iter().map(|f| f.name.clone()).collect(),
        header,
        frames,
    })
}
