//! Frame reconstruction for the blackbox format: per-field predictor and
//! encoding tables, decode state, and the main/slow/GPS/event frame
//! readers.
//!
//! Every session header declares, field by field, how that field is stored
//! (its wire encoding) and what reference value the stored number is a
//! delta against (its predictor). Reproducing both tables exactly is what
//! keeps decoded values from silently drifting: a single mis-applied
//! predictor corrupts every later frame of the session.

use crate::byte_stream::ByteStream;
use crate::error::BblError;

/// Wire encodings the on-board logger emits, by header tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Tag 0: zigzag-mapped variable-byte integer.
    SignedVb,
    /// Tag 1: plain variable-byte integer.
    UnsignedVb,
    /// Tag 3: negated, 14-bit sign-extended variable-byte integer.
    Neg14Bit,
    /// Tag 6: up to eight signed VBs behind a presence bitmap.
    Tag8_8Svb,
    /// Tag 7: three packed signed fields behind a width selector.
    Tag2_3S32,
    /// Tag 8: four nibble-packed signed fields behind a width selector.
    Tag8_4S16,
    /// Tag 9: nothing on the wire; the field is pure prediction.
    Null,
}

impl Encoding {
    /// Maps a header-declared encoding tag, `None` for tags we do not
    /// support (v1 encodings, Elias variants).
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Encoding::SignedVb),
            1 => Some(Encoding::UnsignedVb),
            3 => Some(Encoding::Neg14Bit),
            6 => Some(Encoding::Tag8_8Svb),
            7 => Some(Encoding::Tag2_3S32),
            8 => Some(Encoding::Tag8_4S16),
            9 => Some(Encoding::Null),
            _ => None,
        }
    }
}

/// Predictors the on-board logger emits, by header tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    /// Tag 0: the stored value is the field value.
    Zero,
    /// Tag 1: delta against the previous frame.
    Previous,
    /// Tag 2: linear extrapolation of the previous two frames.
    StraightLine,
    /// Tag 3: mean of the previous two frames.
    Average2,
    /// Tag 4: offset by the `minthrottle` header constant.
    MinThrottle,
    /// Tag 5: delta against `motor[0]` of the same frame.
    Motor0,
    /// Tag 6: previous frame's value plus one per loop iteration.
    Increment,
    /// Tag 7: delta against the last GPS home frame.
    HomeCoord,
    /// Tag 8: offset by the 1500 µs RC midpoint.
    Midrc1500,
    /// Tag 9: offset by the `vbatref` header constant.
    VbatRef,
    /// Tag 11: offset by the low end of the `motorOutput` header range.
    MinMotor,
}

impl Predictor {
    /// Maps a header-declared predictor tag, `None` for unknown tags.
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Predictor::Zero),
            1 => Some(Predictor::Previous),
            2 => Some(Predictor::StraightLine),
            3 => Some(Predictor::Average2),
            4 => Some(Predictor::MinThrottle),
            5 => Some(Predictor::Motor0),
            6 => Some(Predictor::Increment),
            7 => Some(Predictor::HomeCoord),
            8 => Some(Predictor::Midrc1500),
            9 => Some(Predictor::VbatRef),
            11 => Some(Predictor::MinMotor),
            _ => None,
        }
    }
}

/// How one field is stored within one frame type.
#[derive(Debug, Clone, Copy)]
pub struct FieldCodec {
    /// Reference value the stored number is a delta against.
    pub predictor: Predictor,
    /// Wire encoding of the stored number.
    pub encoding: Encoding,
}

/// One field of the main (I/P) frame stream.
#[derive(Debug, Clone)]
pub struct MainFieldDef {
    /// Field name as declared by the header, e.g. `gyroADC[0]`.
    pub name: String,
    /// Header-declared signedness flag. Informational; the encodings
    /// themselves carry the signedness that matters for decoding.
    pub signed: bool,
    /// Codec used in intra (I) frames.
    pub intra: FieldCodec,
    /// Codec used in inter (P) frames.
    pub inter: FieldCodec,
}

/// The main frame definition: shared field order for I and P frames.
#[derive(Debug, Clone)]
pub struct MainFrameDef {
    /// Fields in wire order.
    pub fields: Vec<MainFieldDef>,
    /// Index of `motor[0]`, needed by the [`Predictor::Motor0`] scheme.
    pub motor0_index: Option<usize>,
}

/// Field definition for the auxiliary frame types (S, G, H), which have a
/// single codec per field.
#[derive(Debug, Clone)]
pub struct AuxFrameDef {
    /// Field names and codecs in wire order.
    pub fields: Vec<(String, FieldCodec)>,
}

/// Header constants referenced by offset-style predictors.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictorConstants {
    /// `minthrottle` header value.
    pub minthrottle: i64,
    /// `vbatref` header value.
    pub vbatref: i64,
    /// Low end of the `motorOutput` header range.
    pub minmotor: i64,
}

/// Stateful decoder for one session's frame stream. Holds the two-frame
/// main history, the slow-frame history, and the last GPS home frame that
/// the history- and home-based predictors reference.
pub struct FrameDecoder<'d> {
    main: &'d MainFrameDef,
    slow: Option<&'d AuxFrameDef>,
    gps: Option<&'d AuxFrameDef>,
    gps_home: Option<&'d AuxFrameDef>,
    constants: PredictorConstants,
    previous: Option<Vec<i64>>,
    previous2: Option<Vec<i64>>,
    slow_previous: Option<Vec<i64>>,
    home: Vec<i64>,
}

impl<'d> FrameDecoder<'d> {
    /// Fresh decoder state for the start of a session.
    pub fn new(
        main: &'d MainFrameDef,
        slow: Option<&'d AuxFrameDef>,
        gps: Option<&'d AuxFrameDef>,
        gps_home: Option<&'d AuxFrameDef>,
        constants: PredictorConstants,
    ) -> Self {
        Self {
            main,
            slow,
            gps,
            gps_home,
            constants,
            previous: None,
            previous2: None,
            slow_previous: None,
            home: Vec::new(),
        }
    }

    /// Decodes one main frame. `intra` selects the I codec table (which
    /// never references frame history) over the P one.
    pub fn decode_main(
        &mut self,
        stream: &mut ByteStream,
        intra: bool,
    ) -> Result<Vec<i64>, BblError> {
        let codecs: Vec<FieldCodec> = self
            .main
            .fields
            .iter()
            .map(|f| if intra { f.intra } else { f.inter })
            .collect();
        let raw = read_raw_values(stream, &codecs)?;

        let mut frame = vec![0i64; raw.len()];
        let mut home_ordinal = 0;
        for i in 0..raw.len() {
            let motor0 = self.main.motor0_index.map(|m| frame[m]);
            frame[i] = self.apply_predictor(
                codecs[i].predictor,
                raw[i],
                i,
                motor0,
                (self.previous.as_deref(), self.previous2.as_deref()),
                &mut home_ordinal,
            )?;
        }

        if intra {
            // An intra frame resets the history: both slots point at it.
            self.previous = Some(frame.clone());
            self.previous2 = Some(frame.clone());
        } else {
            self.previous2 = self.previous.take();
            self.previous = Some(frame.clone());
        }
        Ok(frame)
    }

    /// Decodes a slow (S) frame. The values are kept only as predictor
    /// history; slow fields never reach the channel layer.
    pub fn decode_slow(&mut self, stream: &mut ByteStream) -> Result<(), BblError> {
        let def = self.slow.ok_or_else(|| BblError::Format {
            offset: stream.offset(),
            reason: "slow frame in a session with no slow field definitions".to_string(),
        })?;
        let frame = self.decode_aux(stream, def, self.slow_previous.clone())?;
        self.slow_previous = Some(frame);
        Ok(())
    }

    /// Decodes a GPS (G) frame, for stream sync only.
    pub fn decode_gps(&mut self, stream: &mut ByteStream) -> Result<(), BblError> {
        let def = self.gps.ok_or_else(|| BblError::Format {
            offset: stream.offset(),
            reason: "GPS frame in a session with no GPS field definitions".to_string(),
        })?;
        self.decode_aux(stream, def, None)?;
        Ok(())
    }

    /// Decodes a GPS home (H) frame and retains it for the
    /// [`Predictor::HomeCoord`] scheme.
    pub fn decode_gps_home(&mut self, stream: &mut ByteStream) -> Result<(), BblError> {
        let def = self.gps_home.ok_or_else(|| BblError::Format {
            offset: stream.offset(),
            reason: "GPS home frame in a session with no home field definitions".to_string(),
        })?;
        self.home = self.decode_aux(stream, def, None)?;
        Ok(())
    }

    fn decode_aux(
        &self,
        stream: &mut ByteStream,
        def: &AuxFrameDef,
        history: Option<Vec<i64>>,
    ) -> Result<Vec<i64>, BblError> {
        let codecs: Vec<FieldCodec> = def.fields.iter().map(|(_, c)| *c).collect();
        let raw = read_raw_values(stream, &codecs)?;

        let mut frame = vec![0i64; raw.len()];
        let mut home_ordinal = 0;
        for i in 0..raw.len() {
            frame[i] = self.apply_predictor(
                codecs[i].predictor,
                raw[i],
                i,
                None,
                (history.as_deref(), None),
                &mut home_ordinal,
            )?;
        }
        Ok(frame)
    }

    fn apply_predictor(
        &self,
        predictor: Predictor,
        value: i64,
        index: usize,
        motor0: Option<i64>,
        history: (Option<&[i64]>, Option<&[i64]>),
        home_ordinal: &mut usize,
    ) -> Result<i64, BblError> {
        let (previous, previous2) = history;
        Ok(match predictor {
            Predictor::Zero => value,
            Predictor::Previous => value + previous.map_or(0, |p| p[index]),
            Predictor::StraightLine => match (previous, previous2) {
                (Some(p), Some(p2)) => value + 2 * p[index] - p2[index],
                (Some(p), None) => value + p[index],
                _ => value,
            },
            // Integer mean, truncated toward zero like the reference
            // decoder's int32 division.
            Predictor::Average2 => match (previous, previous2) {
                (Some(p), Some(p2)) => value + (p[index] + p2[index]) / 2,
                (Some(p), None) => value + p[index],
                _ => value,
            },
            Predictor::MinThrottle => value + self.constants.minthrottle,
            Predictor::Motor0 => {
                value
                    + motor0.ok_or_else(|| {
                        BblError::Consistency(
                            "a field predicts against motor[0], which is not in the field list"
                                .to_string(),
                        )
                    })?
            }
            Predictor::Increment => value + 1 + previous.map_or(0, |p| p[index]),
            Predictor::HomeCoord => {
                let coord = self.home.get(*home_ordinal).copied().unwrap_or(0);
                *home_ordinal += 1;
                value + coord
            }
            Predictor::Midrc1500 => value + 1500,
            Predictor::VbatRef => value + self.constants.vbatref,
            Predictor::MinMotor => value + self.constants.minmotor,
        })
    }

    /// Decodes an event (E) frame, returning `true` when it was the
    /// end-of-log marker that terminates the session.
    pub fn decode_event(&mut self, stream: &mut ByteStream) -> Result<bool, BblError> {
        let event = stream.read_u8()?;
        match event {
            // Sync beep: beep time in µs.
            0 => {
                stream.read_unsigned_vb()?;
            }
            // Inflight adjustment: function byte, then a float for the
            // high-numbered functions and a signed VB otherwise.
            13 => {
                let function = stream.read_u8()?;
                if function > 127 {
                    stream.read_bytes(4)?;
                } else {
                    stream.read_signed_vb()?;
                }
            }
            // Logging resume: loop iteration and time.
            14 => {
                stream.read_unsigned_vb()?;
                stream.read_unsigned_vb()?;
            }
            // Disarm: reason code.
            15 => {
                stream.read_unsigned_vb()?;
            }
            // Flight mode change: new and previous flag words.
            30 => {
                stream.read_unsigned_vb()?;
                stream.read_unsigned_vb()?;
            }
            // End of log, trailed by a literal marker string.
            255 => {
                const TRAILER: &[u8] = b"End of log\x00";
                let offset = stream.offset();
                let take = TRAILER.len().min(stream.remaining());
                let bytes = stream.read_bytes(take)?;
                if bytes != &TRAILER[..take] {
                    return Err(BblError::Format {
                        offset,
                        reason: "end-of-log event without its marker string".to_string(),
                    });
                }
                return Ok(true);
            }
            other => {
                return Err(BblError::Format {
                    offset: stream.offset().saturating_sub(1),
                    reason: format!("unknown event type {}", other),
                })
            }
        }
        Ok(false)
    }
}

/// Reads one frame's worth of raw (pre-predictor) values, honoring the
/// group encodings that cover several consecutive fields at once.
fn read_raw_values(stream: &mut ByteStream, codecs: &[FieldCodec]) -> Result<Vec<i64>, BblError> {
    let count = codecs.len();
    let mut raw = vec![0i64; count];
    let mut i = 0;
    while i < count {
        match codecs[i].encoding {
            Encoding::SignedVb => {
                raw[i] = stream.read_signed_vb()? as i64;
                i += 1;
            }
            Encoding::UnsignedVb => {
                raw[i] = stream.read_unsigned_vb()? as i64;
                i += 1;
            }
            Encoding::Neg14Bit => {
                raw[i] = stream.read_neg_14bit()? as i64;
                i += 1;
            }
            Encoding::Null => {
                raw[i] = 0;
                i += 1;
            }
            Encoding::Tag8_8Svb => {
                let mut end = i + 1;
                while end < count && end < i + 8 && codecs[end].encoding == Encoding::Tag8_8Svb {
                    end += 1;
                }
                stream.read_tag8_8svb(end - i, &mut raw[i..end])?;
                i = end;
            }
            Encoding::Tag2_3S32 => {
                if i + 3 > count {
                    return Err(group_overrun(stream, "TAG2_3S32"));
                }
                let mut values = [0i64; 3];
                stream.read_tag2_3s32(&mut values)?;
                raw[i..i + 3].copy_from_slice(&values);
                i += 3;
            }
            Encoding::Tag8_4S16 => {
                if i + 4 > count {
                    return Err(group_overrun(stream, "TAG8_4S16"));
                }
                let mut values = [0i64; 4];
                stream.read_tag8_4s16(&mut values)?;
                raw[i..i + 4].copy_from_slice(&values);
                i += 4;
            }
        }
    }
    Ok(raw)
}

fn group_overrun(stream: &ByteStream, encoding: &str) -> BblError {
    BblError::Format {
        offset: stream.offset(),
        reason: format!("{} group overruns the declared field list", encoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(predictor: Predictor, encoding: Encoding) -> FieldCodec {
        FieldCodec { predictor, encoding }
    }

    fn main_field(name: &str, intra: FieldCodec, inter: FieldCodec) -> MainFieldDef {
        MainFieldDef {
            name: name.to_string(),
            signed: true,
            intra,
            inter,
        }
    }

    fn motor_frame_def() -> MainFrameDef {
        let fields = vec![
            main_field(
                "time",
                codec(Predictor::Zero, Encoding::UnsignedVb),
                codec(Predictor::StraightLine, Encoding::SignedVb),
            ),
            main_field(
                "gyroADC[0]",
                codec(Predictor::Zero, Encoding::SignedVb),
                codec(Predictor::Previous, Encoding::SignedVb),
            ),
            main_field(
                "motor[0]",
                codec(Predictor::MinThrottle, Encoding::UnsignedVb),
                codec(Predictor::Previous, Encoding::SignedVb),
            ),
            main_field(
                "motor[1]",
                codec(Predictor::Motor0, Encoding::SignedVb),
                codec(Predictor::Previous, Encoding::SignedVb),
            ),
        ];
        MainFrameDef {
            motor0_index: fields.iter().position(|f| f.name == "motor[0]"),
            fields,
        }
    }

    #[test]
    fn intra_frame_applies_constant_predictors() {
        let def = motor_frame_def();
        let constants = PredictorConstants {
            minthrottle: 1000,
            ..Default::default()
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, constants);

        // time=1000, gyro=-5, motor[0]=minthrottle+50, motor[1]=motor[0]+50
        let bytes = [0xE8, 0x07, 0x09, 0x32, 0x64];
        let mut stream = ByteStream::new(&bytes, 0);
        let frame = decoder.decode_main(&mut stream, true).unwrap();
        assert_eq!(frame, vec![1000, -5, 1050, 1100]);
        assert!(stream.is_empty());
    }

    #[test]
    fn inter_frame_applies_history_predictors() {
        let def = motor_frame_def();
        let constants = PredictorConstants {
            minthrottle: 1000,
            ..Default::default()
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, constants);

        let intra = [0xE8, 0x07, 0x09, 0x32, 0x64];
        let mut stream = ByteStream::new(&intra, 0);
        decoder.decode_main(&mut stream, true).unwrap();

        // Deltas: time +8 over the straight line, gyro +2, motors +10/-20.
        let inter = [0x10, 0x04, 0x14, 0x27];
        let mut stream = ByteStream::new(&inter, 0);
        let frame = decoder.decode_main(&mut stream, false).unwrap();
        assert_eq!(frame, vec![1008, -3, 1060, 1080]);
    }

    #[test]
    fn average_predictor_truncates_toward_zero() {
        let fields = vec![main_field(
            "axisD[0]",
            codec(Predictor::Zero, Encoding::SignedVb),
            codec(Predictor::Average2, Encoding::SignedVb),
        )];
        let def = MainFrameDef {
            fields,
            motor0_index: None,
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, PredictorConstants::default());

        let mut stream = ByteStream::new(&[0x07], 0);
        assert_eq!(decoder.decode_main(&mut stream, true).unwrap(), vec![-4]);
        let mut stream = ByteStream::new(&[0x01], 0);
        assert_eq!(decoder.decode_main(&mut stream, false).unwrap(), vec![-5]);
        // (-5 + -4) / 2 is -4 with truncating division, -5 with flooring.
        let mut stream = ByteStream::new(&[0x00], 0);
        assert_eq!(decoder.decode_main(&mut stream, false).unwrap(), vec![-4]);
    }

    #[test]
    fn bitmap_group_decodes_inside_a_frame() {
        let fields = (0..3)
            .map(|i| {
                main_field(
                    &format!("debug[{}]", i),
                    codec(Predictor::Zero, Encoding::Tag8_8Svb),
                    codec(Predictor::Zero, Encoding::Tag8_8Svb),
                )
            })
            .collect();
        let def = MainFrameDef {
            fields,
            motor0_index: None,
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, PredictorConstants::default());

        let mut stream = ByteStream::new(&[0x05, 0x0A, 0x05], 0);
        assert_eq!(
            decoder.decode_main(&mut stream, true).unwrap(),
            vec![5, 0, -3]
        );
    }

    #[test]
    fn end_of_log_event_terminates() {
        let def = MainFrameDef {
            fields: Vec::new(),
            motor0_index: None,
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, PredictorConstants::default());

        let mut bytes = vec![0xFF];
        bytes.extend_from_slice(b"End of log\x00");
        let mut stream = ByteStream::new(&bytes, 0);
        assert!(decoder.decode_event(&mut stream).unwrap());
    }

    #[test]
    fn unknown_event_is_a_format_error() {
        let def = MainFrameDef {
            fields: Vec::new(),
            motor0_index: None,
        };
        let mut decoder = FrameDecoder::new(&def, None, None, None, PredictorConstants::default());

        let mut stream = ByteStream::new(&[0x7B], 0);
        assert!(matches!(
            decoder.decode_event(&mut stream),
            Err(BblError::Format { .. })
        ));
    }
}
