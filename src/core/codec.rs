//! # Packet Codec
//!
//! Schema-driven encoding and decoding of single datagram frames.
//!
//! ```text
//! [Opcode(1)] [Payload(N)]
//! ```
//!
//! The payload is serialized field by field in schema order, then passed
//! through the payload transform selected by the registered envelope. The
//! codec owns the connection's send and receive transforms, so every frame
//! encoded or decoded advances them by exactly the payload length.
//!
//! Also implements `tokio_util`'s [`Decoder`]/[`Encoder`] with one frame per
//! buffer, for use with datagram framing adapters.

use crate::core::packet::Packet;
use crate::core::registry::{Direction, Envelope, Registry};
use crate::core::schema::{Count, FieldType, LenPrefix, Record, Schema, Value};
use crate::core::transform::{ConnectShuffle, Identity, PayloadTransform};
use crate::error::{constants, ProtocolError, Result};
use crate::session::{
    Delta, EntityFields, EntityId, EntityKind, FIELD_COLOR, FIELD_FLAGS, FIELD_KIND, FIELD_NAME,
    FIELD_OWNER, FIELD_POSITION, FIELD_SIZE,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{instrument, trace};

const DELTA_ADD: u8 = 0;
const DELTA_UPDATE: u8 = 1;
const DELTA_REMOVE: u8 = 2;
const DELTA_KNOWN_FIELDS: u8 = FIELD_KIND
    | FIELD_POSITION
    | FIELD_SIZE
    | FIELD_COLOR
    | FIELD_OWNER
    | FIELD_FLAGS
    | FIELD_NAME;

/// Bounds-checked big-endian cursor over a payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ProtocolError::malformed(format!(
                "need {len} bytes at offset {}, {} remaining",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Unsigned big-endian integer of `width` bytes (1..=8).
    pub fn uint(&mut self, width: usize) -> Result<u64> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(self.uint(4)? as u32)
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn prefix(&mut self, prefix: LenPrefix) -> Result<usize> {
        match prefix {
            LenPrefix::U8 => Ok(usize::from(self.u8()?)),
            LenPrefix::U16 => Ok(self.uint(2)? as usize),
        }
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.prefix(LenPrefix::U16)?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::malformed(constants::ERR_BAD_UTF8))
    }
}

/// Big-endian writer that checks values against their declared widths.
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn uint(&mut self, value: u64, width: usize) {
        let bytes = value.to_be_bytes();
        self.buf.put_slice(&bytes[8 - width..]);
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    pub fn prefix(&mut self, prefix: LenPrefix, len: usize, field: &str) -> Result<()> {
        if len > prefix.max() {
            return Err(ProtocolError::InvalidField(format!(
                "'{field}' length {len} exceeds {}",
                prefix.max()
            )));
        }
        match prefix {
            LenPrefix::U8 => self.u8(len as u8),
            LenPrefix::U16 => self.uint(len as u64, 2),
        }
        Ok(())
    }

    pub fn string(&mut self, value: &str, field: &str) -> Result<()> {
        self.prefix(LenPrefix::U16, value.len(), field)?;
        self.bytes(value.as_bytes());
        Ok(())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

fn int_width(ty: &FieldType) -> Option<usize> {
    match ty {
        FieldType::I8 | FieldType::U8 => Some(1),
        FieldType::I16 | FieldType::U16 => Some(2),
        FieldType::U24 => Some(3),
        FieldType::I32 | FieldType::U32 => Some(4),
        FieldType::I64 => Some(8),
        _ => None,
    }
}

fn is_signed(ty: &FieldType) -> bool {
    matches!(
        ty,
        FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64
    )
}

fn compressed_scale(width: u8) -> f64 {
    ((1u64 << (8 * u32::from(width))) - 1) as f64
}

/// Decode one record following `schema`. Optional trailing fields stop at the
/// end of the buffer; bytes past the last known field are left unread.
pub fn read_record(schema: &Schema, reader: &mut Reader<'_>) -> Result<Record> {
    let mut record = Record::new();

    for field in schema.fields() {
        if field.optional && reader.remaining() == 0 {
            break;
        }
        let value = read_value(&field.ty, field.name, reader, &record)?;
        record.push(field.name, value);
    }

    Ok(record)
}

fn read_value(ty: &FieldType, name: &str, reader: &mut Reader<'_>, record: &Record) -> Result<Value> {
    if let Some(width) = int_width(ty) {
        let raw = reader.uint(width)?;
        let value = if is_signed(ty) {
            let shift = 64 - 8 * width as u32;
            ((raw << shift) as i64) >> shift
        } else {
            raw as i64
        };
        return Ok(Value::Int(value));
    }

    match ty {
        FieldType::F32 => Ok(Value::Float(f64::from(reader.f32()?))),
        FieldType::Bool => Ok(Value::Bool(reader.u8()? != 0)),
        FieldType::Str => Ok(Value::Str(reader.string()?)),
        FieldType::Bytes(prefix) => {
            let len = reader.prefix(*prefix)?;
            Ok(Value::Bytes(reader.take(len)?.to_vec()))
        }
        FieldType::Fixed(len) => Ok(Value::Bytes(reader.take(*len)?.to_vec())),
        FieldType::Compressed { width, max } => {
            let raw = reader.uint(usize::from(*width))?;
            Ok(Value::Float(raw as f64 / compressed_scale(*width) * f64::from(*max)))
        }
        FieldType::List { count, item } => {
            let count = match count {
                Count::Prefix(prefix) => reader.prefix(*prefix)?,
                Count::Field(source) => usize::try_from(record.int(source)?).map_err(|_| {
                    ProtocolError::malformed(format!("negative count '{source}' for '{name}'"))
                })?,
            };
            let mut items = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                items.push(read_record(item, reader)?);
            }
            Ok(Value::List(items))
        }
        FieldType::Delta => Ok(Value::Delta(read_delta(reader)?)),
        _ => Err(ProtocolError::malformed(format!("unsupported field type for '{name}'"))),
    }
}

/// Encode `record` following `schema`. Missing optional fields end the
/// payload; a required field may not be missing.
pub fn write_record(schema: &Schema, record: &Record, writer: &mut Writer) -> Result<()> {
    let mut truncated_at: Option<&str> = None;

    for field in schema.fields() {
        match record.get(field.name) {
            Some(_) if truncated_at.is_some() => {
                return Err(ProtocolError::InvalidField(format!(
                    "{}: '{}' present after missing optional '{}'",
                    schema.name(),
                    field.name,
                    truncated_at.unwrap_or_default()
                )));
            }
            Some(value) => write_value(&field.ty, field.name, value, writer, record)?,
            None if field.optional => truncated_at = Some(field.name),
            None => {
                return Err(ProtocolError::InvalidField(format!(
                    "{}: missing required field '{}'",
                    schema.name(),
                    field.name
                )));
            }
        }
    }

    Ok(())
}

fn type_error(name: &str, expected: &str) -> ProtocolError {
    ProtocolError::InvalidField(format!("'{name}' expects a {expected} value"))
}

fn write_value(
    ty: &FieldType,
    name: &str,
    value: &Value,
    writer: &mut Writer,
    record: &Record,
) -> Result<()> {
    if let (Some(width), Some((min, max))) = (int_width(ty), ty.int_range()) {
        let Value::Int(v) = value else {
            return Err(type_error(name, "integer"));
        };
        if *v < min || *v > max {
            return Err(ProtocolError::InvalidField(format!(
                "'{name}' value {v} outside {min}..={max}"
            )));
        }
        writer.uint(*v as u64, width);
        return Ok(());
    }

    match (ty, value) {
        (FieldType::F32, Value::Float(v)) => writer.f32(*v as f32),
        (FieldType::Bool, Value::Bool(v)) => writer.u8(u8::from(*v)),
        (FieldType::Str, Value::Str(v)) => writer.string(v, name)?,
        (FieldType::Bytes(prefix), Value::Bytes(v)) => {
            writer.prefix(*prefix, v.len(), name)?;
            writer.bytes(v);
        }
        (FieldType::Fixed(len), Value::Bytes(v)) => {
            if v.len() != *len {
                return Err(ProtocolError::InvalidField(format!(
                    "'{name}' must be exactly {len} bytes, got {}",
                    v.len()
                )));
            }
            writer.bytes(v);
        }
        (FieldType::Compressed { width, max }, Value::Float(v)) => {
            let max = f64::from(*max);
            let scale = compressed_scale(*width);
            // Truncates toward zero, matching the game's encoder bit for bit.
            let raw = (v.clamp(0.0, max) * scale / max).floor().clamp(0.0, scale);
            writer.uint(raw as u64, usize::from(*width));
        }
        (FieldType::List { count, item }, Value::List(items)) => {
            match count {
                Count::Prefix(prefix) => writer.prefix(*prefix, items.len(), name)?,
                Count::Field(source) => {
                    let declared = record.int(source).map_err(|_| {
                        ProtocolError::InvalidField(format!("count field '{source}' missing"))
                    })?;
                    if usize::try_from(declared).ok() != Some(items.len()) {
                        return Err(ProtocolError::InvalidField(format!(
                            "'{source}' is {declared} but '{name}' has {} items",
                            items.len()
                        )));
                    }
                }
            }
            for entry in items {
                write_record(item, entry, writer)?;
            }
        }
        (FieldType::Delta, Value::Delta(delta)) => write_delta(delta, writer)?,
        (FieldType::F32 | FieldType::Compressed { .. }, _) => return Err(type_error(name, "float")),
        (FieldType::Bool, _) => return Err(type_error(name, "bool")),
        (FieldType::Str, _) => return Err(type_error(name, "string")),
        (FieldType::Bytes(_) | FieldType::Fixed(_), _) => return Err(type_error(name, "bytes")),
        (FieldType::List { .. }, _) => return Err(type_error(name, "list")),
        (FieldType::Delta, _) => return Err(type_error(name, "delta")),
        _ => return Err(type_error(name, "integer")),
    }

    Ok(())
}

/// `[action u8][id u32]`, then for add/update `[mask u8]` and the present
/// attributes in mask-bit order.
pub fn read_delta(reader: &mut Reader<'_>) -> Result<Delta> {
    let action = reader.u8()?;
    let id = EntityId(reader.u32()?);

    if action == DELTA_REMOVE {
        return Ok(Delta::Remove { id });
    }
    if action != DELTA_ADD && action != DELTA_UPDATE {
        return Err(ProtocolError::malformed(format!(
            "{} ({action})",
            constants::ERR_BAD_DELTA_ACTION
        )));
    }

    let mask = reader.u8()?;
    if mask & !DELTA_KNOWN_FIELDS != 0 {
        return Err(ProtocolError::malformed(format!(
            "delta for entity {} has unknown field bits {mask:#04x}",
            id.0
        )));
    }

    let mut fields = EntityFields::default();
    if mask & FIELD_KIND != 0 {
        fields.kind = Some(EntityKind::from_u8(reader.u8()?));
    }
    if mask & FIELD_POSITION != 0 {
        fields.position = Some((reader.f32()?, reader.f32()?));
    }
    if mask & FIELD_SIZE != 0 {
        fields.size = Some(reader.f32()?);
    }
    if mask & FIELD_COLOR != 0 {
        fields.color = Some(reader.u32()?);
    }
    if mask & FIELD_OWNER != 0 {
        fields.owner = Some(reader.u32()?);
    }
    if mask & FIELD_FLAGS != 0 {
        fields.flags = Some(reader.u8()?);
    }
    if mask & FIELD_NAME != 0 {
        fields.name = Some(reader.string()?);
    }

    Ok(if action == DELTA_ADD {
        Delta::Add { id, fields }
    } else {
        Delta::Update { id, fields }
    })
}

pub fn write_delta(delta: &Delta, writer: &mut Writer) -> Result<()> {
    let (action, fields) = match delta {
        Delta::Add { fields, .. } => (DELTA_ADD, fields),
        Delta::Update { fields, .. } => (DELTA_UPDATE, fields),
        Delta::Remove { id } => {
            writer.u8(DELTA_REMOVE);
            writer.u32(id.0);
            return Ok(());
        }
    };

    writer.u8(action);
    writer.u32(delta.id().0);
    writer.u8(fields.mask());

    if let Some(kind) = fields.kind {
        writer.u8(kind.to_u8());
    }
    if let Some((x, y)) = fields.position {
        writer.f32(x);
        writer.f32(y);
    }
    if let Some(size) = fields.size {
        writer.f32(size);
    }
    if let Some(color) = fields.color {
        writer.u32(color);
    }
    if let Some(owner) = fields.owner {
        writer.u32(owner);
    }
    if let Some(flags) = fields.flags {
        writer.u8(flags);
    }
    if let Some(name) = &fields.name {
        writer.string(name, "name")?;
    }
    Ok(())
}

/// Frame codec for one side of a connection.
///
/// `inbound` is the direction of frames this codec decodes; encoding always
/// uses the opposite direction.
#[derive(Debug)]
pub struct PacketCodec {
    registry: Arc<Registry>,
    inbound: Direction,
    send: Box<dyn PayloadTransform>,
    recv: Box<dyn PayloadTransform>,
}

impl PacketCodec {
    pub fn new(registry: Arc<Registry>, inbound: Direction) -> Self {
        Self {
            registry,
            inbound,
            send: Box::new(Identity),
            recv: Box::new(Identity),
        }
    }

    /// Codec for the client side: decodes server-to-client frames.
    pub fn client(registry: Arc<Registry>) -> Self {
        Self::new(registry, Direction::ServerToClient)
    }

    /// Codec for a peer playing the server (tests, relays).
    pub fn server(registry: Arc<Registry>) -> Self {
        Self::new(registry, Direction::ClientToServer)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn inbound(&self) -> Direction {
        self.inbound
    }

    /// Install the session transforms, replacing whatever was in use.
    pub fn set_transforms(&mut self, send: Box<dyn PayloadTransform>, recv: Box<dyn PayloadTransform>) {
        trace!(send = send.name(), recv = recv.name(), "Installing session transforms");
        self.send = send;
        self.recv = recv;
    }

    /// Back to untransformed frames, as before a handshake.
    pub fn reset_transforms(&mut self) {
        self.set_transforms(Box::new(Identity), Box::new(Identity));
    }

    /// Serialize a packet into one frame.
    #[instrument(level = "trace", skip_all, fields(packet = packet.name()))]
    pub fn encode_packet(&mut self, packet: &Packet) -> Result<Bytes> {
        let direction = self.inbound.opposite();
        if let Some(fixed) = packet.direction() {
            if fixed != direction {
                return Err(ProtocolError::InvalidField(format!(
                    "{} is a {fixed} packet, codec encodes {direction}",
                    packet.name()
                )));
            }
        }

        let spec = self.registry.require(packet.opcode(), direction)?;
        let record = packet.to_record();

        let mut writer = Writer::with_capacity(64);
        writer.u8(spec.opcode);
        write_record(&spec.schema, &record, &mut writer)?;

        let mut frame = writer.into_inner();
        let payload = &mut frame[1..];
        match spec.envelope {
            Envelope::Session => self.send.apply(payload),
            Envelope::Clear => {}
            Envelope::ConnectShuffle => ConnectShuffle.apply(payload),
        }

        Ok(frame.freeze())
    }

    /// Parse one frame.
    ///
    /// An unregistered opcode yields `UnknownOpcode`; the receive transform is
    /// still advanced over the payload so later frames stay decodable.
    #[instrument(level = "trace", skip_all, fields(len = frame.len()))]
    pub fn decode_frame(&mut self, frame: &[u8]) -> Result<Packet> {
        let (&opcode, payload) = frame
            .split_first()
            .ok_or_else(|| ProtocolError::malformed(constants::ERR_EMPTY_FRAME))?;

        let Some(spec) = self.registry.lookup(opcode, self.inbound) else {
            self.recv.skip(payload.len());
            return Err(ProtocolError::UnknownOpcode {
                opcode,
                direction: self.inbound,
            });
        };

        let mut payload = payload.to_vec();
        match spec.envelope {
            Envelope::Session => self.recv.reverse(&mut payload),
            Envelope::Clear => {}
            Envelope::ConnectShuffle => ConnectShuffle.reverse(&mut payload),
        }

        let mut reader = Reader::new(&payload);
        let record = read_record(&spec.schema, &mut reader)?;
        if reader.remaining() > 0 {
            trace!(
                opcode,
                ignored = reader.remaining(),
                "Ignoring trailing bytes past known fields"
            );
        }

        Packet::from_record(opcode, self.inbound, record)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        let frame = src.split();
        self.decode_frame(&frame).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let frame = self.encode_packet(&item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::packet::{KeepAliveAck, WorldUpdate};
    use crate::core::transform::XorKeystream;

    fn sample_schema() -> Schema {
        Schema::new("Sample")
            .field("id", FieldType::I32)
            .field("name", FieldType::Str)
            .field(
                "angle",
                FieldType::Compressed {
                    width: 2,
                    max: 360.0,
                },
            )
            .field("count", FieldType::U8)
            .field(
                "items",
                FieldType::List {
                    count: Count::Field("count"),
                    item: Schema::new("Item").field("v", FieldType::U24),
                },
            )
            .optional("extra", FieldType::I64)
    }

    fn sample_record() -> Record {
        Record::new()
            .with("id", Value::Int(-5))
            .with("name", Value::Str("héllo".into()))
            .with("angle", Value::Float(180.0))
            .with("count", Value::Int(2))
            .with(
                "items",
                Value::List(vec![
                    Record::new().with("v", Value::Int(1)),
                    Record::new().with("v", Value::Int(0xFF_FFFF)),
                ]),
            )
    }

    #[test]
    fn test_record_round_trip_and_optional_tail() {
        let schema = sample_schema();
        let record = sample_record();

        let mut writer = Writer::new();
        write_record(&schema, &record, &mut writer).unwrap();
        let bytes = writer.into_inner();

        let decoded = read_record(&schema, &mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded.int("id").unwrap(), -5);
        assert_eq!(decoded.string("name").unwrap(), "héllo");
        assert!((decoded.float("angle").unwrap() - 180.0).abs() < 0.01);
        assert_eq!(decoded.list("items").unwrap().len(), 2);
        assert!(decoded.get("extra").is_none());

        let with_extra = record.with("extra", Value::Int(i64::MIN));
        let mut writer = Writer::new();
        write_record(&schema, &with_extra, &mut writer).unwrap();
        let decoded = read_record(&schema, &mut Reader::new(&writer.into_inner())).unwrap();
        assert_eq!(decoded.int("extra").unwrap(), i64::MIN);
    }

    #[test]
    fn test_compressed_float_truncates() {
        let schema = Schema::new("C")
            .field("ratio", FieldType::Compressed { width: 2, max: 1.0 })
            .field("angle", FieldType::Compressed { width: 2, max: 360.0 })
            .field("full", FieldType::Compressed { width: 1, max: 10.0 });
        let record = Record::new()
            .with("ratio", Value::Float(0.7))
            .with("angle", Value::Float(180.0))
            .with("full", Value::Float(10.0));

        let mut writer = Writer::new();
        write_record(&schema, &record, &mut writer).unwrap();
        // 0.7 * 65535 = 45874.5 and 180 / 360 * 65535 = 32767.5 both truncate.
        assert_eq!(&writer.into_inner()[..], &[0xB3, 0x32, 0x7F, 0xFF, 0xFF]);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let schema = Schema::new("Tail").field("a", FieldType::U16);
        let bytes = [0x01, 0x02, 0xAA, 0xBB, 0xCC];
        let mut reader = Reader::new(&bytes);
        let record = read_record(&schema, &mut reader).unwrap();
        assert_eq!(record.int("a").unwrap(), 0x0102);
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn test_string_length_beyond_buffer_is_malformed() {
        let schema = Schema::new("S").field("s", FieldType::Str);
        let bytes = [0x00, 0x28, b'a', b'b', b'c'];
        let err = read_record(&schema, &mut Reader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let schema = Schema::new("S").field("s", FieldType::Str);
        let bytes = [0x00, 0x02, 0xC3, 0x28];
        let err = read_record(&schema, &mut Reader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(ref m) if m == constants::ERR_BAD_UTF8));
    }

    #[test]
    fn test_partial_optional_is_malformed() {
        let schema = Schema::new("O")
            .field("a", FieldType::U8)
            .optional("b", FieldType::I32);
        let err = read_record(&schema, &mut Reader::new(&[1, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }

    #[test]
    fn test_write_checks_ranges_and_counts() {
        let schema = Schema::new("R").field("a", FieldType::U8);
        let record = Record::new().with("a", Value::Int(256));
        assert!(matches!(
            write_record(&schema, &record, &mut Writer::new()),
            Err(ProtocolError::InvalidField(_))
        ));

        let wrong = Record::new()
            .with("id", Value::Int(1))
            .with("name", Value::Str(String::new()))
            .with("angle", Value::Float(0.0))
            .with("count", Value::Int(3))
            .with("items", Value::List(vec![Record::new().with("v", Value::Int(1))]));
        assert!(matches!(
            write_record(&sample_schema(), &wrong, &mut Writer::new()),
            Err(ProtocolError::InvalidField(_))
        ));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let schema = Schema::new("R").field("a", FieldType::U8);
        assert!(matches!(
            write_record(&schema, &Record::new(), &mut Writer::new()),
            Err(ProtocolError::InvalidField(_))
        ));
    }

    #[test]
    fn test_signed_values_sign_extend() {
        let schema = Schema::new("I")
            .field("a", FieldType::I8)
            .field("b", FieldType::I16)
            .field("c", FieldType::I32);
        let bytes = [0xFF, 0x80, 0x00, 0xFF, 0xFF, 0xFF, 0xFE];
        let record = read_record(&schema, &mut Reader::new(&bytes)).unwrap();
        assert_eq!(record.int("a").unwrap(), -1);
        assert_eq!(record.int("b").unwrap(), -32768);
        assert_eq!(record.int("c").unwrap(), -2);
    }

    #[test]
    fn test_delta_wire_format() {
        let delta = Delta::Update {
            id: EntityId(5),
            fields: EntityFields::position(15.0, 20.0),
        };
        let mut writer = Writer::new();
        write_delta(&delta, &mut writer).unwrap();
        let bytes = writer.into_inner();

        let mut expected = vec![DELTA_UPDATE, 0, 0, 0, 5, FIELD_POSITION];
        expected.extend_from_slice(&15.0f32.to_be_bytes());
        expected.extend_from_slice(&20.0f32.to_be_bytes());
        assert_eq!(&bytes[..], &expected[..]);

        assert_eq!(read_delta(&mut Reader::new(&bytes)).unwrap(), delta);

        let err = read_delta(&mut Reader::new(&[9, 0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
        let err = read_delta(&mut Reader::new(&[0, 0, 0, 0, 1, 0x80])).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }

    #[test]
    fn test_session_transform_lockstep() {
        let registry = Arc::new(Registry::standard().unwrap());
        let mut server = PacketCodec::server(registry.clone());
        let mut client = PacketCodec::client(registry);
        server.set_transforms(Box::new(XorKeystream::new(77)), Box::new(XorKeystream::new(77)));
        client.set_transforms(Box::new(XorKeystream::new(77)), Box::new(XorKeystream::new(77)));

        let update = Packet::WorldUpdate(WorldUpdate {
            tick: 3,
            deltas: vec![Delta::Remove { id: EntityId(7) }],
        });
        for _ in 0..3 {
            let frame = server.encode_packet(&update).unwrap();
            assert_eq!(client.decode_frame(&frame).unwrap(), update);
        }

        // A frame with an unregistered opcode in between must not
        // desynchronize the keystream.
        let mut payload = vec![1u8, 2, 3];
        server.send.apply(&mut payload);
        let mut unknown = vec![200u8];
        unknown.extend_from_slice(&payload);
        assert!(matches!(
            client.decode_frame(&unknown),
            Err(ProtocolError::UnknownOpcode { opcode: 200, .. })
        ));

        let frame = server.encode_packet(&update).unwrap();
        assert_eq!(client.decode_frame(&frame).unwrap(), update);
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let mut client = PacketCodec::client(Arc::new(Registry::standard().unwrap()));
        let ack = Packet::KeepAliveAck(KeepAliveAck { sequence: None });
        assert!(matches!(
            client.encode_packet(&ack),
            Err(ProtocolError::InvalidField(_))
        ));
    }

    #[test]
    fn test_tokio_codec_one_frame_per_buffer() {
        let registry = Arc::new(Registry::standard().unwrap());
        let mut server = PacketCodec::server(registry.clone());
        let mut client = PacketCodec::client(registry);

        let mut buf = BytesMut::new();
        let ack = Packet::KeepAliveAck(KeepAliveAck { sequence: Some(4) });
        Encoder::encode(&mut server, ack.clone(), &mut buf).unwrap();

        assert_eq!(Decoder::decode(&mut client, &mut buf).unwrap(), Some(ack));
        assert!(buf.is_empty());
        assert_eq!(Decoder::decode(&mut client, &mut buf).unwrap(), None);
    }

    #[test]
    fn test_empty_frame_is_malformed() {
        let mut client = PacketCodec::client(Arc::new(Registry::standard().unwrap()));
        assert!(matches!(
            client.decode_frame(&[]),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }
}
