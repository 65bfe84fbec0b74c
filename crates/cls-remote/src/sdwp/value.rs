use crate::error::{RemoteError, Result};
use crate::sdwp::packet::{PacketReader, PacketWriter};
use crate::transport::{ObjectId, RemoteValue, TypeId};

// Element type tags
const VOID: u8 = 0x01;
const BOOLEAN: u8 = 0x02;
const CHAR: u8 = 0x03;
const I1: u8 = 0x04;
const I4: u8 = 0x08;
const U4: u8 = 0x09;
const I8: u8 = 0x0a;
const U8: u8 = 0x0b;
const R4: u8 = 0x0c;
const R8: u8 = 0x0d;
const STRING: u8 = 0x0e;
const VALUETYPE: u8 = 0x11;
const CLASS: u8 = 0x12;
const ARRAY: u8 = 0x14;
const GENERICINST: u8 = 0x15;
const OBJECT: u8 = 0x1c;
const SZARRAY: u8 = 0x1d;
const ID_NULL: u8 = 0xf0;
const ID_TYPE: u8 = 0xf1;

/// A value as it arrives on the wire; strings are still references
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum WireValue {
    Plain(RemoteValue),
    StringRef(ObjectId),
    Struct {
        type_id: TypeId,
        is_enum: bool,
        fields: Vec<WireValue>,
    },
}

pub(crate) fn decode_value(reader: &mut PacketReader<'_>) -> Result<WireValue> {
    let tag = reader.u8()?;
    let value = match tag {
        VOID | ID_NULL => RemoteValue::Null,
        BOOLEAN => RemoteValue::Bool(reader.i32()? != 0),
        CHAR => RemoteValue::Char(reader.i32()? as u16),
        I1..=U4 => RemoteValue::I32(reader.i32()?),
        I8 | U8 => RemoteValue::I64(reader.i64()?),
        R4 => RemoteValue::F32(f32::from_bits(reader.i32()? as u32)),
        R8 => RemoteValue::F64(f64::from_bits(reader.i64()? as u64)),
        STRING => return Ok(WireValue::StringRef(ObjectId(reader.id()?))),
        CLASS | ARRAY | GENERICINST | OBJECT | SZARRAY => RemoteValue::Object(ObjectId(reader.id()?)),
        ID_TYPE => RemoteValue::Type(TypeId(reader.id()?)),
        VALUETYPE => {
            let is_enum = reader.u8()? != 0;
            let type_id = TypeId(reader.id()?);
            let count = reader.count()?;
            let fields = (0..count)
                .map(|_| decode_value(reader))
                .collect::<Result<Vec<_>>>()?;
            return Ok(WireValue::Struct {
                type_id,
                is_enum,
                fields,
            });
        }
        other => {
            return Err(RemoteError::call_failed(format!(
                "unsupported value tag 0x{other:02x}"
            )));
        }
    };
    Ok(WireValue::Plain(value))
}

/// Encode an invocation argument
pub(crate) fn encode_value(writer: PacketWriter, value: &RemoteValue) -> Result<PacketWriter> {
    Ok(match value {
        RemoteValue::Null => writer.u8(ID_NULL),
        RemoteValue::Bool(v) => writer.u8(BOOLEAN).i32(i32::from(*v)),
        RemoteValue::Char(v) => writer.u8(CHAR).i32(i32::from(*v)),
        RemoteValue::I32(v) => writer.u8(I4).i32(*v),
        RemoteValue::I64(v) => writer.u8(I8).i64(*v),
        RemoteValue::F32(v) => writer.u8(R4).i32(v.to_bits() as i32),
        RemoteValue::F64(v) => writer.u8(R8).i64(v.to_bits() as i64),
        RemoteValue::Object(id) => writer.u8(OBJECT).id(id.0),
        RemoteValue::Type(id) => writer.u8(ID_TYPE).id(id.0),
        RemoteValue::Struct {
            type_id,
            is_enum,
            fields,
        } => {
            let mut writer = writer
                .u8(VALUETYPE)
                .u8(u8::from(*is_enum))
                .id(type_id.0)
                .i32(fields.len() as i32);
            for field in fields {
                writer = encode_value(writer, field)?;
            }
            writer
        }
        RemoteValue::Str(_) => {
            return Err(RemoteError::call_failed(
                "string arguments must be created in the target first",
            ));
        }
    })
}
