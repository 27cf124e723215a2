//! Writer/reader agreement.
//!
//! A reader applied to a writer's output must give back the same values
//! in the same order, for any sequence of field writes.

use emberlink_protocol::{InboundPacket, PacketId, PacketReader, PacketWriter};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum Field {
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

fn field() -> impl Strategy<Value = Field> {
    prop_oneof![
        any::<u8>().prop_map(Field::U8),
        any::<i16>().prop_map(Field::I16),
        any::<i32>().prop_map(Field::I32),
        any::<i64>().prop_map(Field::I64),
        // NaN never compares equal; compare finite values only.
        any::<f64>()
            .prop_filter("finite", |v| v.is_finite())
            .prop_map(Field::F64),
        "\\PC{0,24}".prop_map(Field::Str),
    ]
}

fn write_field(w: &mut PacketWriter, f: &Field) {
    match f {
        Field::U8(v) => w.write_u8(*v),
        Field::I16(v) => w.write_i16(*v),
        Field::I32(v) => w.write_i32(*v),
        Field::I64(v) => w.write_i64(*v),
        Field::F64(v) => w.write_f64(*v),
        Field::Str(v) => w.write_string(v),
    };
}

fn read_like(r: &mut PacketReader<'_>, f: &Field) -> Field {
    match f {
        Field::U8(_) => Field::U8(r.read_u8().unwrap()),
        Field::I16(_) => Field::I16(r.read_i16().unwrap()),
        Field::I32(_) => Field::I32(r.read_i32().unwrap()),
        Field::I64(_) => Field::I64(r.read_i64().unwrap()),
        Field::F64(_) => Field::F64(r.read_f64().unwrap()),
        Field::Str(_) => Field::Str(r.read_string().unwrap()),
    }
}

proptest! {
    #[test]
    fn prop_reader_reproduces_writer_fields(
        fields in prop::collection::vec(field(), 0..40),
    ) {
        // Deliberately undersized so the writer has to grow.
        let mut w = PacketWriter::with_capacity(1);
        for f in &fields {
            write_field(&mut w, f);
        }
        let bytes = w.into_vec();

        let mut r = PacketReader::new(&bytes);
        for f in &fields {
            prop_assert_eq!(&read_like(&mut r, f), f);
        }
        prop_assert!(r.is_empty());
    }

    #[test]
    fn prop_truncated_input_never_panics(
        fields in prop::collection::vec(field(), 1..10),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut w = PacketWriter::new();
        for f in &fields {
            write_field(&mut w, f);
        }
        let bytes = w.into_vec();
        let truncated = &bytes[..cut.index(bytes.len())];

        let mut r = PacketReader::new(truncated);
        let mut failed = false;
        for f in &fields {
            let ok = match f {
                Field::U8(_) => r.read_u8().is_ok(),
                Field::I16(_) => r.read_i16().is_ok(),
                Field::I32(_) => r.read_i32().is_ok(),
                Field::I64(_) => r.read_i64().is_ok(),
                Field::F64(_) => r.read_f64().is_ok(),
                Field::Str(_) => r.read_string().is_ok(),
            };
            if !ok {
                failed = true;
                break;
            }
        }
        // Strictly fewer bytes than written: some read must fail.
        prop_assert!(failed);
    }

    #[test]
    fn prop_packet_id_round_trips(op in any::<u8>(), sub in any::<u16>()) {
        let id = if op == 0xFE { PacketId::Extended(sub) } else { PacketId::Primary(op) };
        let mut w = PacketWriter::new();
        w.write_packet_id(id).write_u32(0xDEAD_BEEF);
        let bytes = w.into_vec();

        let packet = InboundPacket::parse(&bytes).unwrap();
        prop_assert_eq!(packet.id, id);
        prop_assert_eq!(packet.reader().read_u32().unwrap(), 0xDEAD_BEEF);
    }
}

#[test]
fn test_concrete_string_encodings() {
    let mut w = PacketWriter::new();
    w.write_string("");
    assert_eq!(w.len(), 2);

    let mut w = PacketWriter::new();
    w.write_string("AB");
    assert_eq!(w.into_vec(), vec![0x41, 0x00, 0x42, 0x00, 0x00, 0x00]);
}
