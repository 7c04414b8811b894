use proptest::prelude::*;
use tern_core::symbol::index_of;
use tern_core::{intern, Instruction, Op, Value};
use tern_vm::{compile, deserialize, read_from, serialize, write_to, Vm};

fn instruction() -> impl Strategy<Value = Instruction> {
    (1u8..=51, any::<u64>(), any::<u64>(), "[a-z]{1,8}").prop_map(|(byte, a, b, name)| {
        let op = Op::from_u8(byte).unwrap();
        let a = if op.names_text() {
            index_of(intern(&name))
        } else {
            a
        };
        Instruction::from_parts(op, &[a, b])
    })
}

proptest! {
    #[test]
    fn stream_round_trip(code in prop::collection::vec(instruction(), 0..64)) {
        let bytes = serialize(&code);
        let decoded = deserialize(&bytes).unwrap();
        prop_assert_eq!(decoded.len(), code.len());
        for (got, want) in decoded.iter().zip(&code) {
            prop_assert_eq!(got.op, want.op);
            prop_assert_eq!(got.len(), want.len());
            prop_assert_eq!(got.operands(), want.operands());
        }
    }

    #[test]
    fn reader_writer_agree(code in prop::collection::vec(instruction(), 0..32)) {
        let mut buf = Vec::new();
        write_to(&mut buf, &code).unwrap();
        prop_assert_eq!(&buf, &serialize(&code));
        let mut cursor = std::io::Cursor::new(buf);
        prop_assert_eq!(read_from(&mut cursor).unwrap(), code);
    }

    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = deserialize(&bytes);
        let _ = read_from(&mut std::io::Cursor::new(bytes));
    }

    #[test]
    fn quoted_atoms_come_back(n in any::<i64>(), name in "[a-z][a-z0-9-]{0,12}") {
        for (src, want) in [
            (format!("'{n}"), Value::Number(n)),
            (format!("'{name}"), Value::symbol(&name)),
            (format!("'\"{name}\""), Value::string(&name)),
        ] {
            let expr = tern_reader::read(&src).unwrap();
            let code = deserialize(&serialize(&compile(&expr).unwrap())).unwrap();
            let mut vm = Vm::with_output(Vec::new());
            prop_assert_eq!(vm.execute(code).unwrap(), want);
        }
    }

    #[test]
    fn sums_survive_the_wire(nums in prop::collection::vec(-1000i64..1000, 0..12)) {
        let src = format!(
            "(+ {})",
            nums.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" ")
        );
        let expr = tern_reader::read(&src).unwrap();
        let code = deserialize(&serialize(&compile(&expr).unwrap())).unwrap();
        let mut vm = Vm::with_output(Vec::new());
        let want: i64 = nums.iter().sum();
        prop_assert_eq!(vm.execute(code).unwrap(), Value::Number(want));
    }
}
