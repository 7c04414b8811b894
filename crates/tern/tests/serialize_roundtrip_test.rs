//! Programs sent over the wire run the same as programs compiled in place.

use tern::{
    compile, deserialize, deserialize_with_table, read, resolve, serialize, StringTable, Value, Vm,
};
use tern_core::symbol::spur_from_index;

/// Compile source, serialize, deserialize, run, and return the result and output.
fn eval_roundtrip(input: &str) -> (Value, String) {
    let form = read(input).unwrap_or_else(|e| panic!("read failed for `{input}`: {e}"));
    let code = compile(&form).unwrap_or_else(|e| panic!("compile failed for `{input}`: {e}"));
    let bytes = serialize(&code);
    let decoded =
        deserialize(&bytes).unwrap_or_else(|e| panic!("deserialize failed for `{input}`: {e}"));
    assert_eq!(decoded, code, "instruction mismatch for `{input}`");

    let mut vm = Vm::with_output(Vec::new());
    let val = vm
        .execute(decoded)
        .unwrap_or_else(|e| panic!("run failed for `{input}`: {e}"));
    (val, String::from_utf8(vm.into_output()).unwrap())
}

fn eval_in_place(input: &str) -> (Value, String) {
    let mut vm = Vm::with_output(Vec::new());
    let val = vm.execute(compile(&read(input).unwrap()).unwrap()).unwrap();
    (val, String::from_utf8(vm.into_output()).unwrap())
}

fn assert_roundtrip(input: &str) {
    let (rt_val, rt_out) = eval_roundtrip(input);
    let (val, out) = eval_in_place(input);
    // Arrays and maps compare by identity, so compare renderings.
    assert_eq!(rt_val.to_string(), val.to_string(), "result mismatch for `{input}`");
    assert_eq!(rt_out, out, "output mismatch for `{input}`");
}

#[test]
fn roundtrip_closure_counter() {
    let (val, out) = eval_roundtrip(
        "(begin (define b '()) \
         (define f (lambda () (begin (define a 0) (set b (lambda () (set a (+ a 1))))))) \
         (f) (b) (b) (b))",
    );
    assert_eq!(val, Value::Number(3));
    assert_eq!(out, "3\n");
}

#[test]
fn roundtrip_loop() {
    assert_roundtrip("(begin (define a 0) (loop (< a 5) (begin (set a (+ a 1)) (println a))) a)");
}

#[test]
fn roundtrip_recursion() {
    assert_roundtrip(
        "(begin (define s (lambda (x) (cond ((< 0 x) (begin (println x) (s (- x 1)))) (#t 0)))) (s 3))",
    );
}

#[test]
fn roundtrip_quoted_structure() {
    let (val, _) = eval_roundtrip("'(a (b . c) \"d\" 4)");
    assert_eq!(val, read("(a (b . c) \"d\" 4)").unwrap());
}

#[test]
fn roundtrip_strings_and_print() {
    assert_roundtrip("(begin (print \"x=\" 5) (println \"\") \"done\")");
}

#[test]
fn roundtrip_collections() {
    assert_roundtrip("(array-len (array-push (array-push (array) 1) 2))");
    assert_roundtrip("(hashmap-keys (hashmap-set (hashmap-set (hashmap) 'b 2) 'a 1))");
}

#[test]
fn roundtrip_nested_lambdas() {
    assert_roundtrip(
        "(begin (define adder (lambda (n) (lambda (x) (cond ((< 0 n) (+ x n)) (#t x))))) \
         ((adder 4) 10))",
    );
}

#[test]
fn roundtrip_truncated_stream_is_rejected() {
    let code = compile(&read("(+ 1 2)").unwrap()).unwrap();
    let bytes = serialize(&code);
    assert!(deserialize(&bytes[..bytes.len() - 1]).is_err());
}

/// Shift every interned index out of this process's range and describe the
/// shifted indices by text alone, as a stream compiled on another host would be.
fn as_foreign(input: &str) -> (Vec<u8>, StringTable) {
    const OFFSET: u64 = 1 << 40;
    let mut code = compile(&read(input).unwrap()).unwrap();
    let mut table = StringTable::new();
    for inst in code.iter_mut().filter(|inst| inst.op.names_text()) {
        let spur = spur_from_index(inst.operand()).unwrap();
        let foreign = inst.operand() + OFFSET;
        table.insert(foreign, resolve(spur).to_string());
        inst.set_operand(foreign);
    }
    (serialize(&code), StringTable::decode(&table.encode()).unwrap())
}

#[test]
fn roundtrip_through_string_table() {
    let src = "(begin (define x 5) (println \"hi\") (define sq (lambda (n) (* n n))) (sq x))";
    let (bytes, table) = as_foreign(src);
    assert!(deserialize(&bytes).is_err());

    let code = deserialize_with_table(&bytes, &table).unwrap();
    let mut vm = Vm::with_output(Vec::new());
    assert_eq!(vm.execute(code).unwrap(), Value::Number(25));
    assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "hi\n25\n");
}

#[test]
fn roundtrip_quoted_form_through_string_table() {
    let (bytes, table) = as_foreign("'(a \"b\" (c . d))");
    let code = deserialize_with_table(&bytes, &table).unwrap();
    let mut vm = Vm::with_output(Vec::new());
    assert_eq!(vm.execute(code).unwrap(), read("(a \"b\" (c . d))").unwrap());
}

#[test]
fn roundtrip_table_collected_from_code() {
    let code = compile(&read("(begin (define greeting \"hello\") greeting)").unwrap()).unwrap();
    let table = StringTable::for_code(&code);
    let decoded = deserialize_with_table(&serialize(&code), &table).unwrap();
    assert_eq!(decoded, code);
}
