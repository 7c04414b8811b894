#![allow(dead_code)]

use tern::{Runtime, TernError, Value};

/// Evaluate in a fresh runtime, returning the result and everything written.
pub fn eval_out(input: &str) -> (Value, String) {
    let mut rt = Runtime::new();
    rt.eval_captured(input)
        .unwrap_or_else(|e| panic!("eval failed for `{input}`: {e}"))
}

/// Evaluate in a fresh runtime, returning only the result.
pub fn eval(input: &str) -> Value {
    eval_out(input).0
}

/// Evaluate in a fresh runtime, expecting an error.
pub fn eval_err(input: &str) -> TernError {
    let mut rt = Runtime::new();
    rt.eval_captured(input)
        .expect_err(&format!("expected error for: {input}"))
}

/// Generate one test per `name: "source" => value` entry.
///
/// Usage:
/// ```ignore
/// eval_tests! {
///     test_name: "(+ 1 2)" => Value::Number(3),
/// }
/// ```
#[macro_export]
macro_rules! eval_tests {
    ($($name:ident: $input:expr => $expected:expr),* $(,)?) => {
        $(
            #[test]
            fn $name() {
                assert_eq!(common::eval($input), $expected, "for input: {}", $input);
            }
        )*
    };
}
