//! Compile-fail tests for the class macros.
//!
//! Each case checks that a misuse is reported at the offending token with a
//! message naming the fix.

#[test]
fn macro_compile_fail_tests() {
    let t = trybuild::TestCases::new();
    t.compile_fail("tests/compile_fail/*.rs");
}
