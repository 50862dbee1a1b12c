use super::*;

define_id! {
    pub struct TestId;
}

#[yare::parameterized(
    truncates_long = { "abcdefghij", 4, "abcd" },
    leaves_short_strings_alone = { "ab", 4, "ab" },
    zero_width = { "abc", 0, "" },
)]
fn short_truncates_at_the_requested_width(input: &str, n: usize, expected: &str) {
    let id = TestId::new(input);
    assert_eq!(id.short(n), expected);
}

#[test]
fn display_matches_inner_string() {
    let id = TestId::new("svc-name");
    assert_eq!(id.to_string(), "svc-name");
}

#[test]
fn sequential_id_gen_increments() {
    let gen = SequentialIdGen::new("run");
    assert_eq!(gen.next(), "run-1");
    assert_eq!(gen.next(), "run-2");
}

#[test]
fn sequential_id_gen_clones_share_counter() {
    let gen = SequentialIdGen::new("run");
    let clone = gen.clone();
    assert_eq!(gen.next(), "run-1");
    assert_eq!(clone.next(), "run-2");
}

#[test]
fn uuid_id_gen_produces_distinct_ids() {
    let gen = UuidIdGen;
    assert_ne!(gen.next(), gen.next());
}
