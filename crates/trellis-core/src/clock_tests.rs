use super::*;

#[test]
fn fake_clock_advance_moves_both_now_and_epoch() {
    let clock = FakeClock::new();
    let before_now = clock.now();
    let before_epoch = clock.epoch_ms();

    clock.advance(Duration::from_millis(500));

    assert_eq!(clock.now(), before_now + Duration::from_millis(500));
    assert_eq!(clock.epoch_ms(), before_epoch + 500);
}

#[test]
fn fake_clock_set_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}

#[test]
fn system_clock_epoch_ms_is_plausible() {
    let clock = SystemClock;
    // Any time after 2020-01-01 in epoch ms.
    assert!(clock.epoch_ms() > 1_577_836_800_000);
}
